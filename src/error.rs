//! Typed errors and HTTP mapping.

use crate::response::{error_response, FieldError};
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("resource '{resource}': {message}")]
    InvalidResource { resource: String, message: String },
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("settings: {0}")]
    Settings(String),
    #[error("config load: {0}")]
    Load(String),
}

/// Failures surfaced by the SQL capability. Unique violations are kept apart so
/// callers can turn them into a conflict report.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("unique constraint violated on ({})", .columns.join(", "))]
    UniqueViolation { columns: Vec<String> },
    #[error("database: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("unexpected query result: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{message}")]
    BadRequest { message: String, details: Option<Value> },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    MethodNotAllowed { message: String, allowed: Vec<Method> },
    #[error("{message}")]
    Conflict { message: String, details: Vec<FieldError> },
    #[error("{message}")]
    InvalidInput { message: String, details: Option<Value> },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    /// 400 carrying per-field validation errors.
    pub fn invalid_data(errors: Vec<FieldError>) -> Self {
        AppError::BadRequest {
            message: "Invalid Data".into(),
            details: Some(json!(errors)),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::InvalidInput { .. } => invalid_input_status(),
            AppError::Db(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Non-standard 470 used for "Invalid user input".
pub fn invalid_input_status() -> StatusCode {
    StatusCode::from_u16(470).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Attached to generic 500 responses so the error middleware can log what
/// really happened without the detail reaching the client.
#[derive(Clone, Debug)]
pub struct InternalErrorReport {
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::BadRequest { message, details } | AppError::InvalidInput { message, details } => {
                error_response(status, &message, details)
            }
            AppError::Unauthorized(message) | AppError::Forbidden(message) | AppError::NotFound(message) => {
                error_response(status, &message, None)
            }
            AppError::MethodNotAllowed { message, allowed } => {
                let allowed: Vec<&str> = allowed.iter().map(Method::as_str).collect();
                let mut response = error_response(status, &message, Some(json!({ "allowed_methods": allowed })));
                if let Ok(v) = HeaderValue::from_str(&allowed.join(",")) {
                    response.headers_mut().insert(header::ALLOW, v);
                }
                response
            }
            AppError::Conflict { message, details } => {
                let details = (!details.is_empty()).then(|| json!(details));
                error_response(status, &message, details)
            }
            AppError::Db(e) => internal_response("database", e.to_string()),
            AppError::Config(e) => internal_response("config", e.to_string()),
            AppError::Internal(e) => internal_response("internal", format!("{:#}", e)),
        }
    }
}

fn internal_response(kind: &'static str, message: String) -> Response {
    let mut response = error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", None);
    response
        .extensions_mut()
        .insert(InternalErrorReport { kind, message });
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let err = AppError::Db(DbError::Decode("secret table layout".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response.extensions().get::<InternalErrorReport>().cloned();
        assert_eq!(report.map(|r| r.kind), Some("database"));
    }

    #[test]
    fn method_not_allowed_sets_allow_header() {
        let err = AppError::MethodNotAllowed {
            message: "nope".into(),
            allowed: vec![Method::GET, Method::POST],
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET,POST");
    }

    #[test]
    fn invalid_input_uses_470() {
        let err = AppError::InvalidInput {
            message: "bad".into(),
            details: None,
        };
        assert_eq!(err.status().as_u16(), 470);
    }
}
