//! Standard response envelope helpers. Every JSON body ends with a newline.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Uniform success/error shape: `{status, pk?|message?|items?+count?+pages?, details?}`.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pk: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ResponseEnvelope {
    pub fn ok() -> Self {
        ResponseEnvelope {
            status: Some("ok".into()),
            ..Default::default()
        }
    }

    pub fn created(pk: i64) -> Self {
        ResponseEnvelope {
            pk: Some(pk),
            ..Self::ok()
        }
    }

    pub fn deleted(message: String, pk: i64) -> Self {
        ResponseEnvelope {
            message: Some(message),
            pk: Some(pk),
            ..Default::default()
        }
    }

    pub fn page(items: Vec<Value>, count: i64, pages: i64) -> Self {
        ResponseEnvelope {
            items: Some(items),
            count: Some(count),
            pages: Some(pages),
            ..Default::default()
        }
    }

    pub fn error(message: &str, details: Option<Value>) -> Self {
        ResponseEnvelope {
            message: Some(message.to_string()),
            details,
            ..Default::default()
        }
    }
}

/// One validation or conflict problem, addressed by field location.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new(field: &str, msg: impl Into<String>, kind: impl Into<String>) -> Self {
        FieldError {
            loc: vec![field.to_string()],
            msg: msg.into(),
            kind: kind.into(),
        }
    }
}

pub fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response {
    match serde_json::to_vec(data) {
        Ok(body) => raw_json_response(status, body),
        Err(e) => {
            tracing::error!("failed to serialize response body: {}", e);
            raw_json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"message":"Internal Server Error"}"#.to_vec(),
            )
        }
    }
}

/// Wrap an already-encoded JSON document.
pub fn raw_json_response(status: StatusCode, mut body: Vec<u8>) -> Response {
    body.push(b'\n');
    let mut response = (status, Body::from(body)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

pub fn error_response(status: StatusCode, message: &str, details: Option<Value>) -> Response {
    json_response(status, &ResponseEnvelope::error(message, details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_skips_absent_fields() {
        let v = serde_json::to_value(ResponseEnvelope::created(4)).unwrap();
        assert_eq!(v, json!({"status": "ok", "pk": 4}));
        let v = serde_json::to_value(ResponseEnvelope::page(vec![], 0, 0)).unwrap();
        assert_eq!(v, json!({"items": [], "count": 0, "pages": 0}));
    }

    #[tokio::test]
    async fn bodies_end_with_newline() {
        let response = json_response(StatusCode::OK, &json!({"a": 1}));
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"a\":1}\n");
    }
}
