//! Single-endpoint views: validate a payload against a model, then run a function.

use crate::config::ModelSchema;
use crate::error::AppError;
use crate::response::{json_response, ResponseEnvelope};
use crate::service::{parse_json, RequestValidator};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

pub type ExecFn =
    Arc<dyn Fn(AppState, Map<String, Value>) -> BoxFuture<'static, Result<Option<Value>, AppError>> + Send + Sync>;

pub struct ExecView {
    pub model: ModelSchema,
    exec: ExecFn,
}

impl ExecView {
    /// `exec` receives the validated data and may return a JSON object to send
    /// back; `None` answers `{"status": "ok"}`.
    pub fn new<F, Fut>(model: ModelSchema, exec: F) -> Self
    where
        F: Fn(AppState, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, AppError>> + Send + 'static,
    {
        ExecView {
            model,
            exec: Arc::new(move |state, data| Box::pin(exec(state, data))),
        }
    }

    pub fn schema(&self) -> Response {
        json_response(StatusCode::OK, &self.model.json_schema())
    }

    /// Validate `body` and run the function. The function runs on its own task
    /// so a client disconnecting mid-request does not abandon it half way.
    pub async fn execute(&self, state: AppState, body: &[u8]) -> Result<Response, AppError> {
        let raw = parse_json(body)?;
        let data = RequestValidator::validate(&self.model, &raw).map_err(AppError::invalid_data)?;
        let result = tokio::spawn((self.exec)(state, data))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("exec task failed: {}", e)))??;
        Ok(match result {
            Some(v) => json_response(StatusCode::OK, &v),
            None => json_response(StatusCode::OK, &ResponseEnvelope::ok()),
        })
    }
}

fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed {
        message: "Only GET, OPTIONS and POST requests are permitted.".into(),
        allowed: vec![Method::GET, Method::OPTIONS, Method::POST],
    }
}

/// GET and OPTIONS return the schema, POST executes, anything else is a 405.
pub fn exec_route(view: Arc<ExecView>) -> MethodRouter<AppState> {
    let for_get = view.clone();
    let for_options = view.clone();
    get(move || {
        let view = for_get.clone();
        async move { view.schema() }
    })
    .options(move || {
        let view = for_options.clone();
        async move { view.schema() }
    })
    .post(move |State(state): State<AppState>, body: Bytes| {
        let view = view.clone();
        async move {
            match view.execute(state, &body).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        }
    })
    .fallback(|| async { method_not_allowed().into_response() })
}
