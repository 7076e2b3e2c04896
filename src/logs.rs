//! Logging setup and the error reporting middleware.

use crate::error::InternalErrorReport;
use crate::response::error_response;
use crate::state::AppState;
use crate::utils::{get_ip, header_str, lenient_json_bytes, request_root};
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::{Map, Value};
use std::any::Any;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

pub const REQUEST_START_HEADER: &str = "x-request-start";

/// `RUST_LOG` wins; otherwise `info`, or `debug` when verbose, for everything
/// including the application's own target `log_name`.
pub fn setup_logging(verbose: bool, log_name: &str) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},{log_name}={level},sqlx=warn")));
    // A second call (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Anything above 310 is worth a warning, except the statuses clients
/// routinely trigger: 401, 404 and 470.
pub fn default_should_warn(status: StatusCode) -> bool {
    status.as_u16() > 310 && !matches!(status.as_u16(), 401 | 404 | 470)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Request start in epoch milliseconds, as set by the upstream router when present.
pub fn request_start(headers: &HeaderMap) -> i64 {
    header_str(headers, REQUEST_START_HEADER)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or_else(now_ms)
}

fn headers_json(headers: &HeaderMap) -> Value {
    let mut out = Map::new();
    for (name, value) in headers {
        out.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }
    Value::Object(out)
}

/// Everything known about the request when it is reported.
struct RequestContext {
    start_ms: i64,
    method: String,
    url: String,
    host: String,
    user_agent: String,
    headers: Value,
    request_text: Value,
    user_ip: Option<String>,
}

impl RequestContext {
    fn duration_ms(&self) -> i64 {
        now_ms() - self.start_ms
    }
}

/// Logs unexpected responses with full request context and replaces responses
/// carrying an [`InternalErrorReport`] with a bare 500.
pub async fn error_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let mut ctx = RequestContext {
        start_ms: request_start(&parts.headers),
        method: parts.method.to_string(),
        url: format!("{}{}", request_root(&parts.headers), parts.uri),
        host: header_str(&parts.headers, header::HOST).unwrap_or("").to_string(),
        user_agent: header_str(&parts.headers, header::USER_AGENT).unwrap_or("").to_string(),
        headers: headers_json(&parts.headers),
        request_text: Value::Null,
        user_ip: get_ip(&parts.headers, peer),
    };

    let body = match to_bytes(body, state.settings.max_request_size).await {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            let response = error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request Entity Too Large", None);
            return warn_unexpected(&state, &ctx, response).await;
        }
    };
    ctx.request_text = lenient_json_bytes(&body);

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    if let Some(report) = response.extensions().get::<InternalErrorReport>().cloned() {
        tracing::error!(
            duration_ms = ctx.duration_ms(),
            method = %ctx.method,
            url = %ctx.url,
            host = %ctx.host,
            user_agent = %ctx.user_agent,
            headers = %ctx.headers,
            request_text = %ctx.request_text,
            user_ip = ctx.user_ip.as_deref().unwrap_or(""),
            kind = report.kind,
            error = %report.message,
            "{}: {}",
            ctx.url,
            report.message,
        );
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", None);
    }

    warn_unexpected(&state, &ctx, response).await
}

/// Warn about `response` when the state's predicate says so. The body is
/// buffered for the log line and handed back unchanged.
async fn warn_unexpected(state: &AppState, ctx: &RequestContext, response: Response) -> Response {
    let status = response.status();
    if !(state.should_warn)(status) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = match to_bytes(body, state.settings.max_request_size).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(url = %ctx.url, error = %e, "failed to read response body");
            Default::default()
        }
    };
    tracing::warn!(
        duration_ms = ctx.duration_ms(),
        method = %ctx.method,
        url = %ctx.url,
        host = %ctx.host,
        user_agent = %ctx.user_agent,
        headers = %ctx.headers,
        request_text = %ctx.request_text,
        response_status = status.as_u16(),
        response_headers = %headers_json(&parts.headers),
        response_text = %lenient_json_bytes(&body),
        user_ip = ctx.user_ip.as_deref().unwrap_or(""),
        "{} unexpected response {}",
        ctx.url,
        status.as_u16(),
    );
    Response::from_parts(parts, Body::from(body))
}

/// Used with `CatchPanicLayer::custom`: log the panic, answer a bare 500.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", None)
}
