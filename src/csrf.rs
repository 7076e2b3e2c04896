//! CSRF defence without tokens: Content-Type, Origin and Referer checks.
//!
//! Browsers cannot send `application/json` cross-site without a preflight, and
//! always attach `Origin` to such requests, so checking both is enough to keep
//! other sites from driving state-changing endpoints.

use crate::extractors::RequestEnvelope;
use crate::response::{json_response, JSON_CONTENT_TYPE};
use crate::settings::CsrfConfig;
use crate::utils::remove_port;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

impl Verdict {
    fn reject(reason: &str) -> Self {
        Verdict::Reject(reason.to_string())
    }
}

fn path_match(patterns: &[Regex], path: &str) -> bool {
    patterns.iter().any(|p| p.is_match(path))
}

/// Scheme and host of a URL, no port, no path.
fn url_root(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    let host = url.host_str()?;
    Some(format!("{}://{}", url.scheme(), host))
}

fn is_safe_method(method: &Method) -> bool {
    // OPTIONS only ever returns a schema; preflights are handled separately.
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// Decide whether a non-preflight request may reach its handler.
pub fn validate(req: &RequestEnvelope, config: &CsrfConfig) -> Verdict {
    if is_safe_method(&req.method) || path_match(&config.ignore_paths, &req.path) {
        return Verdict::Accept;
    }
    if !req.route_matched {
        return Verdict::Accept;
    }

    let ct = req.content_type.as_deref().unwrap_or("");
    if path_match(&config.upload_paths, &req.path) {
        if !ct.starts_with("multipart/form-data; boundary") {
            return Verdict::reject("upload path, wrong Content-Type");
        }
    } else if ct != JSON_CONTENT_TYPE {
        return Verdict::reject("Content-Type not application/json");
    }

    // Origin and host ports differ when testing locally.
    if req.host.starts_with("localhost:") {
        return Verdict::Accept;
    }

    let Some(origin) = req.origin.as_deref() else {
        return Verdict::reject("Origin missing");
    };
    let origin = remove_port(origin);

    if path_match(&config.cross_origin_paths, &req.path) {
        if !config.cross_origin_origins.iter().any(|p| p.is_match(&origin)) {
            return Verdict::reject("Origin wrong");
        }
        // Iframes often send no Referer; only check it when present.
        if let Some(referer) = req.referer.as_deref() {
            if !config.cross_origin_referers.iter().any(|p| p.is_match(referer)) {
                return Verdict::reject("Referer wrong");
            }
        }
    } else {
        let root = remove_port(&req.root());
        if origin != root {
            return Verdict::reject("Origin wrong");
        }
        let referer_root = req.referer.as_deref().and_then(url_root);
        if referer_root.as_deref() != Some(root.as_str()) {
            return Verdict::reject("Referer wrong");
        }
    }
    Verdict::Accept
}

/// Verdict for an OPTIONS request carrying `Access-Control-Request-Method`.
/// Origin is not checked: cross-origin iframes send an opaque one.
pub fn preflight(req: &RequestEnvelope, config: &CsrfConfig) -> Verdict {
    let method_ok = req.access_control_request_method.as_deref() == Some(Method::POST.as_str());
    let headers_ok = req
        .access_control_request_headers
        .as_deref()
        .map(|h| h.to_lowercase() == "content-type")
        .unwrap_or(false);
    if method_ok && headers_ok && path_match(&config.cross_origin_paths, &req.path) {
        Verdict::Accept
    } else {
        Verdict::reject("Access-Control checks failed")
    }
}

fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn forbidden(message: String) -> Response {
    allow_any_origin(json_response(StatusCode::FORBIDDEN, &json!({ "message": message })))
}

/// Answers CORS preflights before routing; other requests pass through.
pub async fn preflight_middleware(
    State(config): State<Arc<CsrfConfig>>,
    envelope: RequestEnvelope,
    request: Request,
    next: Next,
) -> Response {
    if envelope.method != Method::OPTIONS || envelope.access_control_request_method.is_none() {
        return next.run(request).await;
    }
    match preflight(&envelope, &config) {
        Verdict::Accept => {
            let mut response = allow_any_origin("ok".into_response());
            response.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type"),
            );
            response
        }
        Verdict::Reject(reason) => forbidden(reason),
    }
}

/// Installed per matched route (`Router::route_layer`).
pub async fn csrf_middleware(
    State(config): State<Arc<CsrfConfig>>,
    envelope: RequestEnvelope,
    request: Request,
    next: Next,
) -> Response {
    match validate(&envelope, &config) {
        Verdict::Accept => next.run(request).await,
        Verdict::Reject(reason) => {
            tracing::debug!(path = %envelope.path, %reason, "csrf check failed");
            forbidden(format!("CSRF failure: {}", reason))
        }
    }
}
