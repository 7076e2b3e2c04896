//! Normalized request metadata for validation and execution.

use crate::error::AppError;
use crate::utils::{header_str, PROTO_HEADER};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, MatchedPath, RawPathParams},
    http::{header, request::Parts, Method},
};

pub const PK_PARAM: &str = "pk";

/// Built fresh per request; nothing here is persisted.
#[derive(Clone, Debug)]
pub struct RequestEnvelope {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub host: String,
    pub forwarded_proto: Option<String>,
    pub access_control_request_method: Option<String>,
    pub access_control_request_headers: Option<String>,
    /// Raw `{pk}` path segment on path-scoped routes.
    pub pk: Option<String>,
    /// False when the router found no route, so a 404 or 405 follows anyway.
    pub route_matched: bool,
}

impl RequestEnvelope {
    pub fn from_parts(parts: &Parts) -> Self {
        let h = &parts.headers;
        let owned = |name: header::HeaderName| header_str(h, name).map(str::to_string);
        let host = header_str(h, header::HOST)
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        RequestEnvelope {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            content_type: owned(header::CONTENT_TYPE),
            origin: owned(header::ORIGIN),
            referer: owned(header::REFERER),
            host,
            forwarded_proto: header_str(h, PROTO_HEADER).map(str::to_string),
            access_control_request_method: owned(header::ACCESS_CONTROL_REQUEST_METHOD),
            access_control_request_headers: owned(header::ACCESS_CONTROL_REQUEST_HEADERS),
            pk: None,
            route_matched: parts.extensions.get::<MatchedPath>().is_some(),
        }
    }

    /// `scheme://host`, trusting the forwarded proto over the connection scheme.
    pub fn root(&self) -> String {
        let scheme = self
            .forwarded_proto
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("http");
        format!("{}://{}", scheme, self.host)
    }

    /// The `{pk}` segment as an integer. Anything that is not a plain run of
    /// digits does not name a row at all.
    pub fn parse_pk(&self) -> Result<i64, AppError> {
        self.pk
            .as_deref()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| AppError::NotFound("Not Found".into()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestEnvelope
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let mut envelope = RequestEnvelope::from_parts(parts);
        if let Ok(params) = RawPathParams::from_request_parts(parts, state).await {
            envelope.pk = params
                .iter()
                .find(|(name, _)| *name == PK_PARAM)
                .map(|(_, value)| value.to_string());
        }
        Ok(envelope)
    }
}
