//! Request helpers shared by the middleware and the BREAD views.

use crate::error::AppError;
use axum::http::{header, HeaderMap};
use regex::Regex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::OnceLock;

pub const IP_HEADER: &str = "x-forwarded-for";
pub const PROTO_HEADER: &str = "x-forwarded-proto";

fn port_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":\d{2,}$").expect("static regex"))
}

/// Drop a trailing `:port` (two or more digits).
pub fn remove_port(host: &str) -> String {
    port_suffix().replace(host, "").into_owned()
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address: first `X-Forwarded-For` entry, else the peer address.
pub fn get_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    match header_str(headers, IP_HEADER) {
        Some(ips) if !ips.is_empty() => ips.split(',').next().map(|ip| ip.trim_matches(' ').to_string()),
        _ => peer.map(|a| a.ip().to_string()),
    }
}

/// `scheme://host` as the client sees it. TLS is usually terminated upstream,
/// so the forwarded proto header wins over the connection scheme.
pub fn request_root(headers: &HeaderMap) -> String {
    let scheme = header_str(headers, PROTO_HEADER)
        .filter(|s| !s.is_empty())
        .unwrap_or("http");
    let host = header_str(headers, header::HOST).unwrap_or("");
    format!("{}://{}", scheme, host)
}

/// Largest OFFSET PostgreSQL accepts (`bigint`).
pub const MAX_OFFSET: u64 = i64::MAX as u64;

/// Offset for a 1-based `page` query value. Missing or empty means the first page.
/// Pages past the data are not an error; the offset saturates at [`MAX_OFFSET`].
pub fn get_offset(page: Option<&str>, page_size: u32) -> Result<u64, AppError> {
    let page = match page {
        None | Some("") => return Ok(0),
        Some(p) => p,
    };
    match page.parse::<i64>() {
        Ok(p) if p >= 1 => Ok((p as u64 - 1)
            .checked_mul(u64::from(page_size))
            .map_or(MAX_OFFSET, |offset| offset.min(MAX_OFFSET))),
        _ => Err(AppError::bad_request(format!("invalid page '{}'", page))),
    }
}

/// First `page` value of a raw query string, the way a browser form sends it.
pub fn page_param(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "page")
        .map(|(_, value)| value.into_owned())
}

/// Raw bodies for logging: JSON if it parses, else the text, else null.
pub fn lenient_json_bytes(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => match std::str::from_utf8(body) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Null,
        },
    }
}
