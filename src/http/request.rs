//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a request ID (UUID v4) for requests that arrive without one
//! - Parse the buffered body for inspection by the interceptor
//! - Re-encode the inspected body for the backend and fix `Content-Length`

use axum::body::Bytes;
use axum::http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, Request};
use serde_json::{Map, Value};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::form_urlencoded;
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

/// Issues UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request id for log fields, `"unknown"` when absent.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Parse a request body the way the interceptor inspects it.
///
/// JSON bodies become JSON values, urlencoded bodies an object of strings
/// (repeated keys collect into an array). Anything else, including bodies
/// that fail to parse, is `Value::Null`.
pub fn parse_body(headers: &HeaderMap, raw: &[u8]) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }

    let content_type = content_type(headers);
    if content_type.starts_with(JSON) {
        match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Request body is not valid JSON, forwarding as is");
                Value::Null
            }
        }
    } else if content_type.starts_with(FORM) {
        parse_form(raw)
    } else {
        Value::Null
    }
}

fn parse_form(raw: &[u8]) -> Value {
    let mut fields = Map::new();
    for (key, value) in form_urlencoded::parse(raw) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(fields)
}

/// Whether a parsed body carries nothing worth re-encoding.
pub fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Object(fields) => fields.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Null | Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Produce the body forwarded to the backend and set `Content-Length` to match.
///
/// Non-empty JSON and urlencoded bodies are re-encoded from their parsed form;
/// everything else goes out byte for byte.
pub fn rewrite_body(headers: &mut HeaderMap, parsed: &Value, raw: Bytes) -> Bytes {
    let body = if is_empty_body(parsed) {
        raw
    } else {
        let content_type = content_type(headers);
        if content_type.starts_with(JSON) {
            serde_json::to_vec(parsed).map(Bytes::from).unwrap_or(raw)
        } else if content_type.starts_with(FORM) {
            Bytes::from(encode_form(parsed))
        } else {
            raw
        }
    };

    if body.is_empty() && !headers.contains_key(CONTENT_LENGTH) {
        return body;
    }
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    body
}

fn encode_form(parsed: &Value) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Value::Object(fields) = parsed {
        for (key, value) in fields {
            match value {
                Value::Array(values) => {
                    for value in values {
                        serializer.append_pair(key, &form_value(value));
                    }
                }
                value => {
                    serializer.append_pair(key, &form_value(value));
                }
            }
        }
    }
    serializer.finish()
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
