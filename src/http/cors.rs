//! Permissive CORS for proxied routes.
//!
//! Adds the CORS headers to every response that does not already carry them.
//! Preflights are not answered here: they reach the backend, or the preflight
//! responder for mocked routes.

use axum::{
    body::Body,
    http::{header::HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::http::response::CORS_HEADERS;

pub async fn permissive_cors(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
    response
}
