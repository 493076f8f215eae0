//! Response handling and transformation.
//!
//! # Responsibilities
//! - Run the interceptor over backend responses
//! - Stream untouched responses without buffering
//! - Swap in rewritten JSON bodies with matching status and headers
//! - Synthesize CORS preflight answers for mocked routes

use axum::body::{Body, Bytes};
use axum::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, CONTENT_TYPE,
    TRANSFER_ENCODING,
};
use axum::http::response::Parts;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::Response;
use futures_util::{future, stream, Stream, StreamExt};

use crate::mock::{Interception, RequestContext, ResponseInterceptor, Rewrite};

/// Permissive CORS headers, shared by the preflight responder and the CORS layer.
pub const CORS_HEADERS: [(HeaderName, &str); 4] = [
    (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (ACCESS_CONTROL_ALLOW_HEADERS, "X-Requested-With,content-type"),
    (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS, PUT, PATCH, DELETE"),
    (ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
];

/// Apply the interceptor to a backend response.
///
/// Returns the response to send and the handling path taken. Backend bodies
/// larger than `body_limit` are never rewritten; they stream through as sent.
pub async fn intercept(
    interceptor: &ResponseInterceptor,
    ctx: &RequestContext,
    response: Response<Body>,
    body_limit: usize,
) -> (Response<Body>, Interception) {
    let plan = interceptor.classify(ctx);
    if plan == Interception::PassThrough {
        return (response, plan);
    }

    let (mut parts, body) = response.into_parts();
    if !plan.needs_backend_body() {
        tracing::debug!(method = %ctx.method, url = %ctx.url, "Handled request");
        return (preflight_response(parts), plan);
    }

    if declared_length(&parts.headers).is_some_and(|len| len > body_limit) {
        tracing::warn!(url = %ctx.url, limit = body_limit, "Backend body over limit, not rewriting");
        return (Response::from_parts(parts, body), plan);
    }

    let original = match buffer_body(body, body_limit).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Partial(body) => {
            tracing::warn!(url = %ctx.url, limit = body_limit, "Backend body not buffered, not rewriting");
            return (Response::from_parts(parts, body), plan);
        }
    };

    let response = match interceptor.rewrite(&plan, ctx, &original) {
        Rewrite::Unmodified => Response::from_parts(parts, Body::from(original)),
        Rewrite::Preflight => preflight_response(parts),
        Rewrite::Json(body) => {
            parts.status = StatusCode::OK;
            set_json_headers(&mut parts.headers, &body);
            Response::from_parts(parts, Body::from(body))
        }
    };
    (response, plan)
}

enum Buffered {
    Complete(Bytes),
    /// The body outgrew the limit or failed mid-stream. Replays what was read,
    /// then the rest of the backend stream.
    Partial(Body),
}

async fn buffer_body(body: Body, limit: usize) -> Buffered {
    let mut rest = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0usize;

    while let Some(chunk) = rest.next().await {
        match chunk {
            Ok(chunk) => {
                size += chunk.len();
                chunks.push(chunk);
                if size > limit {
                    return Buffered::Partial(replay(chunks, rest));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Backend body failed mid-stream");
                return Buffered::Partial(replay(chunks, stream::once(future::ready(Err(e)))));
            }
        }
    }

    Buffered::Complete(Bytes::from(chunks.concat()))
}

fn replay<S>(chunks: Vec<Bytes>, rest: S) -> Body
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Send + 'static,
{
    Body::from_stream(stream::iter(chunks.into_iter().map(Ok)).chain(rest))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

fn set_json_headers(headers: &mut HeaderMap, body: &Bytes) {
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
}

/// The backend's response turned into `200 OK` with permissive CORS headers
/// and no body.
pub fn preflight_response(mut parts: Parts) -> Response<Body> {
    parts.status = StatusCode::OK;
    let headers = &mut parts.headers;
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(0usize));
    Response::from_parts(parts, Body::empty())
}
