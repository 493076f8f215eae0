//! Stand-in backend for trying the proxy locally.
//!
//! ```text
//! cargo run --example mock_backend
//! ROTKI_URL=http://127.0.0.1:4242 cargo run
//! curl -X POST 'http://127.0.0.1:8080/api/1/history/events?async_query=true'
//! ```

use axum::{
    body::Bytes,
    extract::Path,
    http::{HeaderMap, Method, StatusCode},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;

async fn task_list() -> Json<Value> {
    Json(json!({ "result": { "pending": [], "completed": [] }, "message": "" }))
}

async fn task_status(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "result": null, "message": format!("No task with id {id} found") })),
    )
}

async fn accepted() -> Json<Value> {
    Json(json!({ "result": null, "message": "" }))
}

/// Describes what arrived, to see the proxy's body re-encoding.
async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(json!({
        "method": method.as_str(),
        "content_type": content_type,
        "length": body.len(),
        "body": String::from_utf8_lossy(&body),
    }))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let app = Router::new()
        .route("/api/1/ping", get(|| async { Json(json!({ "result": true, "message": "" })) }))
        .route("/api/1/tasks/", get(task_list))
        .route("/api/1/tasks/{id}", get(task_status))
        .route("/api/1/history/events", post(accepted))
        .route("/api/1/balances", get(accepted).put(accepted))
        .route("/echo", any(echo));

    let addr = SocketAddr::from(([127, 0, 0, 1], 4242));
    println!("Mock backend is listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
