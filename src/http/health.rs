//! Liveness endpoint. Answered locally, never proxied.

use axum::Json;
use serde_json::{json, Value};

pub const HEALTH_PATH: &str = "/health";

pub async fn health() -> Json<Value> {
    Json(json!({}))
}
