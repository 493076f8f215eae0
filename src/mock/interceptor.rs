//! Response interception and rewriting.
//!
//! Every proxied request is classified once, in strict priority order:
//!
//! 1. `GET /api/1/tasks/`            → merge synthetic ids into the task lists
//! 2. `/api/1/tasks/<id>`            → report or deliver a synthetic task
//! 3. URL contains `async_query`     → create a task from a pattern fixture
//! 4. JSON body with `async_query`   → create a task from a pattern fixture
//! 5. `OPTIONS` on a mocked pattern  → synthesized CORS preflight
//! 6. exact URL + method fixture     → replay the fixture
//! 7. anything else                  → pass through untouched
//!
//! Rewrites are fail-open: when the backend body cannot be parsed the original
//! response is returned unchanged and nothing in the simulation state moves.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::mock::fixtures::{FixtureStore, FixtureValue};
use crate::mock::registry::{TaskId, TaskRegistry};
use crate::mock::state::SharedSimulation;
use crate::observability::metrics;

/// Task collection endpoint of the backend.
pub const TASKS_PATH: &str = "/api/1/tasks/";

const ASYNC_QUERY_MARKER: &str = "async_query";
const JSON_CONTENT_TYPE: &str = "application/json";
const BROKEN_MOCK_MESSAGE: &str = "There is something wrong with this mock";

/// Error raised while rewriting a response. Always recovered by passing the
/// original response through.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("backend body is not valid JSON: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("failed to serialize rewritten body: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("backend body has unexpected shape at `{0}`")]
    UnexpectedShape(&'static str),
}

/// What the interceptor knows about the originating request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Path and query, as received from the client.
    pub url: String,
    pub headers: HeaderMap,
    /// Parsed request body; `Value::Null` when there was none.
    pub body: Value,
}

impl RequestContext {
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap, body: Value) -> Self {
        Self {
            method,
            url: url.into(),
            headers,
            body,
        }
    }

    /// The URL without its query string.
    pub fn base_url(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(base, _)| base)
    }

    /// Non-GET request that declares JSON and carries `async_query: true`.
    ///
    /// Any header line mentioning `application/json` counts as declaring JSON.
    fn is_async_query(&self) -> bool {
        self.method != Method::GET
            && declares_json(&self.headers)
            && self.body.get(ASYNC_QUERY_MARKER) == Some(&Value::Bool(true))
    }
}

fn declares_json(headers: &HeaderMap) -> bool {
    headers.iter().any(|(name, value)| {
        name.as_str().contains(JSON_CONTENT_TYPE)
            || value
                .to_str()
                .map(|v| v.to_ascii_lowercase().contains(JSON_CONTENT_TYPE))
                .unwrap_or(false)
    })
}

/// Handling path chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    TaskList,
    /// `None` when the id segment is not a number.
    TaskStatus(Option<TaskId>),
    CreateTask,
    Preflight,
    Replay,
    PassThrough,
}

impl Interception {
    /// Metric label for the handling path.
    pub fn label(&self) -> &'static str {
        match self {
            Interception::TaskList => "task_list",
            Interception::TaskStatus(_) => "task_status",
            Interception::CreateTask => "create_task",
            Interception::Preflight => "preflight",
            Interception::Replay => "replay",
            Interception::PassThrough => "pass_through",
        }
    }

    /// Whether the backend body is needed to produce the rewrite.
    pub fn needs_backend_body(&self) -> bool {
        !matches!(self, Interception::Preflight | Interception::PassThrough)
    }
}

/// Result of running the interceptor over a backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewrite {
    /// Send the backend response as it came.
    Unmodified,
    /// Replace the body with this JSON document.
    Json(Bytes),
    /// Answer with the synthesized CORS preflight.
    Preflight,
}

/// Response-transformation hook installed on the proxy boundary.
#[derive(Debug, Clone)]
pub struct ResponseInterceptor {
    fixtures: Arc<FixtureStore>,
    simulation: SharedSimulation,
}

impl ResponseInterceptor {
    pub fn new(fixtures: Arc<FixtureStore>, simulation: SharedSimulation) -> Self {
        Self {
            fixtures,
            simulation,
        }
    }

    pub fn simulation(&self) -> &SharedSimulation {
        &self.simulation
    }

    /// Pick the handling path for a request. Reads fixtures only.
    pub fn classify(&self, req: &RequestContext) -> Interception {
        let url = req.url.as_str();
        let method = req.method.as_str();

        if url == TASKS_PATH {
            return Interception::TaskList;
        }
        if let Some(rest) = url.strip_prefix(TASKS_PATH) {
            return Interception::TaskStatus(parse_task_id(rest));
        }

        let base_url = req.base_url();
        if (url.contains(ASYNC_QUERY_MARKER) || req.is_async_query())
            && self.fixtures.lookup_pattern(base_url, method).is_some()
        {
            return Interception::CreateTask;
        }

        if req.method == Method::OPTIONS && self.fixtures.matches_pattern(base_url) {
            return Interception::Preflight;
        }

        if self.fixtures.lookup_exact(url, method).is_some() {
            return Interception::Replay;
        }

        Interception::PassThrough
    }

    /// Produce the rewrite for a classified request, given the backend body.
    ///
    /// Never fails: errors are logged and turn into [`Rewrite::Unmodified`].
    pub fn rewrite(&self, plan: &Interception, req: &RequestContext, backend_body: &[u8]) -> Rewrite {
        match self.try_rewrite(plan, req, backend_body) {
            Ok(rewrite) => {
                if rewrite != Rewrite::Unmodified {
                    tracing::debug!(
                        method = %req.method,
                        url = %req.url,
                        handler = plan.label(),
                        "Handled request"
                    );
                }
                rewrite
            }
            Err(e) => {
                tracing::error!(
                    method = %req.method,
                    url = %req.url,
                    handler = plan.label(),
                    error = %e,
                    "Response rewrite failed, passing backend response through"
                );
                metrics::record_rewrite_failure(plan.label());
                Rewrite::Unmodified
            }
        }
    }

    fn try_rewrite(
        &self,
        plan: &Interception,
        req: &RequestContext,
        backend_body: &[u8],
    ) -> Result<Rewrite, RewriteError> {
        match plan {
            Interception::PassThrough | Interception::TaskStatus(None) => Ok(Rewrite::Unmodified),
            Interception::Preflight => Ok(Rewrite::Preflight),
            Interception::TaskList => {
                let mut data = parse_backend_body(backend_body)?;
                let state = self.simulation.lock();
                merge_task_lists(&mut data, &state.registry)?;
                encode(&data)
            }
            Interception::TaskStatus(Some(id)) => self.task_status(*id, backend_body),
            Interception::CreateTask => self.create_task(req, backend_body),
            Interception::Replay => self.replay(req, backend_body),
        }
    }

    fn task_status(&self, id: TaskId, backend_body: &[u8]) -> Result<Rewrite, RewriteError> {
        let mut state = self.simulation.lock();
        let registry = &mut state.registry;

        if let Some(outcome) = registry.completed_outcome(id) {
            parse_backend_body(backend_body)?;
            let body = encode(&envelope(json!({
                "outcome": outcome,
                "status": "completed",
            })))?;
            registry.consume_completed(id);
            metrics::record_task_delivered();
            metrics::record_task_gauges(registry.pending_count(), registry.completed_count());
            tracing::debug!(task_id = id, "Delivered completed task");
            return Ok(body);
        }

        if registry.is_pending(id) {
            parse_backend_body(backend_body)?;
            return encode(&envelope(json!({
                "outcome": null,
                "status": "pending",
            })));
        }

        Ok(Rewrite::Unmodified)
    }

    fn create_task(&self, req: &RequestContext, backend_body: &[u8]) -> Result<Rewrite, RewriteError> {
        let base_url = req.base_url();
        let method = req.method.as_str();
        let Some(fixture) = self.fixtures.lookup_pattern(base_url, method) else {
            return Ok(Rewrite::Unmodified);
        };
        parse_backend_body(backend_body)?;

        let mut state = self.simulation.lock();
        let call = state.counter.get(base_url, method) + 1;
        let outcome = pending_outcome(fixture, call);
        let task_id = state.registry.next_id();
        let body = encode(&envelope(json!({ "task_id": task_id })))?;

        state.counter.increment(base_url, method);
        state.registry.create_task(outcome);
        metrics::record_task_created();
        metrics::record_task_gauges(state.registry.pending_count(), state.registry.completed_count());
        tracing::debug!(task_id, url = %req.url, method, call, "Created mock task");
        Ok(body)
    }

    fn replay(&self, req: &RequestContext, backend_body: &[u8]) -> Result<Rewrite, RewriteError> {
        let url = req.url.as_str();
        let method = req.method.as_str();
        let Some(fixture) = self.fixtures.lookup_exact(url, method) else {
            return Ok(Rewrite::Unmodified);
        };
        parse_backend_body(backend_body)?;

        match fixture {
            FixtureValue::Single(value) => encode(value),
            FixtureValue::Sequence(_) => {
                let mut state = self.simulation.lock();
                let call = state.counter.get(url, method);
                let Some(value) = fixture.select(call) else {
                    return Ok(Rewrite::Unmodified);
                };
                let body = encode(value)?;
                state.counter.increment(url, method);
                Ok(body)
            }
        }
    }
}

/// Leading decimal digits of the segment after the tasks path.
fn parse_task_id(segment: &str) -> Option<TaskId> {
    let end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    segment[..end].parse().ok()
}

/// Payload a new task resolves to, for the `call`-th (1-based) creation.
fn pending_outcome(fixture: &FixtureValue, call: usize) -> Value {
    match fixture {
        FixtureValue::Single(value) if !value.is_object() => broken_mock(),
        _ => fixture
            .select(call.saturating_sub(1))
            .cloned()
            .unwrap_or_else(broken_mock),
    }
}

fn broken_mock() -> Value {
    json!({
        "result": null,
        "message": BROKEN_MOCK_MESSAGE,
    })
}

fn envelope(result: Value) -> Value {
    json!({
        "result": result,
        "message": "",
    })
}

/// Empty bodies count as `{}`.
fn parse_backend_body(body: &[u8]) -> Result<Value, RewriteError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(RewriteError::MalformedBody)
}

fn encode(value: &Value) -> Result<Rewrite, RewriteError> {
    serde_json::to_vec(value)
        .map(|bytes| Rewrite::Json(Bytes::from(bytes)))
        .map_err(RewriteError::Serialize)
}

/// Append the registry's ids to `result.pending` and `result.completed`.
fn merge_task_lists(data: &mut Value, registry: &TaskRegistry) -> Result<(), RewriteError> {
    let root = data
        .as_object_mut()
        .ok_or(RewriteError::UnexpectedShape("body"))?;

    let result = root
        .entry("result")
        .or_insert_with(|| Value::Object(Map::new()));
    if result.is_null() {
        *result = Value::Object(Map::new());
    }
    let result = result
        .as_object_mut()
        .ok_or(RewriteError::UnexpectedShape("result"))?;

    append_ids(result, "pending", registry.pending_ids())?;
    append_ids(result, "completed", registry.completed_ids())?;

    root.entry("message")
        .or_insert_with(|| Value::String(String::new()));
    Ok(())
}

fn append_ids(
    result: &mut Map<String, Value>,
    key: &'static str,
    ids: Vec<TaskId>,
) -> Result<(), RewriteError> {
    let list = result
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()));
    if list.is_null() {
        *list = Value::Array(Vec::new());
    }
    list.as_array_mut()
        .ok_or(RewriteError::UnexpectedShape(key))?
        .extend(ids.into_iter().map(Value::from));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::clock::tick;
    use crate::mock::state::SimulationState;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::HeaderValue;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    const BACKEND_OK: &[u8] = br#"{"result": null, "message": ""}"#;

    fn interceptor(fixtures: Value) -> ResponseInterceptor {
        ResponseInterceptor::new(
            Arc::new(FixtureStore::from_json(fixtures).unwrap()),
            SharedSimulation::new(SimulationState::new(100_000)),
        )
    }

    fn request(method: Method, url: &str) -> RequestContext {
        RequestContext::new(method, url, HeaderMap::new(), Value::Null)
    }

    fn json_request(method: Method, url: &str, body: Value) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        RequestContext::new(method, url, headers, body)
    }

    /// Classify, then rewrite; returns the parsed replacement body if any.
    fn run(interceptor: &ResponseInterceptor, req: &RequestContext, backend: &[u8]) -> Option<Value> {
        let plan = interceptor.classify(req);
        match interceptor.rewrite(&plan, req, backend) {
            Rewrite::Json(bytes) => Some(serde_json::from_slice(&bytes).unwrap()),
            Rewrite::Unmodified | Rewrite::Preflight => None,
        }
    }

    fn task_id(body: &Value) -> TaskId {
        body["result"]["task_id"].as_u64().unwrap()
    }

    fn foo_fixture() -> Value {
        json!({ "/api/1/foo": { "POST": [{ "result": 1 }, { "result": 2 }] } })
    }

    #[test]
    fn test_three_posts_then_poll() {
        let interceptor = interceptor(foo_fixture());
        let post = json_request(Method::POST, "/api/1/foo", json!({ "async_query": true }));

        let ids: Vec<TaskId> = (0..3)
            .map(|_| task_id(&run(&interceptor, &post, BACKEND_OK).unwrap()))
            .collect();
        assert_eq!(ids, vec![100_000, 100_001, 100_002]);

        let poll = |id: TaskId| run(&interceptor, &request(Method::GET, &format!("/api/1/tasks/{id}")), BACKEND_OK);

        assert_eq!(
            poll(ids[0]),
            Some(json!({ "result": { "outcome": null, "status": "pending" }, "message": "" }))
        );

        tick(&mut interceptor.simulation().lock());

        assert_eq!(
            poll(ids[0]),
            Some(json!({ "result": { "outcome": { "result": 1 }, "status": "completed" }, "message": "" }))
        );
        assert_eq!(
            poll(ids[1]),
            Some(json!({ "result": { "outcome": { "result": 2 }, "status": "completed" }, "message": "" }))
        );
        // Sequence exhausted: the third task sticks to the last element.
        assert_eq!(
            poll(ids[2]),
            Some(json!({ "result": { "outcome": { "result": 2 }, "status": "completed" }, "message": "" }))
        );

        // Consumed.
        assert_eq!(poll(ids[0]), None);
        let state = interceptor.simulation().lock();
        assert!(!state.registry.is_pending(ids[0]));
        assert!(!state.registry.is_completed(ids[0]));
    }

    #[test]
    fn test_classification_priority() {
        let interceptor = interceptor(json!({
            "/api/1/foo": { "POST": { "result": true }, "GET": { "plain": 1 } },
            "/api/1/tasks/": { "GET": { "shadowed": true } }
        }));

        assert_eq!(interceptor.classify(&request(Method::GET, "/api/1/tasks/")), Interception::TaskList);
        assert_eq!(
            interceptor.classify(&request(Method::GET, "/api/1/tasks/42")),
            Interception::TaskStatus(Some(42))
        );
        assert_eq!(
            interceptor.classify(&request(Method::GET, "/api/1/tasks/abc")),
            Interception::TaskStatus(None)
        );
        assert_eq!(
            interceptor.classify(&request(Method::POST, "/api/1/foo?async_query=true")),
            Interception::CreateTask
        );
        assert_eq!(
            interceptor.classify(&json_request(Method::POST, "/api/1/foo", json!({ "async_query": true }))),
            Interception::CreateTask
        );
        assert_eq!(interceptor.classify(&request(Method::OPTIONS, "/api/1/foo")), Interception::Preflight);
        assert_eq!(interceptor.classify(&request(Method::GET, "/api/1/foo")), Interception::Replay);
        assert_eq!(interceptor.classify(&request(Method::GET, "/api/1/other")), Interception::PassThrough);
    }

    #[test]
    fn test_async_query_flag_requirements() {
        let interceptor = interceptor(json!({ "/api/1/foo/bar": { "POST": {}, "GET": {} } }));

        // Not a strict boolean.
        let stringly = json_request(Method::POST, "/api/1/foo", json!({ "async_query": "true" }));
        assert_eq!(interceptor.classify(&stringly), Interception::PassThrough);

        // No JSON declaration anywhere in the headers.
        let undeclared = RequestContext::new(Method::POST, "/api/1/foo", HeaderMap::new(), json!({ "async_query": true }));
        assert_eq!(interceptor.classify(&undeclared), Interception::PassThrough);

        let get = json_request(Method::GET, "/api/1/foo", json!({ "async_query": true }));
        assert_eq!(interceptor.classify(&get), Interception::PassThrough);

        // Any header line mentioning application/json is enough.
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/html, Application/JSON"));
        let accept_only = RequestContext::new(Method::POST, "/api/1/foo", headers, json!({ "async_query": true }));
        assert_eq!(interceptor.classify(&accept_only), Interception::CreateTask);
    }

    #[test]
    fn test_missing_fixture_falls_through() {
        let interceptor = interceptor(json!({
            "/api/1/foo/extended": { "POST": {} },
            "/api/1/foo?async_query=true": { "GET": { "replayed": true } }
        }));

        // No pattern covers the URL and nothing else applies.
        let put = request(Method::PUT, "/api/1/nothing?async_query=true");
        assert_eq!(interceptor.classify(&put), Interception::PassThrough);

        // The first covering pattern has no GET entry; exact replay picks it up.
        let get = request(Method::GET, "/api/1/foo?async_query=true");
        assert_eq!(interceptor.classify(&get), Interception::Replay);
        assert_eq!(run(&interceptor, &get, BACKEND_OK), Some(json!({ "replayed": true })));
        assert_eq!(interceptor.simulation().lock().registry.pending_count(), 0);
    }

    #[test]
    fn test_marker_path_uses_base_url_for_counting() {
        let interceptor = interceptor(json!({
            "/api/1/history/events": { "GET": [{ "n": 1 }, { "n": 2 }] }
        }));
        let first = run(&interceptor, &request(Method::GET, "/api/1/history/events?async_query=true"), b"").unwrap();
        let second = run(&interceptor, &request(Method::GET, "/api/1/history/events?async_query=1&x=2"), b"").unwrap();

        let mut state = interceptor.simulation().lock();
        assert_eq!(state.counter.get("/api/1/history/events", "GET"), 2);
        state.registry.advance_all_pending();
        assert_eq!(state.registry.consume_completed(task_id(&first)), Some(json!({ "n": 1 })));
        assert_eq!(state.registry.consume_completed(task_id(&second)), Some(json!({ "n": 2 })));
    }

    #[test]
    fn test_non_object_single_fixture_yields_error_payload() {
        let interceptor = interceptor(json!({ "/api/1/foo": { "POST": "not an object" } }));
        let created = run(&interceptor, &request(Method::POST, "/api/1/foo?async_query=true"), BACKEND_OK).unwrap();

        let mut state = interceptor.simulation().lock();
        state.registry.advance_all_pending();
        assert_eq!(
            state.registry.consume_completed(task_id(&created)),
            Some(json!({ "result": null, "message": "There is something wrong with this mock" }))
        );
    }

    #[test]
    fn test_task_list_merges_ids() {
        let interceptor = interceptor(foo_fixture());
        let list = request(Method::GET, "/api/1/tasks/");

        assert_eq!(
            run(&interceptor, &list, b""),
            Some(json!({ "result": { "pending": [], "completed": [] }, "message": "" }))
        );

        let post = request(Method::POST, "/api/1/foo?async_query=true");
        let done = task_id(&run(&interceptor, &post, BACKEND_OK).unwrap());
        tick(&mut interceptor.simulation().lock());
        let waiting = task_id(&run(&interceptor, &post, BACKEND_OK).unwrap());

        let backend = br#"{"result": {"pending": [5], "completed": [3, 4]}, "message": "real"}"#;
        assert_eq!(
            run(&interceptor, &list, backend),
            Some(json!({
                "result": { "pending": [5, waiting], "completed": [3, 4, done] },
                "message": "real"
            }))
        );

        let null_result = br#"{"result": null, "message": ""}"#;
        assert_eq!(
            run(&interceptor, &list, null_result),
            Some(json!({ "result": { "pending": [waiting], "completed": [done] }, "message": "" }))
        );
    }

    #[test]
    fn test_unknown_or_unparseable_task_is_untouched() {
        let interceptor = interceptor(foo_fixture());
        assert_eq!(run(&interceptor, &request(Method::GET, "/api/1/tasks/99"), BACKEND_OK), None);
        assert_eq!(run(&interceptor, &request(Method::GET, "/api/1/tasks/nope"), b"<html>"), None);
    }

    #[test]
    fn test_task_id_parses_leading_digits() {
        assert_eq!(parse_task_id("100000"), Some(100_000));
        assert_eq!(parse_task_id("100000?foo=bar"), Some(100_000));
        assert_eq!(parse_task_id("12abc"), Some(12));
        assert_eq!(parse_task_id(""), None);
        assert_eq!(parse_task_id("?x=1"), None);
        assert_eq!(parse_task_id("-3"), None);
    }

    #[test]
    fn test_replay_sequence_then_single() {
        let interceptor = interceptor(json!({
            "/api/1/settings": { "GET": [{ "v": 1 }, { "v": 2 }], "PUT": { "saved": true } }
        }));
        let get = request(Method::GET, "/api/1/settings");
        let replies: Vec<Value> = (0..4).map(|_| run(&interceptor, &get, BACKEND_OK).unwrap()).collect();
        assert_eq!(replies, vec![json!({ "v": 1 }), json!({ "v": 2 }), json!({ "v": 2 }), json!({ "v": 2 })]);
        assert_eq!(interceptor.simulation().lock().counter.get("/api/1/settings", "GET"), 4);

        let put = request(Method::PUT, "/api/1/settings");
        assert_eq!(run(&interceptor, &put, BACKEND_OK), Some(json!({ "saved": true })));

        // Query strings are part of the exact key.
        assert_eq!(interceptor.classify(&request(Method::GET, "/api/1/settings?x=1")), Interception::PassThrough);
    }

    #[test]
    fn test_fail_open_leaves_state_untouched() {
        let interceptor = interceptor(foo_fixture());
        let post = json_request(Method::POST, "/api/1/foo", json!({ "async_query": true }));

        assert_eq!(interceptor.classify(&post), Interception::CreateTask);
        assert_eq!(
            interceptor.rewrite(&Interception::CreateTask, &post, b"<html>502</html>"),
            Rewrite::Unmodified
        );

        let state = interceptor.simulation().lock();
        assert_eq!(state.registry.pending_count(), 0);
        assert_eq!(state.registry.next_id(), 100_000);
        assert_eq!(state.counter.get("/api/1/foo", "POST"), 0);
    }

    #[test]
    fn test_fail_open_keeps_completed_task() {
        let interceptor = interceptor(foo_fixture());
        let post = request(Method::POST, "/api/1/foo?async_query=true");
        let id = task_id(&run(&interceptor, &post, BACKEND_OK).unwrap());
        tick(&mut interceptor.simulation().lock());

        let poll = request(Method::GET, &format!("/api/1/tasks/{id}"));
        assert_eq!(run(&interceptor, &poll, b"not json"), None);
        assert!(interceptor.simulation().lock().registry.is_completed(id));
        assert!(run(&interceptor, &poll, BACKEND_OK).is_some());
    }

    #[test]
    fn test_preflight_only_for_mocked_patterns() {
        let interceptor = interceptor(json!({ "/api/1/foo": { "OPTIONS": { "replayed": true }, "POST": {} } }));
        let options = request(Method::OPTIONS, "/api/1/foo");
        let plan = interceptor.classify(&options);

        assert_eq!(plan, Interception::Preflight);
        assert!(!plan.needs_backend_body());
        assert_eq!(interceptor.rewrite(&plan, &options, b"ignored"), Rewrite::Preflight);

        assert_eq!(interceptor.classify(&request(Method::OPTIONS, "/api/1/bar")), Interception::PassThrough);
    }

    #[test]
    fn test_base_url() {
        assert_eq!(request(Method::GET, "/a/b?c=d").base_url(), "/a/b");
        assert_eq!(request(Method::GET, "/a/b").base_url(), "/a/b");
    }

    /// Counts ERROR events seen by the subscriber.
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn errors_logged(f: impl FnOnce()) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(count.clone()));
        tracing::subscriber::with_default(subscriber, f);
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn test_malformed_backend_body_logs_one_error() {
        let interceptor = interceptor(foo_fixture());
        let cases = [
            request(Method::POST, "/api/1/foo?async_query=true"),
            request(Method::GET, TASKS_PATH),
        ];

        for req in cases {
            let plan = interceptor.classify(&req);
            let errors = errors_logged(|| {
                assert_eq!(interceptor.rewrite(&plan, &req, b"<html>"), Rewrite::Unmodified);
            });
            assert_eq!(errors, 1, "{} should log exactly one error", plan.label());
        }

        let ok = request(Method::POST, "/api/1/foo?async_query=true");
        assert_eq!(errors_logged(|| assert!(run(&interceptor, &ok, BACKEND_OK).is_some())), 0);
    }

    /// Keeps the last value set on each gauge.
    #[derive(Default)]
    struct GaugeRecorder {
        values: Arc<Mutex<HashMap<String, f64>>>,
    }

    struct RecordedGauge {
        name: String,
        values: Arc<Mutex<HashMap<String, f64>>>,
    }

    impl ::metrics::GaugeFn for RecordedGauge {
        fn increment(&self, value: f64) {
            *self.values.lock().unwrap().entry(self.name.clone()).or_default() += value;
        }

        fn decrement(&self, value: f64) {
            *self.values.lock().unwrap().entry(self.name.clone()).or_default() -= value;
        }

        fn set(&self, value: f64) {
            self.values.lock().unwrap().insert(self.name.clone(), value);
        }
    }

    impl ::metrics::Recorder for GaugeRecorder {
        fn describe_counter(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_gauge(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_histogram(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}

        fn register_counter(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Counter {
            ::metrics::Counter::noop()
        }

        fn register_gauge(&self, key: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Gauge {
            ::metrics::Gauge::from_arc(Arc::new(RecordedGauge {
                name: key.name().to_string(),
                values: self.values.clone(),
            }))
        }

        fn register_histogram(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Histogram {
            ::metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_task_gauges_follow_create_and_delivery() {
        let recorder = GaugeRecorder::default();
        let gauge = |name: &str| recorder.values.lock().unwrap().get(name).copied();
        let interceptor = interceptor(foo_fixture());
        let post = request(Method::POST, "/api/1/foo?async_query=true");

        let ids: Vec<TaskId> = ::metrics::with_local_recorder(&recorder, || {
            (0..2)
                .map(|_| task_id(&run(&interceptor, &post, BACKEND_OK).unwrap()))
                .collect()
        });
        assert_eq!(gauge("mock_tasks_pending"), Some(2.0));
        assert_eq!(gauge("mock_tasks_completed"), Some(0.0));

        tick(&mut interceptor.simulation().lock());

        ::metrics::with_local_recorder(&recorder, || {
            let poll = request(Method::GET, &format!("/api/1/tasks/{}", ids[0]));
            assert!(run(&interceptor, &poll, BACKEND_OK).is_some());
        });
        assert_eq!(gauge("mock_tasks_pending"), Some(0.0));
        assert_eq!(gauge("mock_tasks_completed"), Some(1.0));
    }
}
