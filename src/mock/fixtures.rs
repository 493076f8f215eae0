//! Canned responses keyed by URL pattern and HTTP method.
//!
//! The fixture document is a JSON object:
//!
//! ```json
//! {
//!   "/api/1/balances": {
//!     "GET":  { "result": {}, "message": "" },
//!     "POST": [ { "result": 1 }, { "result": 2 } ]
//!   }
//! }
//! ```
//!
//! A method maps to either a single value or an ordered sequence. Sequences are
//! walked by call count and stick to their last element once exhausted.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

/// Error type for fixture loading.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse fixture file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("fixture entry `{0}` must map HTTP methods to responses")]
    Shape(String),
}

/// A canned response for one pattern and method.
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureValue {
    Single(Value),
    Sequence(Vec<Value>),
}

impl FixtureValue {
    fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => FixtureValue::Sequence(items),
            other => FixtureValue::Single(other),
        }
    }

    /// Response for the zero-based `call`.
    ///
    /// Sequences clamp to their last element; an empty sequence yields nothing.
    pub fn select(&self, call: usize) -> Option<&Value> {
        match self {
            FixtureValue::Single(value) => Some(value),
            FixtureValue::Sequence(items) => items.get(call).or_else(|| items.last()),
        }
    }
}

#[derive(Debug, Clone)]
struct FixtureRoute {
    pattern: String,
    methods: HashMap<String, FixtureValue>,
}

/// Immutable fixture mapping, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct FixtureStore {
    /// Routes in document order; the first pattern match wins.
    routes: Vec<FixtureRoute>,
}

impl FixtureStore {
    /// A store with no fixtures. Mocking is effectively disabled.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from an already parsed fixture document.
    pub fn from_json(document: Value) -> Result<Self, FixtureError> {
        let Value::Object(entries) = document else {
            return Err(FixtureError::Shape("<root>".to_string()));
        };

        let mut routes = Vec::with_capacity(entries.len());
        for (pattern, methods) in entries {
            let Value::Object(methods) = methods else {
                return Err(FixtureError::Shape(pattern));
            };
            let methods = methods
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(method, value)| (method, FixtureValue::from_json(value)))
                .collect();
            routes.push(FixtureRoute { pattern, methods });
        }

        Ok(Self { routes })
    }

    /// Parse a fixture document from text.
    pub fn parse(text: &str) -> Result<Self, FixtureError> {
        Self::from_json(serde_json::from_str(text)?)
    }

    /// Read and parse the fixture file at `path`.
    pub fn try_load(path: &Path) -> Result<Self, FixtureError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Load the fixture file, falling back to an empty store.
    ///
    /// A missing file is expected and only logged at info; a broken one is an error
    /// but never aborts startup.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Fixture file does not exist, async_query mocking is disabled"
            );
            return Self::empty();
        }

        tracing::info!(path = %path.display(), "Loading mock data");
        match Self::try_load(path) {
            Ok(store) => {
                tracing::info!(patterns = store.len(), "Mock data loaded");
                store
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load mock data, mocking disabled");
                Self::empty()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route whose pattern contains `base_url`.
    fn find_pattern(&self, base_url: &str) -> Option<&FixtureRoute> {
        self.routes.iter().find(|route| route.pattern.contains(base_url))
    }

    /// Whether any pattern covers `base_url`, regardless of method.
    pub fn matches_pattern(&self, base_url: &str) -> bool {
        self.find_pattern(base_url).is_some()
    }

    /// Fixture for `method` on the first pattern covering `base_url`.
    pub fn lookup_pattern(&self, base_url: &str, method: &str) -> Option<&FixtureValue> {
        self.find_pattern(base_url)?.methods.get(method)
    }

    /// Fixture registered under exactly `url` for `method`.
    pub fn lookup_exact(&self, url: &str, method: &str) -> Option<&FixtureValue> {
        self.routes
            .iter()
            .find(|route| route.pattern == url)?
            .methods
            .get(method)
    }
}
