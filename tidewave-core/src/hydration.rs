//! Hydration context for the two-pass fallback render
//!
//! The prepass records every query result it awaits into the query cache;
//! `dehydrate` freezes that state into a serializable snapshot so the
//! second, synchronous pass renders fully resolved and the client can
//! rehydrate from the same data.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// Query results accumulated during a prepass, keyed by query key.
#[derive(Debug, Clone, Default)]
pub struct QueryCache {
    entries: HashMap<String, Value>,
}

impl QueryCache {
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the cache into a serializable snapshot.
    #[must_use]
    pub fn dehydrate(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

#[derive(Default)]
struct HydrationInner {
    query_cache: QueryCache,
    dehydrated_state: Option<Value>,
}

/// Shared hydration context handle.
///
/// Handed to the tree factory so data-fetching components can record and
/// look up prepass results; one context per render attempt.
#[derive(Clone, Default)]
pub struct HydrationContext {
    inner: Arc<Mutex<HydrationInner>>,
}

impl HydrationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved query result.
    pub fn record_query(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().query_cache.insert(key, value);
    }

    /// Look up a previously resolved query result.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.inner.lock().query_cache.get(key).cloned()
    }

    #[must_use]
    pub fn has_queries(&self) -> bool {
        !self.inner.lock().query_cache.is_empty()
    }

    /// Dehydrate the accumulated query cache into the snapshot consumed by
    /// the second render pass and the client.
    pub fn dehydrate(&self) {
        let mut inner = self.inner.lock();
        if inner.query_cache.is_empty() {
            return;
        }
        inner.dehydrated_state = Some(inner.query_cache.dehydrate());
    }

    #[must_use]
    pub fn dehydrated_state(&self) -> Option<Value> {
        self.inner.lock().dehydrated_state.clone()
    }
}

impl std::fmt::Debug for HydrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HydrationContext")
            .field("queries", &inner.query_cache.entries.len())
            .field("dehydrated", &inner.dehydrated_state.is_some())
            .finish()
    }
}
