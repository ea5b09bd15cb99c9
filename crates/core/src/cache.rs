//! Memoizing decorator for attribute sources.
//!
//! [`CachingSource`] sits in front of any [`AttributeSource`] and stores its
//! answers in a [`CacheStore`]. Keys are derived from a configurable subset
//! of query attributes, so attributes that do not influence the answer do
//! not fragment the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexSet;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::ResolveError;
use crate::person::{Person, PersonSet};
use crate::query::Query;
use crate::source::{AttributeNames, AttributeSource, SourceFilter};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// What the cache holds for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedEntry {
    People(PersonSet),
    Person(Person),
    /// The delegate answered "nothing"; only stored with `cache_null_results`.
    Null,
}

/// Key/value storage behind a [`CachingSource`].
///
/// Implementations provide their own consistency; the decorator never holds
/// a lock across a delegate call.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedEntry>;
    fn put(&self, key: String, entry: CachedEntry);
    fn remove(&self, key: &str);
}

/// Unbounded process-local store.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> Option<CachedEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: String, entry: CachedEntry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    fn remove(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Which lookup produced an entry. Part of every key, so a single-result
/// entry never answers a set-result lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    ResolveMany,
    ResolveOne,
}

impl CacheOperation {
    fn discriminant(self) -> &'static str {
        match self {
            Self::ResolveMany => "resolve_many",
            Self::ResolveOne => "resolve_one",
        }
    }
}

/// Derives cache keys from queries. `None` means "do not cache".
pub trait CacheKeyGenerator: Send + Sync {
    fn generate_key(&self, operation: CacheOperation, query: &Query) -> Option<String>;
}

/// Hashes the operation plus the selected query attributes, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct AttributeCacheKeyGenerator {
    key_attributes: Option<IndexSet<String>>,
}

impl AttributeCacheKeyGenerator {
    /// Key on every query attribute.
    pub fn all_attributes() -> Self {
        Self::default()
    }

    /// Key on the named attributes only.
    pub fn with_key_attributes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_attributes: Some(names.into_iter().map(Into::into).collect()),
        }
    }
}

impl CacheKeyGenerator for AttributeCacheKeyGenerator {
    fn generate_key(&self, operation: CacheOperation, query: &Query) -> Option<String> {
        let mut parts: Vec<(&String, Value)> = query
            .iter()
            .filter(|(name, _)| {
                self.key_attributes
                    .as_ref()
                    .map_or(true, |keys| keys.contains(name.as_str()))
            })
            .map(|(name, values)| {
                let values = values.clone().map_or(Value::Null, Value::Array);
                (name, values)
            })
            .collect();

        if parts.is_empty() {
            return None;
        }
        parts.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        hasher.update(operation.discriminant().as_bytes());
        for (name, values) in &parts {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
            hasher.update(values.to_string().as_bytes());
        }
        Some(hex::encode(hasher.finalize()))
    }
}

// ---------------------------------------------------------------------------
// Decorator
// ---------------------------------------------------------------------------

/// Snapshot of the decorator's counters. Counts are approximate under
/// concurrent use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub queries: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.queries.saturating_sub(self.misses)
    }
}

/// Caches the answers of a delegate source.
pub struct CachingSource {
    inner: Arc<dyn AttributeSource>,
    store: Arc<dyn CacheStore>,
    key_generator: Arc<dyn CacheKeyGenerator>,
    cache_null_results: bool,
    queries: AtomicU64,
    misses: AtomicU64,
}

impl CachingSource {
    /// Cache `inner` in `store`, keyed on every query attribute.
    pub fn new(inner: Arc<dyn AttributeSource>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            inner,
            store,
            key_generator: Arc::new(AttributeCacheKeyGenerator::all_attributes()),
            cache_null_results: false,
            queries: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_key_generator(mut self, generator: Arc<dyn CacheKeyGenerator>) -> Self {
        self.key_generator = generator;
        self
    }

    /// Remember "nothing found" answers too.
    pub fn with_cache_null_results(mut self, cache_null_results: bool) -> Self {
        self.cache_null_results = cache_null_results;
        self
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            queries: self.queries.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Evict everything cached for `seed`.
    pub fn remove_user_attributes(&self, seed: &Query) {
        for operation in [CacheOperation::ResolveMany, CacheOperation::ResolveOne] {
            if let Some(key) = self.key_generator.generate_key(operation, seed) {
                debug!(source = %self.inner.id(), key = %key, "evicting cache entry");
                self.store.remove(&key);
            }
        }
    }

    /// Shared lookup path: consult the store, fall back to `load`, store.
    fn cached<T, L, U, W>(
        &self,
        operation: CacheOperation,
        query: &Query,
        load: L,
        unwrap_entry: U,
        wrap: W,
    ) -> Result<Option<T>, ResolveError>
    where
        L: FnOnce() -> Result<Option<T>, ResolveError>,
        U: Fn(CachedEntry) -> Option<Option<T>>,
        W: Fn(T) -> CachedEntry,
        T: Clone,
    {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let Some(key) = self.key_generator.generate_key(operation, query) else {
            debug!(source = %self.inner.id(), "query has no cache key attributes, not caching");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return load();
        };

        if let Some(hit) = self.store.get(&key).and_then(unwrap_entry) {
            debug!(source = %self.inner.id(), key = %key, "cache hit");
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(source = %self.inner.id(), key = %key, "cache miss");
        let result = load()?;
        match &result {
            Some(value) => self.store.put(key, wrap(value.clone())),
            None if self.cache_null_results => self.store.put(key, CachedEntry::Null),
            None => {}
        }
        Ok(result)
    }
}

impl AttributeSource for CachingSource {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn tags(&self) -> &[String] {
        self.inner.tags()
    }

    fn resolve_many(
        &self,
        query: &Query,
        filter: &dyn SourceFilter,
    ) -> Result<Option<PersonSet>, ResolveError> {
        self.cached(
            CacheOperation::ResolveMany,
            query,
            || self.inner.resolve_many(query, filter),
            |entry| match entry {
                CachedEntry::People(people) => Some(Some(people)),
                CachedEntry::Null => Some(None),
                CachedEntry::Person(_) => None,
            },
            CachedEntry::People,
        )
    }

    fn resolve_one(
        &self,
        query: &Query,
        filter: &dyn SourceFilter,
    ) -> Result<Option<Person>, ResolveError> {
        self.cached(
            CacheOperation::ResolveOne,
            query,
            || self.inner.resolve_one(query, filter),
            |entry| match entry {
                CachedEntry::Person(person) => Some(Some(person)),
                CachedEntry::Null => Some(None),
                CachedEntry::People(_) => None,
            },
            CachedEntry::Person,
        )
    }

    fn possible_result_attribute_names(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.inner.possible_result_attribute_names(filter)
    }

    fn available_query_attributes(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.inner.available_query_attributes(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{seed_query, AttributeMap};
    use crate::source::ALWAYS;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: AtomicUsize,
        found: bool,
    }

    impl AttributeSource for Counting {
        fn id(&self) -> &str {
            "counting"
        }

        fn resolve_many(
            &self,
            query: &Query,
            _filter: &dyn SourceFilter,
        ) -> Result<Option<PersonSet>, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.found {
                return Ok(None);
            }
            let name = query
                .get("username")
                .and_then(|v| v.as_ref())
                .and_then(|v| v.first())
                .and_then(|v| v.as_str())
                .unwrap_or("anon");
            Ok(Some([Person::named(name, AttributeMap::new())].into_iter().collect()))
        }
    }

    fn counting(found: bool) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            found,
        })
    }

    fn query(pairs: &[(&str, &str)]) -> Query {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(vec![json!(v)])))
            .collect()
    }

    #[test]
    fn test_key_ignores_non_key_attributes() {
        let generator = AttributeCacheKeyGenerator::with_key_attributes(["username"]);
        let a = generator.generate_key(
            CacheOperation::ResolveMany,
            &query(&[("username", "ed"), ("mail", "a@x")]),
        );
        let b = generator.generate_key(
            CacheOperation::ResolveMany,
            &query(&[("mail", "b@x"), ("username", "ed")]),
        );
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_changes_with_key_values_and_operation() {
        let generator = AttributeCacheKeyGenerator::with_key_attributes(["username"]);
        let ed = query(&[("username", "ed")]);
        let bob = query(&[("username", "bob")]);
        let many = generator.generate_key(CacheOperation::ResolveMany, &ed);
        assert_ne!(many, generator.generate_key(CacheOperation::ResolveMany, &bob));
        assert_ne!(many, generator.generate_key(CacheOperation::ResolveOne, &ed));
    }

    #[test]
    fn test_key_is_order_independent_for_all_attributes() {
        let generator = AttributeCacheKeyGenerator::all_attributes();
        let a = generator.generate_key(
            CacheOperation::ResolveMany,
            &query(&[("a", "1"), ("b", "2")]),
        );
        let b = generator.generate_key(
            CacheOperation::ResolveMany,
            &query(&[("b", "2"), ("a", "1")]),
        );
        assert_eq!(a, b);
        assert_eq!(a.unwrap().len(), 64);
    }

    #[test]
    fn test_no_key_attributes_present_is_uncacheable() {
        let generator = AttributeCacheKeyGenerator::with_key_attributes(["username"]);
        assert_eq!(
            generator.generate_key(CacheOperation::ResolveMany, &query(&[("mail", "a@x")])),
            None
        );
    }

    #[test]
    fn test_hit_skips_delegate() {
        let inner = counting(true);
        let cache = CachingSource::new(inner.clone(), Arc::new(InMemoryCacheStore::new()));
        let seed = seed_query("username", "edalquist");

        let first = cache.resolve_many(&seed, &ALWAYS).unwrap();
        let second = cache.resolve_many(&seed, &ALWAYS).unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { queries: 2, misses: 1 });
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_single_and_set_entries_do_not_collide() {
        let inner = counting(true);
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = CachingSource::new(inner.clone(), store.clone());
        let seed = seed_query("username", "edalquist");

        cache.resolve_many(&seed, &ALWAYS).unwrap();
        let person = cache.resolve_one(&seed, &ALWAYS).unwrap().unwrap();
        assert_eq!(person.name(), Some("edalquist"));
        assert_eq!(store.len(), 2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_null_results_cached_only_when_enabled() {
        let seed = seed_query("username", "nobody");

        let inner = counting(false);
        let cache = CachingSource::new(inner.clone(), Arc::new(InMemoryCacheStore::new()));
        assert_eq!(cache.resolve_many(&seed, &ALWAYS).unwrap(), None);
        assert_eq!(cache.resolve_many(&seed, &ALWAYS).unwrap(), None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let inner = counting(false);
        let cache = CachingSource::new(inner.clone(), Arc::new(InMemoryCacheStore::new()))
            .with_cache_null_results(true);
        assert_eq!(cache.resolve_many(&seed, &ALWAYS).unwrap(), None);
        assert_eq!(cache.resolve_many(&seed, &ALWAYS).unwrap(), None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_user_attributes_evicts() {
        let inner = counting(true);
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = CachingSource::new(inner.clone(), store.clone());
        let seed = seed_query("username", "edalquist");

        cache.resolve_many(&seed, &ALWAYS).unwrap();
        cache.resolve_one(&seed, &ALWAYS).unwrap();
        assert_eq!(store.len(), 2);

        cache.remove_user_attributes(&seed);
        assert!(store.is_empty());
        cache.resolve_many(&seed, &ALWAYS).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
