//! Content-addressed cache of raw capability responses.
//!
//! One cache belongs to one [`ResponseRace`](super::ResponseRace); entries
//! live as long as the race does. Callers follow the single-slot pattern:
//! `check` a payload to get its [`PendingKey`], `get` the hit under that key,
//! or `store` exactly one fresh result, which consumes the key. Each call owns
//! its own key, so concurrent calls on one cache never store under another
//! call's fingerprint.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Deterministic key over prompt text plus keyword parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// `params` is a sorted map, so parameter order never changes the key.
    pub fn of(prompt: &str, params: &BTreeMap<String, Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update([0u8]);
        for (key, value) in params {
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..16])
    }
}

/// Fingerprint taken by [`ResponseCache::check`], awaiting its one result.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PendingKey(Fingerprint);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("no cached entry for {0}")]
    MissingEntry(String),
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<Fingerprint, String>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<&str, CacheError> {
        self.entries
            .get(fingerprint)
            .map(String::as_str)
            .ok_or_else(|| CacheError::MissingEntry(fingerprint.to_string()))
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, response: String) {
        self.entries.insert(fingerprint, response);
    }

    /// Fingerprint the payload and report whether a response is already
    /// stored under it.
    pub fn check(&self, prompt: &str, params: &BTreeMap<String, Value>) -> (PendingKey, bool) {
        let fingerprint = Fingerprint::of(prompt, params);
        let hit = self.entries.contains_key(&fingerprint);
        (PendingKey(fingerprint), hit)
    }

    /// Response stored under the pending key.
    pub fn get(&self, key: &PendingKey) -> Result<&str, CacheError> {
        self.lookup(&key.0)
    }

    /// Store the key's one result. The key is spent.
    pub fn store(&mut self, key: PendingKey, response: String) {
        self.insert(key.0, response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn fingerprint_ignores_parameter_order() {
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), json!(1));
        forward.insert("b".to_string(), json!("x"));
        let mut backward = BTreeMap::new();
        backward.insert("b".to_string(), json!("x"));
        backward.insert("a".to_string(), json!(1));
        assert_eq!(
            Fingerprint::of("prompt", &forward),
            Fingerprint::of("prompt", &backward)
        );
        assert_ne!(
            Fingerprint::of("prompt", &forward),
            Fingerprint::of("other", &forward)
        );
        assert_ne!(
            Fingerprint::of("prompt", &forward),
            Fingerprint::of("prompt", &params(&[("a", json!(2)), ("b", json!("x"))]))
        );
    }

    #[test]
    fn check_then_store_then_get_returns_stored_value() {
        let mut cache = ResponseCache::new();
        let payload = params(&[("task", json!("onset"))]);
        let (key, hit) = cache.check("score this", &payload);
        assert!(!hit);
        cache.store(key, "{\"score\": 1}".to_string());

        let (key, hit) = cache.check("score this", &payload);
        assert!(hit);
        assert_eq!(cache.get(&key).expect("hit"), "{\"score\": 1}");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_without_stored_entry_is_missing() {
        let cache = ResponseCache::new();
        let (key, hit) = cache.check("never stored", &BTreeMap::new());
        assert!(!hit);
        assert!(matches!(cache.get(&key), Err(CacheError::MissingEntry(_))));
    }

    #[test]
    fn interleaved_checks_store_under_their_own_keys() {
        let mut cache = ResponseCache::new();
        let (first, _) = cache.check("first", &BTreeMap::new());
        let (second, _) = cache.check("second", &BTreeMap::new());
        cache.store(first, "one".to_string());
        cache.store(second, "two".to_string());

        let (first, _) = cache.check("first", &BTreeMap::new());
        let (second, _) = cache.check("second", &BTreeMap::new());
        assert_eq!(cache.get(&first).expect("first"), "one");
        assert_eq!(cache.get(&second).expect("second"), "two");
    }

    #[test]
    fn lookup_by_fingerprint() {
        let mut cache = ResponseCache::new();
        let fingerprint = Fingerprint::of("p", &BTreeMap::new());
        assert!(cache.lookup(&fingerprint).is_err());
        cache.insert(fingerprint.clone(), "text".to_string());
        assert_eq!(cache.lookup(&fingerprint).expect("hit"), "text");
    }
}
