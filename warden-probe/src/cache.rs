//! Responses that arrived after their caller stopped waiting.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug)]
struct Entry {
    response: RawResponse,
    stored_at: Instant,
}

/// One-shot cache keyed by the canonical request hash. Entries are removed
/// when served, so each late response is handed out at most once.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, Entry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the entry if it is younger than `ttl`.
    pub fn take(&self, key: &str, ttl: Duration) -> Option<RawResponse> {
        let (_, entry) = self.entries.remove(key)?;
        if entry.stored_at.elapsed() < ttl {
            Some(entry.response)
        } else {
            None
        }
    }

    /// Stores a late response and drops anything older than `ttl`.
    pub fn insert(&self, key: String, response: RawResponse, ttl: Duration) {
        self.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        self.entries.insert(
            key,
            Entry {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// SHA-256 over method, URL, body and the headers in sorted order.
pub fn request_key(
    method: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: &[u8],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    for (name, value) in headers {
        hasher.update(b"\n");
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> RawResponse {
        RawResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn key_depends_on_every_component() {
        let h = headers(&[("content-type", "application/json")]);
        let base = request_key("POST", "http://a/x", &h, b"{}");
        assert_eq!(base.len(), 64);
        assert_eq!(base, request_key("post", "http://a/x", &h, b"{}"));
        assert_ne!(base, request_key("GET", "http://a/x", &h, b"{}"));
        assert_ne!(base, request_key("POST", "http://a/y", &h, b"{}"));
        assert_ne!(base, request_key("POST", "http://a/x", &h, b"{ }"));
        assert_ne!(base, request_key("POST", "http://a/x", &BTreeMap::new(), b"{}"));
    }

    #[test]
    fn take_serves_once() {
        let cache = ResponseCache::new();
        cache.insert("k".into(), response("late"), Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.take("k", Duration::from_secs(60)),
            Some(response("late"))
        );
        assert!(cache.is_empty());
        assert_eq!(cache.take("k", Duration::from_secs(60)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_not_served_and_get_pruned() {
        let cache = ResponseCache::new();
        let ttl = Duration::from_secs(60);
        cache.insert("old".into(), response("a"), ttl);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.insert("new".into(), response("b"), ttl);
        assert_eq!(cache.len(), 1, "stale entry pruned on insert");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.take("new", ttl), None);
        assert!(cache.is_empty());
    }
}
