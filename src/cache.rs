//! Process-wide TTL cache for downstream responses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::auth::HeaderBag;

struct Entry {
    value: Value,
    inserted: Instant,
}

/// Shared response cache.
///
/// Keys must already be scoped to a credential identity (see
/// [`credential_scope`]); the cache itself does not know who is asking.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub async fn insert(&self, key: impl Into<String>, value: Value) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, e| e.inserted.elapsed() < ttl);
        entries.insert(
            key.into(),
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Stable identifier for the effective headers of a call.
///
/// Covers credentials and passthrough headers alike, since an acting-user
/// header changes what the downstream returns. An empty bag scopes to
/// `"system"`.
pub fn credential_scope(headers: &HeaderBag) -> String {
    let mut hasher = Sha256::new();
    let mut any = false;
    for (name, value) in headers {
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(value.as_bytes());
        hasher.update([0]);
        any = true;
    }
    if !any {
        return "system".to_string();
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}
