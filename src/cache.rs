//! The cache between precache refreshes and live lookups.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Raw partner payloads keyed by whatever the partner chooses, usually the
/// feed URL. Reads of expired entries are misses.
#[async_trait]
pub trait LiveCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn put(&self, key: &str, value: Vec<u8>);
}

pub struct MemoryCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Vec<u8>)>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops expired entries.
    pub async fn purge(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, (stored, _)| stored.elapsed() <= ttl);
    }
}

#[async_trait]
impl LiveCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().await;
        let (stored, value) = entries.get(key)?;
        (stored.elapsed() <= self.ttl).then(|| value.clone())
    }

    async fn put(&self, key: &str, value: Vec<u8>) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (Instant::now(), value));
    }
}
