// ABOUTME: In-memory cache implementation with TTL support and background cleanup
// ABOUTME: Backs tests and single-node deployments without a Redis dependency
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

use super::{CacheConfig, CacheProvider};
use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// In-memory cache entry with expiration
#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at.checked_duration_since(Instant::now())
    }
}

/// TTL applied to counter keys created implicitly by `decr` on a missing key
const IMPLICIT_COUNTER_TTL_SECS: u64 = 3600;

/// In-memory cache with TTL expiry and optional background cleanup
///
/// Uses `Arc<RwLock<HashMap>>` for shared state between cache operations and
/// the cleanup task. Single-key mutations take the write lock for their full
/// duration, which is what makes `get_del` and `decr` atomic here.
#[derive(Clone)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
    max_entries: usize,
    // Shared by every clone; when the last clone drops, the channel closes
    // and the cleanup task stops.
    _cleanup_guard: Option<Arc<tokio::sync::mpsc::Sender<()>>>,
}

impl InMemoryCache {
    fn new_with_config(config: &CacheConfig) -> Self {
        let store = Arc::new(RwLock::new(HashMap::new()));

        let shutdown_tx = if config.enable_background_cleanup {
            let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
            let store_clone = Arc::clone(&store);
            let cleanup_interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            Self::cleanup_expired(&store_clone).await;
                        }
                        _ = shutdown_rx.recv() => {
                            tracing::debug!("all cache handles dropped, cleanup task stopping");
                            break;
                        }
                    }
                }
            });

            Some(Arc::new(shutdown_tx))
        } else {
            None
        };

        Self {
            store,
            max_entries: config.max_entries,
            _cleanup_guard: shutdown_tx,
        }
    }

    /// Remove all expired entries from cache
    async fn cleanup_expired(store: &Arc<RwLock<HashMap<String, CacheEntry>>>) {
        let mut guard = store.write().await;
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired());
        let removed = before - guard.len();
        drop(guard);
        if removed > 0 {
            tracing::debug!("cleaned up {} expired cache entries", removed);
        }
    }

    /// Drop expired entries opportunistically when over capacity
    fn evict_if_full(guard: &mut HashMap<String, CacheEntry>, max_entries: usize) {
        if guard.len() >= max_entries {
            guard.retain(|_, entry| !entry.is_expired());
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for InMemoryCache {
    async fn new(config: CacheConfig) -> AppResult<Self> {
        Ok(Self::new_with_config(&config))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut store = self.store.write().await;
        Self::evict_if_full(&mut store, self.max_entries);
        store.insert(key.to_owned(), CacheEntry::new(value.to_owned(), ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut store = self.store.write().await;
        match store.get(key) {
            Some(entry) if entry.is_expired() => {
                store.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn get_del(&self, key: &str) -> AppResult<Option<String>> {
        // Single write-lock section: remove-and-return is atomic, so two
        // concurrent consumers cannot both observe the value.
        let mut store = self.store.write().await;
        match store.remove(key) {
            Some(entry) if entry.is_expired() => Ok(None),
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn decr(&self, key: &str) -> AppResult<i64> {
        let mut store = self.store.write().await;
        match store.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    AppError::cache(format!("key {key} does not hold an integer"))
                })?;
                let next = current - 1;
                entry.value = next.to_string();
                Ok(next)
            }
            _ => {
                // Mirror Redis DECR on a missing key: create at -1
                store.insert(
                    key.to_owned(),
                    CacheEntry::new(
                        "-1".to_owned(),
                        Duration::from_secs(IMPLICIT_COUNTER_TTL_SECS),
                    ),
                );
                Ok(-1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        let store = self.store.read().await;
        Ok(store.get(key).and_then(CacheEntry::remaining_ttl))
    }

    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let store = self.store.read().await;
        let keys = store
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(k, _)| k)
            .filter(|key| glob_matches(pattern, key))
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn health_check(&self) -> AppResult<()> {
        // In-memory cache is always healthy
        Ok(())
    }
}

/// Match a key against a glob pattern; only '*' wildcards are supported,
/// which is all our key grammar uses
fn glob_matches(pattern: &str, key: &str) -> bool {
    let (p, k) = (pattern.as_bytes(), key.as_bytes());
    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while ki < k.len() {
        if pi < p.len() && p[pi] != b'*' && p[pi] == k[ki] {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = ki;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ki = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}
