// ABOUTME: Fast-cache abstraction for OAuth flow state and rate buckets
// ABOUTME: Pluggable backend support (in-memory, Redis) with atomic get-and-delete
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Cache abstraction layer.
//!
//! Two consumers with hard requirements live on top of this trait: the OAuth
//! flow state store needs an atomic get-and-delete for single-use secrets
//! (closing the check-then-use replay race), and the rate limiter needs an
//! atomic decrement. Both are first-class operations here so every backend
//! provides them natively.

/// Cache factory for creating cache backends
pub mod factory;
/// In-memory cache implementation
pub mod memory;
/// Redis cache implementation
pub mod redis;

use crate::config::environment::RedisConnectionConfig;
use crate::errors::AppResult;
use std::time::Duration;

/// Default maximum entries for the in-memory backend
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
/// Default background cleanup interval in seconds
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
/// Namespace prefix applied to every key (safe for shared Redis instances)
pub const CACHE_KEY_PREFIX: &str = "vitalsync:";

/// Cache provider trait for pluggable backend implementations
#[async_trait::async_trait]
pub trait CacheProvider: Send + Sync + Clone {
    /// Create new cache instance with configuration
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    async fn new(config: CacheConfig) -> AppResult<Self>
    where
        Self: Sized;

    /// Store a value with TTL (SETEX semantics)
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Retrieve a value
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Atomically retrieve and delete a value (GETDEL semantics).
    /// Required for single-use secrets: two concurrent consumers of the
    /// same key must not both observe the value.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails
    async fn get_del(&self, key: &str) -> AppResult<Option<String>>;

    /// Remove a key
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Atomically decrement an integer value, returning the new value.
    /// An absent key is created at -1, mirroring Redis DECR on a missing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an integer or the operation fails
    async fn decr(&self, key: &str) -> AppResult<i64>;

    /// Remaining TTL for a key, `None` when absent or without expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL check fails
    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>>;

    /// Keys matching a glob-style pattern (SCAN semantics, no blocking KEYS)
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails
    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>>;

    /// Verify the backend is healthy
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails
    async fn health_check(&self) -> AppResult<()>;
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries (in-memory backend)
    pub max_entries: usize,
    /// Redis connection URL; `None` selects the in-memory backend
    pub redis_url: Option<String>,
    /// Cleanup interval for expired entries (in-memory backend)
    pub cleanup_interval: Duration,
    /// Enable background cleanup task (disable in tests to avoid runtime conflicts)
    pub enable_background_cleanup: bool,
    /// Redis connection and retry configuration
    pub redis_connection: RedisConnectionConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            redis_url: None,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            enable_background_cleanup: true,
            redis_connection: RedisConnectionConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Configuration for tests: in-memory, no background task
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            enable_background_cleanup: false,
            ..Self::default()
        }
    }
}
