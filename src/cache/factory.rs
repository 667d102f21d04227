// ABOUTME: Cache factory for environment-based backend selection
// ABOUTME: Dispatches between in-memory and Redis backends behind one type
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

use super::{memory::InMemoryCache, redis::RedisCache, CacheConfig, CacheProvider};
use crate::errors::AppResult;
use std::time::Duration;

/// Unified cache handle selecting the backend from configuration
#[derive(Clone)]
pub enum Cache {
    /// Single-process in-memory backend
    Memory(InMemoryCache),
    /// Distributed Redis backend
    Redis(RedisCache),
}

impl Cache {
    /// Create cache from environment variables (`REDIS_URL` selects Redis)
    ///
    /// # Errors
    ///
    /// Returns an error if backend initialization fails
    pub async fn from_env() -> AppResult<Self> {
        let config = CacheConfig {
            max_entries: std::env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(super::DEFAULT_CACHE_MAX_ENTRIES),
            redis_url: std::env::var("REDIS_URL").ok(),
            cleanup_interval: std::env::var("CACHE_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or_else(
                    || Duration::from_secs(super::DEFAULT_CLEANUP_INTERVAL_SECS),
                    Duration::from_secs,
                ),
            enable_background_cleanup: true,
            redis_connection: crate::config::environment::RedisConnectionConfig::from_env(),
        };

        <Self as CacheProvider>::new(config).await
    }
}

#[async_trait::async_trait]
impl CacheProvider for Cache {
    async fn new(config: CacheConfig) -> AppResult<Self> {
        if config.redis_url.is_some() {
            tracing::info!("Initializing Redis cache backend");
            Ok(Self::Redis(RedisCache::new(config).await?))
        } else {
            tracing::info!(
                "Initializing in-memory cache (max entries: {})",
                config.max_entries
            );
            Ok(Self::Memory(InMemoryCache::new(config).await?))
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        match self {
            Self::Memory(inner) => inner.set_ex(key, value, ttl).await,
            Self::Redis(inner) => inner.set_ex(key, value, ttl).await,
        }
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        match self {
            Self::Memory(inner) => inner.get(key).await,
            Self::Redis(inner) => inner.get(key).await,
        }
    }

    async fn get_del(&self, key: &str) -> AppResult<Option<String>> {
        match self {
            Self::Memory(inner) => inner.get_del(key).await,
            Self::Redis(inner) => inner.get_del(key).await,
        }
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        match self {
            Self::Memory(inner) => inner.delete(key).await,
            Self::Redis(inner) => inner.delete(key).await,
        }
    }

    async fn decr(&self, key: &str) -> AppResult<i64> {
        match self {
            Self::Memory(inner) => inner.decr(key).await,
            Self::Redis(inner) => inner.decr(key).await,
        }
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        match self {
            Self::Memory(inner) => inner.ttl(key).await,
            Self::Redis(inner) => inner.ttl(key).await,
        }
    }

    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        match self {
            Self::Memory(inner) => inner.scan_keys(pattern).await,
            Self::Redis(inner) => inner.scan_keys(pattern).await,
        }
    }

    async fn health_check(&self) -> AppResult<()> {
        match self {
            Self::Memory(inner) => inner.health_check().await,
            Self::Redis(inner) => inner.health_check().await,
        }
    }
}
