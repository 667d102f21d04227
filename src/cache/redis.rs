// ABOUTME: Redis cache implementation with connection pooling and TTL support
// ABOUTME: Provides distributed state for multi-instance deployments
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

use super::{CacheConfig, CacheProvider, CACHE_KEY_PREFIX};
use crate::config::environment::RedisConnectionConfig;
use crate::errors::{AppError, AppResult};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{error, info, warn};

/// Redis cache implementation with connection pooling
///
/// Uses Redis `ConnectionManager` for automatic reconnection. All keys are
/// prefixed with [`CACHE_KEY_PREFIX`] for namespace isolation. Atomic
/// get-and-delete uses GETDEL (Redis 6.2+).
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    async fn new_with_config(config: &CacheConfig) -> AppResult<Self> {
        let redis_url = config
            .redis_url
            .as_ref()
            .ok_or_else(|| AppError::config("Redis URL is required for Redis cache backend"))?;

        let conn_config = &config.redis_connection;

        info!(
            "Connecting to Redis at {} (timeout={}s, response_timeout={}s, retries={})",
            redis_url,
            conn_config.connection_timeout_secs,
            conn_config.response_timeout_secs,
            conn_config.initial_connection_retries
        );

        let client = redis::Client::open(redis_url.as_str())
            .map_err(|e| AppError::cache(format!("failed to create Redis client: {e}")))?;

        let manager = Self::connect_with_retry(&client, conn_config).await?;

        info!("Successfully connected to Redis");

        Ok(Self { manager })
    }

    /// Connect to Redis with exponential backoff retry on failure
    async fn connect_with_retry(
        client: &redis::Client,
        conn_config: &RedisConnectionConfig,
    ) -> AppResult<ConnectionManager> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(conn_config.connection_timeout_secs))
            .set_response_timeout(Duration::from_secs(conn_config.response_timeout_secs))
            .set_number_of_retries(conn_config.reconnection_retries)
            .set_exponent_base(conn_config.retry_exponent_base)
            .set_max_delay(conn_config.max_retry_delay_ms);

        let max_retries = conn_config.initial_connection_retries;
        let mut delay_ms = conn_config.initial_retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await {
                Ok(manager) => {
                    if attempt > 0 {
                        info!("Redis connection established after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    last_error = Some(e);

                    if attempt < max_retries {
                        warn!(
                            "Redis connection attempt {}/{} failed, retrying in {}ms",
                            attempt + 1,
                            max_retries + 1,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(conn_config.max_retry_delay_ms);
                    }
                }
            }
        }

        Err(AppError::cache(format!(
            "failed to connect to Redis after {} retries: {}",
            max_retries + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        )))
    }

    fn build_key(key: &str) -> String {
        format!("{CACHE_KEY_PREFIX}{key}")
    }

    fn op_error(op: &str, e: &redis::RedisError) -> AppError {
        error!("Redis {op} operation failed: {e}");
        AppError::cache(format!("{op} failed: {e}"))
    }
}

#[async_trait::async_trait]
impl CacheProvider for RedisCache {
    async fn new(config: CacheConfig) -> AppResult<Self>
    where
        Self: Sized,
    {
        Self::new_with_config(&config).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let redis_key = Self::build_key(key);
        let mut conn = self.manager.clone();

        conn.set_ex::<_, _, ()>(&redis_key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| Self::op_error("SETEX", &e))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let redis_key = Self::build_key(key);
        let mut conn = self.manager.clone();

        conn.get(&redis_key)
            .await
            .map_err(|e| Self::op_error("GET", &e))
    }

    async fn get_del(&self, key: &str) -> AppResult<Option<String>> {
        let redis_key = Self::build_key(key);
        let mut conn = self.manager.clone();

        // GETDEL is a single atomic command; no check-then-use window
        redis::cmd("GETDEL")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::op_error("GETDEL", &e))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let redis_key = Self::build_key(key);
        let mut conn = self.manager.clone();

        let _: () = conn
            .del(&redis_key)
            .await
            .map_err(|e| Self::op_error("DEL", &e))?;

        Ok(())
    }

    async fn decr(&self, key: &str) -> AppResult<i64> {
        let redis_key = Self::build_key(key);
        let mut conn = self.manager.clone();

        conn.decr(&redis_key, 1)
            .await
            .map_err(|e| Self::op_error("DECR", &e))
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        let redis_key = Self::build_key(key);
        let mut conn = self.manager.clone();

        let ttl_secs: i64 = conn
            .ttl(&redis_key)
            .await
            .map_err(|e| Self::op_error("TTL", &e))?;

        // Redis returns -2 if key doesn't exist, -1 if key has no expiration
        match ttl_secs {
            secs if secs > 0 => Ok(Some(Duration::from_secs(secs as u64))),
            _ => Ok(None),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let redis_pattern = format!("{CACHE_KEY_PREFIX}{pattern}");
        let mut conn = self.manager.clone();
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        // Cursor-based SCAN, safe for large keyspaces
        loop {
            let (new_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&redis_pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::op_error("SCAN", &e))?;

            keys.extend(
                batch
                    .into_iter()
                    .map(|k| k.trim_start_matches(CACHE_KEY_PREFIX).to_owned()),
            );

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    async fn health_check(&self) -> AppResult<()> {
        let mut conn = self.manager.clone();

        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::op_error("PING", &e))?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(AppError::cache(format!(
                "unexpected PING response '{response}'"
            )))
        }
    }
}
