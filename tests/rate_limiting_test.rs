// ABOUTME: Integration tests for the cache-backed rate limiter
// ABOUTME: Covers exact bucket exhaustion and fail-open on cache failure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;
use vitalsync::cache::{memory::InMemoryCache, CacheConfig, CacheProvider};
use vitalsync::errors::{AppError, AppResult};
use vitalsync::models::ProviderId;
use vitalsync::rate_limiting::{ProviderRateLimiter, RateLimitDecision};

/// Cache that fails every operation, standing in for an unreachable Redis
#[derive(Clone)]
struct FailingCache;

#[async_trait]
impl CacheProvider for FailingCache {
    async fn new(_config: CacheConfig) -> AppResult<Self> {
        Ok(Self)
    }
    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> AppResult<()> {
        Err(AppError::cache("connection refused"))
    }
    async fn get(&self, _key: &str) -> AppResult<Option<String>> {
        Err(AppError::cache("connection refused"))
    }
    async fn get_del(&self, _key: &str) -> AppResult<Option<String>> {
        Err(AppError::cache("connection refused"))
    }
    async fn delete(&self, _key: &str) -> AppResult<()> {
        Err(AppError::cache("connection refused"))
    }
    async fn decr(&self, _key: &str) -> AppResult<i64> {
        Err(AppError::cache("connection refused"))
    }
    async fn ttl(&self, _key: &str) -> AppResult<Option<Duration>> {
        Err(AppError::cache("connection refused"))
    }
    async fn scan_keys(&self, _pattern: &str) -> AppResult<Vec<String>> {
        Err(AppError::cache("connection refused"))
    }
    async fn health_check(&self) -> AppResult<()> {
        Err(AppError::cache("connection refused"))
    }
}

#[tokio::test]
async fn test_hourly_bucket_allows_exactly_150_calls() -> anyhow::Result<()> {
    let cache = InMemoryCache::new(CacheConfig::for_tests()).await?;
    let limiter = ProviderRateLimiter::new(cache);
    let user = Uuid::new_v4();

    for call in 1..=150 {
        let decision = limiter.check_and_increment(ProviderId::Fitbit, user).await;
        assert!(decision.is_allowed(), "call {call} should be allowed");
    }

    let decision = limiter.check_and_increment(ProviderId::Fitbit, user).await;
    match decision {
        RateLimitDecision::Denied { retry_after_secs } => {
            assert!(retry_after_secs > 0);
            assert!(retry_after_secs <= 3600);
        }
        RateLimitDecision::Allowed { .. } => panic!("call 151 should be denied"),
    }
    Ok(())
}

#[tokio::test]
async fn test_cache_failure_fails_open() {
    let limiter = ProviderRateLimiter::new(FailingCache);
    let user = Uuid::new_v4();

    // Every check allows despite the cache being down.
    for _ in 0..5 {
        let decision = limiter.check_and_increment(ProviderId::Whoop, user).await;
        assert_eq!(decision, RateLimitDecision::Allowed { remaining: None });
    }
    assert_eq!(limiter.get_remaining(ProviderId::Whoop, user).await, None);
}

#[tokio::test]
async fn test_per_app_bucket_is_shared_across_users() -> anyhow::Result<()> {
    let cache = InMemoryCache::new(CacheConfig::for_tests()).await?;
    let limiter = ProviderRateLimiter::new(cache);

    let first = limiter
        .check_and_increment(ProviderId::Whoop, Uuid::new_v4())
        .await;
    assert_eq!(
        first,
        RateLimitDecision::Allowed {
            remaining: Some(99)
        }
    );

    // A different user draws from the same application bucket.
    let second = limiter
        .check_and_increment(ProviderId::Whoop, Uuid::new_v4())
        .await;
    assert_eq!(
        second,
        RateLimitDecision::Allowed {
            remaining: Some(98)
        }
    );
    Ok(())
}
