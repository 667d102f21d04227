// ABOUTME: Provider API quota tracking with cache-backed counter buckets
// ABOUTME: Local budget enforcement that fails open when the cache is down
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Outbound rate limiting for provider APIs.
//!
//! Each provider publishes a quota (requests per window, scoped per user or
//! per application). Before any outbound call the client consults its local
//! bucket; an exhausted bucket denies the call without spending network I/O
//! or risking a provider-side ban. Buckets live in the cache so multiple
//! server instances share one budget when Redis backs the cache.
//!
//! The limiter is advisory: a cache failure must never block syncing, so any
//! cache error logs a warning and allows the call (fail open). When a
//! provider returns authoritative quota headers the local bucket is
//! overwritten with the provider's numbers, since the provider may count
//! requests this process never saw.

use crate::cache::CacheProvider;
use crate::models::ProviderId;
use std::time::Duration;
use uuid::Uuid;

/// Scope a quota applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// Each connected user has an independent bucket
    PerUser,
    /// One bucket shared by all users of this deployment
    PerApp,
}

/// One provider's published quota
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub quota: u32,
    /// Window length
    pub window: Duration,
    /// Whether the bucket is per user or per application
    pub scope: LimitScope,
}

impl RateLimitPolicy {
    /// Published quota for a provider
    #[must_use]
    pub const fn for_provider(provider: ProviderId) -> Self {
        match provider {
            ProviderId::Fitbit => Self {
                quota: 150,
                window: Duration::from_secs(3600),
                scope: LimitScope::PerUser,
            },
            ProviderId::Whoop => Self {
                quota: 100,
                window: Duration::from_secs(60),
                scope: LimitScope::PerApp,
            },
            ProviderId::Oura => Self {
                quota: 300,
                window: Duration::from_secs(60),
                scope: LimitScope::PerUser,
            },
            ProviderId::Withings => Self {
                quota: 120,
                window: Duration::from_secs(60),
                scope: LimitScope::PerApp,
            },
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request may proceed
    Allowed {
        /// Requests left in the window after this one, when known
        remaining: Option<u32>,
    },
    /// Bucket exhausted; do not make the call
    Denied {
        /// Seconds until the window resets
        retry_after_secs: u64,
    },
}

impl RateLimitDecision {
    /// True when the request may proceed
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Cache-backed rate limiter shared by all provider clients
#[derive(Clone)]
pub struct ProviderRateLimiter<C: CacheProvider> {
    cache: C,
}

impl<C: CacheProvider> ProviderRateLimiter<C> {
    /// Create a limiter over the given cache backend
    pub const fn new(cache: C) -> Self {
        Self { cache }
    }

    fn bucket_key(provider: ProviderId, user_id: Uuid) -> String {
        match RateLimitPolicy::for_provider(provider).scope {
            LimitScope::PerUser => format!("rate:{provider}:user:{user_id}"),
            LimitScope::PerApp => format!("rate:{provider}:app"),
        }
    }

    /// Consume one request from the bucket, creating it at full quota on
    /// first use within a window. Cache failures allow the request.
    pub async fn check_and_increment(
        &self,
        provider: ProviderId,
        user_id: Uuid,
    ) -> RateLimitDecision {
        let policy = RateLimitPolicy::for_provider(provider);
        let key = Self::bucket_key(provider, user_id);

        let existing = match self.cache.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%provider, error = %e, "rate limit check failed, allowing request");
                return RateLimitDecision::Allowed { remaining: None };
            }
        };

        if existing.is_none() {
            // First request of the window: initialize the bucket with one
            // request already spent.
            let initial = policy.quota.saturating_sub(1);
            if let Err(e) = self
                .cache
                .set_ex(&key, &initial.to_string(), policy.window)
                .await
            {
                tracing::warn!(%provider, error = %e, "rate bucket init failed, allowing request");
                return RateLimitDecision::Allowed { remaining: None };
            }
            return RateLimitDecision::Allowed {
                remaining: Some(initial),
            };
        }

        match self.cache.decr(&key).await {
            Ok(remaining) if remaining >= 0 => RateLimitDecision::Allowed {
                remaining: Some(u32::try_from(remaining).unwrap_or(u32::MAX)),
            },
            Ok(_) => {
                let retry_after_secs = self.reset_seconds(&key, policy.window).await;
                tracing::debug!(
                    %provider,
                    retry_after_secs,
                    "local rate limit exhausted, denying request"
                );
                RateLimitDecision::Denied { retry_after_secs }
            }
            Err(e) => {
                tracing::warn!(%provider, error = %e, "rate limit decrement failed, allowing request");
                RateLimitDecision::Allowed { remaining: None }
            }
        }
    }

    /// Return one request to the bucket. Used when a spent unit never became
    /// an outbound call, such as token resolution failing before the request
    /// was built. Cache failures are ignored; the bucket self-corrects at
    /// the window boundary.
    pub async fn refund(&self, provider: ProviderId, user_id: Uuid) {
        let key = Self::bucket_key(provider, user_id);
        let current = match self.cache.get(&key).await {
            Ok(Some(value)) => value.parse::<i64>().ok(),
            Ok(None) | Err(_) => None,
        };
        let Some(current) = current else { return };
        let Ok(Some(ttl)) = self.cache.ttl(&key).await else {
            return;
        };
        if let Err(e) = self
            .cache
            .set_ex(&key, &(current + 1).to_string(), ttl)
            .await
        {
            tracing::debug!(%provider, error = %e, "rate bucket refund failed");
        }
    }

    /// Overwrite the bucket with authoritative numbers from provider quota
    /// headers. Header state wins over local counting.
    pub async fn update_from_headers(
        &self,
        provider: ProviderId,
        user_id: Uuid,
        remaining: u32,
        reset_secs: u64,
    ) {
        let key = Self::bucket_key(provider, user_id);
        let ttl = Duration::from_secs(reset_secs.max(1));
        if let Err(e) = self
            .cache
            .set_ex(&key, &remaining.to_string(), ttl)
            .await
        {
            tracing::warn!(%provider, error = %e, "failed to apply provider quota headers");
        }
    }

    /// Remaining requests in the current window, `None` when the bucket has
    /// not been created or the cache is unavailable
    pub async fn get_remaining(&self, provider: ProviderId, user_id: Uuid) -> Option<u32> {
        let key = Self::bucket_key(provider, user_id);
        match self.cache.get(&key).await {
            Ok(Some(value)) => value
                .parse::<i64>()
                .ok()
                .map(|v| u32::try_from(v.max(0)).unwrap_or(u32::MAX)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(%provider, error = %e, "rate limit read failed");
                None
            }
        }
    }

    /// Seconds until the current window resets
    pub async fn get_reset_seconds(&self, provider: ProviderId, user_id: Uuid) -> u64 {
        let policy = RateLimitPolicy::for_provider(provider);
        let key = Self::bucket_key(provider, user_id);
        self.reset_seconds(&key, policy.window).await
    }

    async fn reset_seconds(&self, key: &str, window: Duration) -> u64 {
        match self.cache.ttl(key).await {
            Ok(Some(ttl)) => ttl.as_secs().max(1),
            // Bucket absent or cache down: report a full window
            Ok(None) | Err(_) => window.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{memory::InMemoryCache, CacheConfig};
    use anyhow::Result;

    async fn test_limiter() -> Result<ProviderRateLimiter<InMemoryCache>> {
        let cache = InMemoryCache::new(CacheConfig::for_tests()).await?;
        Ok(ProviderRateLimiter::new(cache))
    }

    #[tokio::test]
    async fn test_first_request_initializes_bucket() -> Result<()> {
        let limiter = test_limiter().await?;
        let user = Uuid::new_v4();

        let decision = limiter.check_and_increment(ProviderId::Fitbit, user).await;
        assert_eq!(
            decision,
            RateLimitDecision::Allowed {
                remaining: Some(149)
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_per_user_buckets_are_independent() -> Result<()> {
        let limiter = test_limiter().await?;
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        limiter.check_and_increment(ProviderId::Fitbit, user_a).await;
        let decision = limiter.check_and_increment(ProviderId::Fitbit, user_b).await;
        assert_eq!(
            decision,
            RateLimitDecision::Allowed {
                remaining: Some(149)
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_refund_returns_one_unit() -> Result<()> {
        let limiter = test_limiter().await?;
        let user = Uuid::new_v4();

        limiter.check_and_increment(ProviderId::Fitbit, user).await;
        limiter.refund(ProviderId::Fitbit, user).await;
        assert_eq!(
            limiter.get_remaining(ProviderId::Fitbit, user).await,
            Some(150)
        );

        // Refunding a bucket that was never created is a no-op.
        let other = Uuid::new_v4();
        limiter.refund(ProviderId::Fitbit, other).await;
        assert_eq!(limiter.get_remaining(ProviderId::Fitbit, other).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_header_overwrite_wins_over_local_count() -> Result<()> {
        let limiter = test_limiter().await?;
        let user = Uuid::new_v4();

        limiter.check_and_increment(ProviderId::Fitbit, user).await;
        limiter
            .update_from_headers(ProviderId::Fitbit, user, 3, 120)
            .await;

        assert_eq!(limiter.get_remaining(ProviderId::Fitbit, user).await, Some(3));
        Ok(())
    }
}
