// ABOUTME: Integration tests for the in-memory cache backend
// ABOUTME: Covers TTL expiry, atomic get-and-delete, decrement and key scans
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;
use vitalsync::cache::{memory::InMemoryCache, CacheConfig, CacheProvider};

async fn test_cache() -> anyhow::Result<InMemoryCache> {
    Ok(InMemoryCache::new(CacheConfig::for_tests()).await?)
}

#[tokio::test]
async fn test_set_get_round_trip() -> anyhow::Result<()> {
    let cache = test_cache().await?;
    cache.set_ex("k1", "v1", Duration::from_secs(60)).await?;
    assert_eq!(cache.get("k1").await?, Some("v1".to_owned()));
    assert_eq!(cache.get("missing").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_expired_entry_is_gone() -> anyhow::Result<()> {
    let cache = test_cache().await?;
    cache.set_ex("k1", "v1", Duration::from_millis(10)).await?;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(cache.get("k1").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_get_del_consumes_exactly_once() -> anyhow::Result<()> {
    let cache = test_cache().await?;
    cache.set_ex("secret", "once", Duration::from_secs(60)).await?;

    assert_eq!(cache.get_del("secret").await?, Some("once".to_owned()));
    assert_eq!(cache.get_del("secret").await?, None);
    assert_eq!(cache.get("secret").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_decr_counts_down_and_creates_missing_keys() -> anyhow::Result<()> {
    let cache = test_cache().await?;
    cache.set_ex("bucket", "3", Duration::from_secs(60)).await?;

    assert_eq!(cache.decr("bucket").await?, 2);
    assert_eq!(cache.decr("bucket").await?, 1);
    assert_eq!(cache.decr("bucket").await?, 0);
    assert_eq!(cache.decr("bucket").await?, -1);

    // Missing keys start at -1, mirroring Redis DECR.
    assert_eq!(cache.decr("fresh").await?, -1);
    Ok(())
}

#[tokio::test]
async fn test_decr_rejects_non_integer_values() -> anyhow::Result<()> {
    let cache = test_cache().await?;
    cache.set_ex("text", "hello", Duration::from_secs(60)).await?;
    assert!(cache.decr("text").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_ttl_reports_remaining_time() -> anyhow::Result<()> {
    let cache = test_cache().await?;
    cache.set_ex("k1", "v1", Duration::from_secs(60)).await?;

    let ttl = cache.ttl("k1").await?.ok_or_else(|| anyhow::anyhow!("ttl missing"))?;
    assert!(ttl <= Duration::from_secs(60));
    assert!(ttl > Duration::from_secs(50));
    assert_eq!(cache.ttl("missing").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_scan_keys_matches_glob_patterns() -> anyhow::Result<()> {
    let cache = test_cache().await?;
    cache.set_ex("rate:fitbit:user:a", "1", Duration::from_secs(60)).await?;
    cache.set_ex("rate:whoop:app", "2", Duration::from_secs(60)).await?;
    cache.set_ex("oauth_state:xyz", "3", Duration::from_secs(60)).await?;

    let mut rate_keys = cache.scan_keys("rate:*").await?;
    rate_keys.sort();
    assert_eq!(rate_keys, vec!["rate:fitbit:user:a", "rate:whoop:app"]);

    let fitbit_keys = cache.scan_keys("rate:fitbit:*").await?;
    assert_eq!(fitbit_keys, vec!["rate:fitbit:user:a"]);

    assert!(cache.scan_keys("sessions:*").await?.is_empty());
    Ok(())
}
