// ABOUTME: Integration tests for sync passes: idempotence, webhooks, backfill, isolation
// ABOUTME: Drives the full stack over scripted provider responses
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::Harness;
use std::sync::Arc;
use vitalsync::config::OAuthClientConfig;
use vitalsync::models::{HealthCategory, ProviderId, SyncStatus};
use vitalsync::providers::transport::HttpBody;
use vitalsync::providers::withings::{self, WithingsSigner};
use vitalsync::providers::HealthDataFetcher;
use vitalsync::store::{HealthRecordStore, IntegrationStore};
use vitalsync::sync::{DataUpserter, SyncEngine};
use vitalsync::webhooks::WebhookEvent;

fn engine_over(harness: &Harness) -> SyncEngine<vitalsync::cache::memory::InMemoryCache> {
    let fetcher = HealthDataFetcher::new(harness.client(), None);
    SyncEngine::new(
        harness.store.clone() as Arc<dyn IntegrationStore>,
        DataUpserter::new(harness.store.clone() as Arc<dyn HealthRecordStore>),
        fetcher,
    )
}

fn workout(id: &str, score: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "start": "2025-08-23T07:00:00.000Z",
        "score": score
    })
}

fn workout_page(items: &[serde_json::Value], next: Option<&str>) -> serde_json::Value {
    match next {
        Some(token) => serde_json::json!({"records": items, "next_token": token}),
        None => serde_json::json!({"records": items}),
    }
}

#[tokio::test]
async fn test_periodic_sync_is_idempotent() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Whoop, 7200, "9001")
        .await?;
    let engine = engine_over(&harness);

    // One workout page and one sleep page per pass.
    for _ in 0..2 {
        harness
            .transport
            .push_json(200, &workout_page(&[workout("w1", 10)], None));
        harness.transport.push_json(
            200,
            &serde_json::json!({"records": [{"id": "s1", "start": "2025-08-23T22:00:00.000Z"}]}),
        );
    }

    let first = engine
        .sync_recent(integration.user_id, ProviderId::Whoop)
        .await?;
    assert_eq!(first.records_written, 2);
    assert_eq!(harness.store.record_count().await, 2);

    let second = engine
        .sync_recent(integration.user_id, ProviderId::Whoop)
        .await?;
    assert_eq!(second.records_written, 2);
    // Same batch twice, still exactly one record per natural key.
    assert_eq!(harness.store.record_count().await, 2);

    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Whoop)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert_eq!(stored.sync_status, SyncStatus::Idle);
    assert!(stored.last_synced_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_webhooks_keep_the_later_payload() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Whoop, 7200, "9001")
        .await?;
    let engine = engine_over(&harness);

    let event = WebhookEvent {
        provider: ProviderId::Whoop,
        provider_user_id: "9001".to_owned(),
        category: Some(HealthCategory::Activity),
        date: None,
    };

    harness
        .transport
        .push_json(200, &workout_page(&[workout("w1", 10)], None));
    engine.handle_webhook_event(&event).await;

    harness
        .transport
        .push_json(200, &workout_page(&[workout("w1", 20)], None));
    engine.handle_webhook_event(&event).await;

    assert_eq!(harness.store.record_count().await, 1);
    let stored = harness
        .store
        .get_health_record(
            integration.user_id,
            ProviderId::Whoop,
            HealthCategory::Activity,
            "w1",
        )
        .await?
        .ok_or_else(|| anyhow::anyhow!("record missing"))?;
    assert_eq!(stored.payload["score"], serde_json::json!(20));
    Ok(())
}

#[tokio::test]
async fn test_webhook_for_unknown_provider_user_is_dropped() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    harness
        .seed_integration(ProviderId::Whoop, 7200, "9001")
        .await?;
    let engine = engine_over(&harness);

    let event = WebhookEvent {
        provider: ProviderId::Whoop,
        provider_user_id: "stranger".to_owned(),
        category: Some(HealthCategory::Activity),
        date: None,
    };

    let outcome = engine.handle_webhook_event(&event).await;
    assert!(outcome.is_none());
    assert_eq!(harness.transport.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_backfill_pages_upsert_every_item_once() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Whoop, 7200, "9001")
        .await?;
    let engine = engine_over(&harness);

    // Three workout pages of ten, then an empty sleep page.
    for page in 0..3 {
        let items: Vec<_> = (0..10)
            .map(|i| workout(&format!("w{}", page * 10 + i), 1))
            .collect();
        let next = if page < 2 { Some("more") } else { None };
        harness.transport.push_json(200, &workout_page(&items, next));
    }
    harness
        .transport
        .push_json(200, &serde_json::json!({"records": []}));

    let outcome = engine
        .backfill(integration.user_id, ProviderId::Whoop)
        .await?;
    assert_eq!(outcome.records_written, 30);
    assert_eq!(harness.store.record_count().await, 30);

    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Whoop)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert_eq!(stored.sync_status, SyncStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_category_failure_does_not_block_siblings() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Whoop, 7200, "9001")
        .await?;
    let engine = engine_over(&harness);

    // Workouts fail server-side; sleep still lands.
    harness.transport.push_response(500, "upstream exploded");
    harness.transport.push_json(
        200,
        &serde_json::json!({"records": [{"id": "s1", "start": "2025-08-23T22:00:00.000Z"}]}),
    );

    let outcome = engine
        .sync_recent(integration.user_id, ProviderId::Whoop)
        .await?;
    assert_eq!(outcome.categories_synced, vec![HealthCategory::Sleep]);
    assert_eq!(outcome.records_written, 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].0, HealthCategory::Activity);
    assert_eq!(harness.store.record_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_all_categories_failing_keeps_sync_point_unset() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Whoop, 7200, "9001")
        .await?;
    let engine = engine_over(&harness);

    // Both categories fail server-side.
    harness.transport.push_response(500, "upstream exploded");
    harness.transport.push_response(500, "upstream exploded");

    let outcome = engine
        .sync_recent(integration.user_id, ProviderId::Whoop)
        .await?;
    assert!(outcome.categories_synced.is_empty());
    assert_eq!(outcome.failures.len(), 2);

    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Whoop)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert_eq!(stored.sync_status, SyncStatus::Error);
    // Nothing committed, so the sync point did not advance.
    assert!(stored.last_synced_at.is_none());
    Ok(())
}

#[tokio::test]
async fn test_withings_renewal_covers_each_notification_class() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Withings, 7200, "333")
        .await?;
    let client = harness.client();
    let creds = OAuthClientConfig {
        client_id: "cid-withings".to_owned(),
        client_secret: "secret-withings".to_owned(),
        redirect_uri: "http://localhost:8080/oauth/callback/withings".to_owned(),
        webhook_secret: None,
    };
    let signer = WithingsSigner::new(&creds, harness.transport.clone());

    // One nonce fetch and one subscribe per notification class.
    for _ in 0..2 {
        harness
            .transport
            .push_json(200, &serde_json::json!({"status": 0, "body": {"nonce": "n"}}));
        harness
            .transport
            .push_json(200, &serde_json::json!({"status": 0}));
    }

    withings::renew_subscription(
        &client,
        &signer,
        &integration,
        "https://example.test/webhooks/withings",
    )
    .await?;

    let applis: Vec<String> = harness
        .transport
        .requests()
        .iter()
        .filter_map(|request| match &request.body {
            Some(HttpBody::Form(fields)) => fields
                .iter()
                .find(|(name, _)| name == "appli")
                .map(|(_, value)| value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(applis, vec!["1".to_owned(), "4".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn test_fatal_auth_failure_aborts_and_marks_integration() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    // Token already inside the refresh buffer, so the first call refreshes.
    let integration = harness
        .seed_integration(ProviderId::Whoop, 60, "9001")
        .await?;
    let engine = engine_over(&harness);

    harness
        .transport
        .push_response(400, r#"{"error": "invalid_grant"}"#);

    let result = engine
        .sync_recent(integration.user_id, ProviderId::Whoop)
        .await;
    assert!(result.is_err());

    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Whoop)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert_eq!(stored.sync_status, SyncStatus::Error);
    assert!(stored.sync_error.is_some());
    Ok(())
}
