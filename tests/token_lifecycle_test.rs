// ABOUTME: Integration tests for the token lifecycle: refresh, rotation, disconnect
// ABOUTME: Covers the single-use refresh invariant and the single-flight guard
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{token_json, Harness};
use vitalsync::models::{ProviderId, SyncStatus};
use vitalsync::providers::errors::ProviderError;
use vitalsync::providers::transport::HttpBody;
use vitalsync::store::IntegrationStore;

#[tokio::test]
async fn test_token_inside_buffer_triggers_refresh() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    // Expires in 5 minutes, well inside Fitbit's 30 minute buffer.
    let integration = harness
        .seed_integration(ProviderId::Fitbit, 300, "FITBIT-1")
        .await?;

    harness
        .transport
        .push_json(200, &token_json("access-new", "refresh-new", 28_800));

    let token = harness
        .tokens
        .get_access_token(integration.user_id, ProviderId::Fitbit)
        .await?;

    assert_eq!(token, "access-new");
    assert_eq!(harness.transport.request_count(), 1);

    // The exchange sent the old refresh token with Basic-header credentials.
    let request = &harness.transport.requests()[0];
    let authorization = request
        .headers
        .iter()
        .find(|(name, _)| name == "Authorization")
        .map(|(_, value)| value.clone());
    assert!(authorization.is_some_and(|v| v.starts_with("Basic ")));
    match &request.body {
        Some(HttpBody::Form(fields)) => {
            assert!(fields.contains(&("grant_type".to_owned(), "refresh_token".to_owned())));
            assert!(fields.contains(&("refresh_token".to_owned(), "refresh-old".to_owned())));
            assert!(
                !fields.iter().any(|(name, _)| name == "client_secret"),
                "basic-header providers must not also send body credentials"
            );
        }
        other => panic!("expected form body, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_rotated_refresh_token_is_persisted_before_return() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Fitbit, 60, "FITBIT-1")
        .await?;

    harness
        .transport
        .push_json(200, &token_json("access-new", "refresh-new", 28_800));

    let refreshed = harness
        .tokens
        .refresh_access_token(integration.user_id, ProviderId::Fitbit)
        .await?
        .ok_or_else(|| anyhow::anyhow!("refresh did not complete"))?;
    assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-new"));

    // The store already holds the rotation; the old token is gone for good.
    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Fitbit)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-new"));

    // A fresh token means no further refresh traffic.
    let token = harness
        .tokens
        .get_access_token(integration.user_id, ProviderId::Fitbit)
        .await?;
    assert_eq!(token, "access-new");
    assert_eq!(harness.transport.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_grant_is_fatal_and_marks_integration() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Fitbit, 60, "FITBIT-1")
        .await?;

    harness
        .transport
        .push_response(400, r#"{"errors":[{"errorType":"invalid_grant"}]}"#);

    let result = harness
        .tokens
        .refresh_access_token(integration.user_id, ProviderId::Fitbit)
        .await;
    assert!(matches!(
        result,
        Err(ProviderError::ReconnectRequired { .. })
    ));

    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Fitbit)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert_eq!(stored.sync_status, SyncStatus::Error);
    assert!(stored
        .sync_error
        .is_some_and(|msg| msg.contains("reconnect")));
    Ok(())
}

#[tokio::test]
async fn test_transient_refresh_failure_mutates_nothing() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Fitbit, 60, "FITBIT-1")
        .await?;

    harness.transport.push_transport_error("connection reset");

    let result = harness
        .tokens
        .refresh_access_token(integration.user_id, ProviderId::Fitbit)
        .await?;
    assert!(result.is_none());

    // Stored tokens are untouched; the next pass retries with them.
    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Fitbit)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-old"));
    assert_eq!(stored.sync_status, SyncStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_refreshes_make_one_exchange() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Fitbit, 60, "FITBIT-1")
        .await?;

    // Exactly one scripted response: a second exchange would fail loudly.
    harness
        .transport
        .push_json(200, &token_json("access-new", "refresh-new", 28_800));

    let (first, second) = tokio::join!(
        harness
            .tokens
            .get_access_token(integration.user_id, ProviderId::Fitbit),
        harness
            .tokens
            .get_access_token(integration.user_id, ProviderId::Fitbit),
    );

    assert_eq!(first?, "access-new");
    assert_eq!(second?, "access-new");
    assert_eq!(harness.transport.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_survives_revoke_timeout() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let integration = harness
        .seed_integration(ProviderId::Fitbit, 3600, "FITBIT-1")
        .await?;

    harness.transport.push_transport_error("timed out");

    harness
        .tokens
        .disconnect(integration.user_id, ProviderId::Fitbit)
        .await?;

    let stored = harness
        .store
        .get_integration(integration.user_id, ProviderId::Fitbit)
        .await?
        .ok_or_else(|| anyhow::anyhow!("integration missing"))?;
    assert!(!stored.is_active);
    assert!(stored.access_token.is_none());
    assert!(stored.refresh_token.is_none());

    // Disconnecting again is a no-op, no further revoke traffic.
    harness
        .tokens
        .disconnect(integration.user_id, ProviderId::Fitbit)
        .await?;
    assert_eq!(harness.transport.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_disconnected_pair_reports_not_connected() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let user_id = uuid::Uuid::new_v4();

    let result = harness
        .tokens
        .get_access_token(user_id, ProviderId::Oura)
        .await;
    assert!(matches!(result, Err(ProviderError::NotConnected { .. })));

    let status = harness
        .tokens
        .connection_status(user_id, ProviderId::Oura)
        .await?;
    assert!(!status.connected);
    assert!(status.sync_status.is_none());
    Ok(())
}
