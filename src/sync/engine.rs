// ABOUTME: Sync engine running periodic, webhook-triggered and backfill passes
// ABOUTME: Categories commit independently so one failure cannot block siblings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Sync orchestration.
//!
//! Three triggers share one engine. Periodic passes cover today and
//! yesterday for every active integration. Webhook passes resolve the user
//! strictly through the provider-side id in the notification and touch only
//! the named category and day. Backfill runs once per connection over the
//! provider's historical window, holding `sync_status = Syncing` while it
//! works.
//!
//! Within a pass each category is its own unit: it fetches, upserts and
//! records its outcome independently, so one category failing leaves the
//! others' writes committed. Only a fatal auth failure aborts the pass,
//! since every remaining category would fail the same way.

use crate::cache::CacheProvider;
use crate::models::{HealthCategory, Integration, ProviderId, SyncStatus};
use crate::providers::errors::ProviderError;
use crate::providers::{backfill_days, supported_categories, HealthDataFetcher};
use crate::store::IntegrationStore;
use crate::sync::upsert::DataUpserter;
use crate::webhooks::WebhookEvent;
use chrono::{Days, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Result of one sync pass
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Provider synced
    pub provider: ProviderId,
    /// User synced
    pub user_id: Uuid,
    /// Categories that completed
    pub categories_synced: Vec<HealthCategory>,
    /// Records written across all categories
    pub records_written: usize,
    /// Per-category failures that did not abort the pass
    pub failures: Vec<(HealthCategory, String)>,
}

impl SyncOutcome {
    fn new(user_id: Uuid, provider: ProviderId) -> Self {
        Self {
            provider,
            user_id,
            categories_synced: Vec::new(),
            records_written: 0,
            failures: Vec::new(),
        }
    }
}

/// Orchestrates fetch-and-upsert passes across triggers
pub struct SyncEngine<C: CacheProvider> {
    integrations: Arc<dyn IntegrationStore>,
    upserter: DataUpserter,
    fetcher: HealthDataFetcher<C>,
}

impl<C: CacheProvider> SyncEngine<C> {
    /// Create an engine over the integration store, upserter and fetcher
    #[must_use]
    pub const fn new(
        integrations: Arc<dyn IntegrationStore>,
        upserter: DataUpserter,
        fetcher: HealthDataFetcher<C>,
    ) -> Self {
        Self {
            integrations,
            upserter,
            fetcher,
        }
    }

    /// Periodic pass for one pair: today and yesterday, every supported
    /// category.
    ///
    /// # Errors
    ///
    /// Returns an error when the integration is missing or the pass fails
    /// fatally
    pub async fn sync_recent(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> Result<SyncOutcome, ProviderError> {
        let today = Utc::now().date_naive();
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        self.sync_window(user_id, provider, supported_categories(provider), yesterday, today)
            .await
    }

    /// Run the periodic pass over every active integration. Per-unit
    /// failures are logged and never stop the pass or reach the scheduler.
    pub async fn sync_all_periodic(&self) {
        let integrations = match self.integrations.list_active().await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(error = %e, "periodic sync could not list integrations");
                return;
            }
        };

        for integration in integrations {
            // A backfill in flight owns this integration.
            if integration.sync_status == SyncStatus::Syncing {
                continue;
            }
            let user_id = integration.user_id;
            let provider = integration.provider;
            match self.sync_recent(user_id, provider).await {
                Ok(outcome) => {
                    tracing::debug!(
                        %provider,
                        %user_id,
                        records = outcome.records_written,
                        "periodic sync completed"
                    );
                }
                Err(e) => {
                    tracing::warn!(%provider, %user_id, error = %e, "periodic sync failed");
                }
            }
        }
    }

    /// Webhook-triggered pass. Resolves the integration through the
    /// provider-side user id only; unknown or inactive users are dropped
    /// silently so the endpoint still acknowledges.
    pub async fn handle_webhook_event(&self, event: &WebhookEvent) -> Option<SyncOutcome> {
        let integration = match self
            .integrations
            .find_by_provider_user_id(event.provider, &event.provider_user_id)
            .await
        {
            Ok(Some(integration)) => integration,
            Ok(None) => {
                tracing::debug!(
                    provider = %event.provider,
                    "webhook for unknown provider user id, dropping"
                );
                return None;
            }
            Err(e) => {
                tracing::error!(provider = %event.provider, error = %e, "webhook resolution failed");
                return None;
            }
        };

        let user_id = integration.user_id;
        let date = event.date.unwrap_or_else(|| Utc::now().date_naive());
        let categories: &[HealthCategory] = match &event.category {
            Some(category) => std::slice::from_ref(category),
            None => supported_categories(event.provider),
        };

        match self
            .sync_window(user_id, event.provider, categories, date, date)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    provider = %event.provider,
                    %user_id,
                    error = %e,
                    "webhook-triggered sync failed"
                );
                None
            }
        }
    }

    /// One-shot historical pull on first connect. Marks the integration
    /// `Syncing` for the duration, `Idle` on success, `Error` with a
    /// message on unrecoverable failure.
    ///
    /// # Errors
    ///
    /// Returns an error when the integration is missing or the pull fails
    /// fatally
    pub async fn backfill(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> Result<SyncOutcome, ProviderError> {
        let mut integration = self.require_active(user_id, provider).await?;
        integration.sync_status = SyncStatus::Syncing;
        integration.sync_error = None;
        self.integrations.upsert_integration(&integration).await?;

        let today = Utc::now().date_naive();
        let start = today
            .checked_sub_days(Days::new(u64::try_from(backfill_days(provider)).unwrap_or(30)))
            .unwrap_or(today);

        tracing::info!(%provider, %user_id, %start, "backfill started");
        let result = self
            .run_categories(user_id, provider, supported_categories(provider), start, today)
            .await;

        match result {
            Ok(outcome) => {
                self.finish_pass(integration, &outcome).await;
                tracing::info!(
                    %provider,
                    %user_id,
                    records = outcome.records_written,
                    "backfill completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                if !e.is_fatal_auth() {
                    // Fatal auth already recorded its own state.
                    integration.sync_status = SyncStatus::Error;
                    integration.sync_error = Some(e.to_string());
                    if let Err(store_err) =
                        self.integrations.upsert_integration(&integration).await
                    {
                        tracing::error!(%provider, error = %store_err, "failed to record backfill failure");
                    }
                }
                Err(e)
            }
        }
    }

    async fn sync_window(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        categories: &[HealthCategory],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SyncOutcome, ProviderError> {
        let integration = self.require_active(user_id, provider).await?;
        let outcome = self
            .run_categories(user_id, provider, categories, start, end)
            .await?;
        self.finish_pass(integration, &outcome).await;
        Ok(outcome)
    }

    /// Fetch and upsert each category as an independent unit. Fatal auth
    /// failures abort; everything else is recorded and the pass continues.
    async fn run_categories(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        categories: &[HealthCategory],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SyncOutcome, ProviderError> {
        let mut outcome = SyncOutcome::new(user_id, provider);

        for &category in categories {
            match self.fetcher.fetch(provider, user_id, category, start, end).await {
                Ok(drafts) => {
                    match self.upserter.upsert_batch(user_id, provider, drafts).await {
                        Ok(stats) => {
                            outcome.records_written += stats.written();
                            outcome.categories_synced.push(category);
                        }
                        Err(e) => {
                            tracing::warn!(%provider, %category, error = %e, "category upsert failed");
                            outcome.failures.push((category, e.to_string()));
                        }
                    }
                }
                Err(e) if e.is_fatal_auth() => {
                    self.mark_auth_error(user_id, provider, &e).await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(%provider, %category, error = %e, "category fetch failed");
                    outcome.failures.push((category, e.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    /// Renew provider-side webhook subscriptions that are expiring within
    /// the given horizon. Failures are logged per integration and never
    /// abort the pass.
    pub async fn renew_webhook_subscriptions(&self, callback_url: &str, horizon_hours: i64) {
        let integrations = match self.integrations.list_active().await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(error = %e, "subscription renewal could not list integrations");
                return;
            }
        };

        let cutoff = Utc::now() + chrono::Duration::hours(horizon_hours);
        for mut integration in integrations {
            let expires_at = integration
                .metadata(Integration::META_WEBHOOK_EXPIRES_AT)
                .and_then(serde_json::Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            // Integrations without an expiring subscription are skipped.
            let Some(expires_at) = expires_at else { continue };
            if expires_at > cutoff {
                continue;
            }

            let provider = integration.provider;
            let user_id = integration.user_id;
            match self
                .fetcher
                .renew_webhook_subscription(&integration, callback_url)
                .await
            {
                Ok(()) => {
                    let renewed_until = Utc::now() + chrono::Duration::days(30);
                    integration.set_metadata(
                        Integration::META_WEBHOOK_EXPIRES_AT,
                        serde_json::json!(renewed_until.to_rfc3339()),
                    );
                    if let Err(e) = self.integrations.upsert_integration(&integration).await {
                        tracing::error!(%provider, error = %e, "failed to record subscription renewal");
                    }
                    tracing::info!(%provider, %user_id, "webhook subscription renewed");
                }
                Err(e) => {
                    tracing::warn!(%provider, %user_id, error = %e, "webhook subscription renewal failed");
                }
            }
        }
    }

    async fn require_active(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> Result<Integration, ProviderError> {
        self.integrations
            .get_integration(user_id, provider)
            .await?
            .filter(|i| i.is_active)
            .ok_or(ProviderError::NotConnected { provider })
    }

    async fn finish_pass(&self, mut integration: Integration, outcome: &SyncOutcome) {
        if outcome.categories_synced.is_empty() && !outcome.failures.is_empty() {
            // Nothing committed: the sync point must not advance.
            integration.sync_status = SyncStatus::Error;
            integration.sync_error = outcome.failures.first().map(|(_, msg)| msg.clone());
        } else {
            integration.last_synced_at = Some(Utc::now());
            integration.sync_status = SyncStatus::Idle;
            integration.sync_error = None;
        }
        if let Err(e) = self.integrations.upsert_integration(&integration).await {
            tracing::error!(
                provider = %integration.provider,
                error = %e,
                "failed to record sync outcome"
            );
        }
    }

    async fn mark_auth_error(&self, user_id: Uuid, provider: ProviderId, error: &ProviderError) {
        let Ok(Some(mut integration)) =
            self.integrations.get_integration(user_id, provider).await
        else {
            return;
        };
        integration.sync_status = SyncStatus::Error;
        integration.sync_error = Some(format!("reconnect required: {error}"));
        if let Err(e) = self.integrations.upsert_integration(&integration).await {
            tracing::error!(%provider, error = %e, "failed to record auth error");
        }
    }
}
