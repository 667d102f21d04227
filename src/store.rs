// ABOUTME: Abstract persistence traits for integrations and health records
// ABOUTME: Ships an in-memory reference backend used by tests and single-node runs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Abstract persistence consumed by the token lifecycle and sync engine.
//!
//! The persistence schema itself is an external collaborator; these traits
//! describe exactly the operations the engine needs. Production deployments
//! plug in a database-backed implementation; the bundled [`InMemoryStore`]
//! backs tests and single-node runs.

use crate::errors::{AppError, AppResult};
use crate::models::{HealthCategory, HealthRecord, Integration, ProviderId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence of one credential record per (user, provider)
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Fetch the integration for a (user, provider) pair
    async fn get_integration(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> AppResult<Option<Integration>>;

    /// Insert or update the integration row, keyed by (user, provider)
    async fn upsert_integration(&self, integration: &Integration) -> AppResult<()>;

    /// Resolve an integration by the provider-side user id stored in its
    /// metadata. Webhook handling must use this, never a caller-supplied id.
    async fn find_by_provider_user_id(
        &self,
        provider: ProviderId,
        provider_user_id: &str,
    ) -> AppResult<Option<Integration>>;

    /// All active integrations across providers
    async fn list_active(&self) -> AppResult<Vec<Integration>>;
}

/// Idempotent persistence of health records keyed by natural key
#[async_trait]
pub trait HealthRecordStore: Send + Sync {
    /// Insert or update a record, keyed by (user, source, category, natural key)
    async fn upsert_health_record(&self, record: &HealthRecord) -> AppResult<()>;

    /// Fetch a single record by its natural key
    async fn get_health_record(
        &self,
        user_id: Uuid,
        source: ProviderId,
        category: HealthCategory,
        natural_key: &str,
    ) -> AppResult<Option<HealthRecord>>;

    /// All records for a (user, category) pair, in unspecified order
    async fn list_health_records(
        &self,
        user_id: Uuid,
        category: HealthCategory,
    ) -> AppResult<Vec<HealthRecord>>;
}

type IntegrationKey = (Uuid, ProviderId);
type RecordKey = (Uuid, ProviderId, HealthCategory, String);

/// In-memory store backing tests and single-node deployments
#[derive(Default)]
pub struct InMemoryStore {
    integrations: RwLock<HashMap<IntegrationKey, Integration>>,
    records: RwLock<HashMap<RecordKey, HealthRecord>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored health records (test helper)
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl IntegrationStore for InMemoryStore {
    async fn get_integration(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> AppResult<Option<Integration>> {
        Ok(self
            .integrations
            .read()
            .await
            .get(&(user_id, provider))
            .cloned())
    }

    async fn upsert_integration(&self, integration: &Integration) -> AppResult<()> {
        self.integrations.write().await.insert(
            (integration.user_id, integration.provider),
            integration.clone(),
        );
        Ok(())
    }

    async fn find_by_provider_user_id(
        &self,
        provider: ProviderId,
        provider_user_id: &str,
    ) -> AppResult<Option<Integration>> {
        let integrations = self.integrations.read().await;
        Ok(integrations
            .values()
            .find(|i| {
                i.provider == provider
                    && i.is_active
                    && i.provider_user_id() == Some(provider_user_id)
            })
            .cloned())
    }

    async fn list_active(&self) -> AppResult<Vec<Integration>> {
        let integrations = self.integrations.read().await;
        Ok(integrations
            .values()
            .filter(|i| i.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HealthRecordStore for InMemoryStore {
    async fn upsert_health_record(&self, record: &HealthRecord) -> AppResult<()> {
        if record.natural_key.is_empty() {
            return Err(AppError::invalid_input(
                "health record natural key must not be empty",
            ));
        }
        let key = (
            record.user_id,
            record.source,
            record.category,
            record.natural_key.clone(),
        );
        self.records.write().await.insert(key, record.clone());
        Ok(())
    }

    async fn get_health_record(
        &self,
        user_id: Uuid,
        source: ProviderId,
        category: HealthCategory,
        natural_key: &str,
    ) -> AppResult<Option<HealthRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(user_id, source, category, natural_key.to_owned()))
            .cloned())
    }

    async fn list_health_records(
        &self,
        user_id: Uuid,
        category: HealthCategory,
    ) -> AppResult<Vec<HealthRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.user_id == user_id && r.category == category)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_record(user_id: Uuid, natural_key: &str) -> HealthRecord {
        HealthRecord {
            user_id,
            source: ProviderId::Fitbit,
            category: HealthCategory::Activity,
            natural_key: natural_key.to_owned(),
            recorded_at: Utc::now(),
            payload: serde_json::json!({"steps": 1200}),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();
        let record = sample_record(user_id, "act-1");

        store.upsert_health_record(&record).await?;
        store.upsert_health_record(&record).await?;

        assert_eq!(store.record_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_find_by_provider_user_id_skips_inactive() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let mut integration = Integration::new(Uuid::new_v4(), ProviderId::Whoop);
        integration.set_metadata(
            Integration::META_PROVIDER_USER_ID,
            serde_json::json!("whoop-77"),
        );
        store.upsert_integration(&integration).await?;

        let found = store
            .find_by_provider_user_id(ProviderId::Whoop, "whoop-77")
            .await?;
        assert!(found.is_some());

        integration.is_active = false;
        store.upsert_integration(&integration).await?;
        let found = store
            .find_by_provider_user_id(ProviderId::Whoop, "whoop-77")
            .await?;
        assert!(found.is_none());
        Ok(())
    }
}
