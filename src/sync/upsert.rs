// ABOUTME: Idempotent health record persistence keyed by natural key
// ABOUTME: Re-ingesting the same batch updates in place, never duplicates
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Record upserting.
//!
//! Providers redeliver the same data freely: overlapping sync windows,
//! repeated webhooks, backfill over already-synced days. The upserter makes
//! all of that safe by writing through the natural key; the later payload
//! wins for a key seen twice.

use crate::errors::AppResult;
use crate::models::{HealthRecord, HealthRecordDraft, ProviderId};
use crate::store::HealthRecordStore;
use std::sync::Arc;
use uuid::Uuid;

/// Counts from one upserted batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Records written for the first time
    pub inserted: usize,
    /// Records that replaced an existing row
    pub updated: usize,
}

impl UpsertStats {
    /// Total records written
    #[must_use]
    pub const fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Writes fetched drafts into the record store
#[derive(Clone)]
pub struct DataUpserter {
    store: Arc<dyn HealthRecordStore>,
}

impl DataUpserter {
    /// Create an upserter over the given store
    #[must_use]
    pub fn new(store: Arc<dyn HealthRecordStore>) -> Self {
        Self { store }
    }

    /// Upsert a batch of drafts for one (user, source). Each record commits
    /// independently; the first store failure aborts the remainder of the
    /// batch but already-written records stay.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered
    pub async fn upsert_batch(
        &self,
        user_id: Uuid,
        source: ProviderId,
        drafts: Vec<HealthRecordDraft>,
    ) -> AppResult<UpsertStats> {
        let mut stats = UpsertStats::default();

        for draft in drafts {
            let existing = self
                .store
                .get_health_record(user_id, source, draft.category, &draft.natural_key)
                .await?;

            let record = HealthRecord {
                user_id,
                source,
                category: draft.category,
                natural_key: draft.natural_key,
                recorded_at: draft.recorded_at,
                payload: draft.payload,
            };
            self.store.upsert_health_record(&record).await?;

            if existing.is_some() {
                stats.updated += 1;
            } else {
                stats.inserted += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthCategory;
    use crate::store::InMemoryStore;
    use anyhow::Result;
    use chrono::Utc;

    fn draft(key: &str, steps: u64) -> HealthRecordDraft {
        HealthRecordDraft {
            category: HealthCategory::Activity,
            natural_key: key.to_owned(),
            recorded_at: Utc::now(),
            payload: serde_json::json!({"steps": steps}),
        }
    }

    #[tokio::test]
    async fn test_same_batch_twice_yields_one_record_set() -> Result<()> {
        let store = Arc::new(InMemoryStore::default());
        let upserter = DataUpserter::new(store.clone());
        let user = Uuid::new_v4();

        let batch = vec![draft("a", 100), draft("b", 200)];
        let first = upserter
            .upsert_batch(user, ProviderId::Fitbit, batch.clone())
            .await?;
        assert_eq!(first.inserted, 2);

        let second = upserter.upsert_batch(user, ProviderId::Fitbit, batch).await?;
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(store.record_count().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_later_payload_wins() -> Result<()> {
        let store = Arc::new(InMemoryStore::default());
        let upserter = DataUpserter::new(store.clone());
        let user = Uuid::new_v4();

        upserter
            .upsert_batch(user, ProviderId::Fitbit, vec![draft("a", 100)])
            .await?;
        upserter
            .upsert_batch(user, ProviderId::Fitbit, vec![draft("a", 150)])
            .await?;

        let stored = store
            .get_health_record(user, ProviderId::Fitbit, HealthCategory::Activity, "a")
            .await?
            .expect("record exists");
        assert_eq!(stored.payload["steps"], serde_json::json!(150));
        Ok(())
    }
}
