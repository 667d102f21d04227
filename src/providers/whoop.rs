// ABOUTME: Whoop data fetchers for workout and sleep collections
// ABOUTME: Collections paginate with a nextToken cursor in the response body
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Whoop developer API fetchers. Whoop exposes workouts and sleep as
//! time-windowed collections with `nextToken` continuation.

use crate::cache::CacheProvider;
use crate::models::{HealthCategory, HealthRecordDraft, ProviderId};
use crate::providers::client::ProviderApiClient;
use crate::providers::errors::ProviderResult;
use crate::providers::{bearer_get, json_body, parse_event_time};
use chrono::NaiveDate;
use uuid::Uuid;

const BASE_URL: &str = "https://api.prod.whoop.com/developer";
const PROVIDER: ProviderId = ProviderId::Whoop;

/// Fetch one category for a user over an inclusive date range
///
/// # Errors
///
/// Returns a provider error when any underlying request fails
pub async fn fetch_category<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    user_id: Uuid,
    category: HealthCategory,
    start: NaiveDate,
    end: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    match category {
        HealthCategory::Activity => {
            fetch_collection(client, user_id, "workout", HealthCategory::Activity, start, end)
                .await
        }
        HealthCategory::Sleep => {
            fetch_collection(client, user_id, "sleep", HealthCategory::Sleep, start, end).await
        }
        HealthCategory::Weight
        | HealthCategory::BloodPressure
        | HealthCategory::Nutrition
        | HealthCategory::DailySummary => Ok(Vec::new()),
    }
}

async fn fetch_collection<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    user_id: Uuid,
    collection: &str,
    category: HealthCategory,
    start: NaiveDate,
    end: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let window_start = format!("{}T00:00:00.000Z", start.format("%Y-%m-%d"));
    let window_end = format!("{}T23:59:59.999Z", end.format("%Y-%m-%d"));
    let base = format!(
        "{BASE_URL}/v1/activity/{collection}?start={window_start}&end={window_end}&limit=25"
    );

    let pages = client
        .call_paginated(
            user_id,
            PROVIDER,
            |token, cursor| {
                let url = cursor.map_or_else(
                    || base.clone(),
                    |next| format!("{base}&nextToken={}", urlencoding::encode(&next)),
                );
                async move { Ok(bearer_get(&url, &token)) }
            },
            |response| {
                serde_json::from_str::<serde_json::Value>(&response.body)
                    .ok()
                    .and_then(|v| {
                        v.get("next_token")
                            .and_then(serde_json::Value::as_str)
                            .filter(|t| !t.is_empty())
                            .map(str::to_owned)
                    })
            },
        )
        .await?;

    let mut drafts = Vec::new();
    for page in pages {
        let body = json_body(PROVIDER, &page)?;
        let Some(records) = body.get("records").and_then(serde_json::Value::as_array) else {
            continue;
        };
        for record in records {
            let id = record.get("id").and_then(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .or_else(|| v.as_i64().map(|n| n.to_string()))
            });
            let Some(id) = id else { continue };
            let Some(recorded_at) = record
                .get("start")
                .and_then(serde_json::Value::as_str)
                .and_then(parse_event_time)
            else {
                continue;
            };
            drafts.push(HealthRecordDraft {
                category,
                natural_key: id,
                recorded_at,
                payload: record.clone(),
            });
        }
    }
    Ok(drafts)
}
