// ABOUTME: Oura data fetchers over the v2 usercollection endpoints
// ABOUTME: Collections paginate with a next_token cursor shared across endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Oura v2 API fetchers. Workouts, sleep sessions and daily activity all
//! follow the same collection shape: a `data` array plus `next_token`.

use crate::cache::CacheProvider;
use crate::models::{HealthCategory, HealthRecordDraft, ProviderId};
use crate::providers::client::ProviderApiClient;
use crate::providers::errors::ProviderResult;
use crate::providers::{bearer_get, json_body, parse_event_time};
use chrono::NaiveDate;
use uuid::Uuid;

const BASE_URL: &str = "https://api.ouraring.com/v2/usercollection";
const PROVIDER: ProviderId = ProviderId::Oura;

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
            fetch_collection(client, user_id, "workout", category, start, end).await
        }
        HealthCategory::Sleep => {
            fetch_collection(client, user_id, "sleep", category, start, end).await
        }
        HealthCategory::DailySummary => {
            fetch_collection(client, user_id, "daily_activity", category, start, end).await
        }
        HealthCategory::Weight | HealthCategory::BloodPressure | HealthCategory::Nutrition => {
            Ok(Vec::new())
        }
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
    let base = format!(
        "{BASE_URL}/{collection}?start_date={}&end_date={}",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );

    let pages = client
        .call_paginated(
            user_id,
            PROVIDER,
            |token, cursor| {
                let url = cursor.map_or_else(
                    || base.clone(),
                    |next| format!("{base}&next_token={}", urlencoding::encode(&next)),
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
        let Some(items) = body.get("data").and_then(serde_json::Value::as_array) else {
            continue;
        };
        for item in items {
            let Some(draft) = draft_from_item(category, item) else {
                continue;
            };
            drafts.push(draft);
        }
    }
    Ok(drafts)
}

/// Daily activity keys by calendar day; workouts and sleep keep their
/// document id and start timestamp.
fn draft_from_item(category: HealthCategory, item: &serde_json::Value) -> Option<HealthRecordDraft> {
    let day = item.get("day").and_then(serde_json::Value::as_str);

    if category.is_daily_aggregate() {
        let date = NaiveDate::parse_from_str(day?, "%Y-%m-%d").ok()?;
        return Some(HealthRecordDraft {
            category,
            natural_key: HealthRecordDraft::daily_key(date),
            recorded_at: date.and_hms_opt(0, 0, 0)?.and_utc(),
            payload: item.clone(),
        });
    }

    let id = item.get("id").and_then(serde_json::Value::as_str)?.to_owned();
    let recorded_at = item
        .get("start_datetime")
        .or_else(|| item.get("bedtime_start"))
        .and_then(serde_json::Value::as_str)
        .and_then(parse_event_time)
        .or_else(|| {
            day.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })?;

    Some(HealthRecordDraft {
        category,
        natural_key: id,
        recorded_at,
        payload: item.clone(),
    })
}
