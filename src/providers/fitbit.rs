// ABOUTME: Fitbit data fetchers mapping Web API responses to health record drafts
// ABOUTME: Activity list paginates via opaque next URLs, daily endpoints loop per day
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Fitbit Web API fetchers.
//!
//! Fitbit splits its surface by endpoint style: the activity log paginates
//! with an opaque `pagination.next` URL, sleep and weight take a date range
//! in the path, and nutrition and daily summaries are one request per day.
//! All requests ride the shared client, so quota headers and the 401 retry
//! policy apply uniformly.

use crate::cache::CacheProvider;
use crate::models::{HealthCategory, HealthRecordDraft, ProviderId};
use crate::providers::client::ProviderApiClient;
use crate::providers::errors::ProviderResult;
use crate::providers::{bearer_get, dates_in_range, json_body, parse_event_time};
use chrono::NaiveDate;
use uuid::Uuid;

const BASE_URL: &str = "https://api.fitbit.com";
const PROVIDER: ProviderId = ProviderId::Fitbit;

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
        HealthCategory::Activity => fetch_activities(client, user_id, start).await,
        HealthCategory::Sleep => fetch_sleep(client, user_id, start, end).await,
        HealthCategory::Weight => fetch_weight(client, user_id, start, end).await,
        HealthCategory::Nutrition => fetch_nutrition(client, user_id, start, end).await,
        HealthCategory::DailySummary => fetch_daily_summaries(client, user_id, start, end).await,
        HealthCategory::BloodPressure => Ok(Vec::new()),
    }
}

async fn fetch_activities<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    user_id: Uuid,
    start: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let first_url = format!(
        "{BASE_URL}/1/user/-/activities/list.json?afterDate={}&sort=asc&offset=0&limit=100",
        start.format("%Y-%m-%d")
    );

    let pages = client
        .call_paginated(
            user_id,
            PROVIDER,
            |token, cursor| {
                let url = cursor.unwrap_or_else(|| first_url.clone());
                async move { Ok(bearer_get(&url, &token)) }
            },
            |response| {
                serde_json::from_str::<serde_json::Value>(&response.body)
                    .ok()
                    .and_then(|v| {
                        v.pointer("/pagination/next")
                            .and_then(serde_json::Value::as_str)
                            .filter(|next| !next.is_empty())
                            .map(str::to_owned)
                    })
            },
        )
        .await?;

    let mut drafts = Vec::new();
    for page in pages {
        let body = json_body(PROVIDER, &page)?;
        let Some(activities) = body.get("activities").and_then(serde_json::Value::as_array)
        else {
            continue;
        };
        for activity in activities {
            let Some(log_id) = activity.get("logId").and_then(serde_json::Value::as_i64) else {
                continue;
            };
            let recorded_at = activity
                .get("startTime")
                .and_then(serde_json::Value::as_str)
                .and_then(parse_event_time);
            let Some(recorded_at) = recorded_at else {
                continue;
            };
            drafts.push(HealthRecordDraft {
                category: HealthCategory::Activity,
                natural_key: log_id.to_string(),
                recorded_at,
                payload: activity.clone(),
            });
        }
    }
    Ok(drafts)
}

async fn fetch_sleep<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    user_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let url = format!(
        "{BASE_URL}/1.2/user/-/sleep/date/{}/{}.json",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );
    let response = client
        .call(user_id, PROVIDER, |token| {
            let url = url.clone();
            async move { Ok(bearer_get(&url, &token)) }
        })
        .await?;

    let body = json_body(PROVIDER, &response)?;
    let mut drafts = Vec::new();
    if let Some(sessions) = body.get("sleep").and_then(serde_json::Value::as_array) {
        for session in sessions {
            let Some(log_id) = session.get("logId").and_then(serde_json::Value::as_i64) else {
                continue;
            };
            let Some(recorded_at) = session
                .get("startTime")
                .and_then(serde_json::Value::as_str)
                .and_then(parse_event_time)
            else {
                continue;
            };
            drafts.push(HealthRecordDraft {
                category: HealthCategory::Sleep,
                natural_key: log_id.to_string(),
                recorded_at,
                payload: session.clone(),
            });
        }
    }
    Ok(drafts)
}

async fn fetch_weight<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    user_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let url = format!(
        "{BASE_URL}/1/user/-/body/log/weight/date/{}/{}.json",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );
    let response = client
        .call(user_id, PROVIDER, |token| {
            let url = url.clone();
            async move { Ok(bearer_get(&url, &token)) }
        })
        .await?;

    let body = json_body(PROVIDER, &response)?;
    let mut drafts = Vec::new();
    if let Some(entries) = body.get("weight").and_then(serde_json::Value::as_array) {
        for entry in entries {
            let Some(log_id) = entry.get("logId").and_then(serde_json::Value::as_i64) else {
                continue;
            };
            // Weight logs carry separate date and time fields.
            let recorded_at = match (
                entry.get("date").and_then(serde_json::Value::as_str),
                entry.get("time").and_then(serde_json::Value::as_str),
            ) {
                (Some(date), Some(time)) => parse_event_time(&format!("{date}T{time}")),
                (Some(date), None) => parse_event_time(&format!("{date}T00:00:00")),
                _ => None,
            };
            let Some(recorded_at) = recorded_at else {
                continue;
            };
            drafts.push(HealthRecordDraft {
                category: HealthCategory::Weight,
                natural_key: log_id.to_string(),
                recorded_at,
                payload: entry.clone(),
            });
        }
    }
    Ok(drafts)
}

async fn fetch_nutrition<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    user_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let mut drafts = Vec::new();
    for date in dates_in_range(start, end) {
        let url = format!(
            "{BASE_URL}/1/user/-/foods/log/date/{}.json",
            date.format("%Y-%m-%d")
        );
        let response = client
            .call(user_id, PROVIDER, |token| {
                let url = url.clone();
                async move { Ok(bearer_get(&url, &token)) }
            })
            .await?;

        let body = json_body(PROVIDER, &response)?;
        if let Some(summary) = body.get("summary") {
            if let Some(draft) = daily_draft(HealthCategory::Nutrition, date, summary.clone()) {
                drafts.push(draft);
            }
        }
    }
    Ok(drafts)
}

async fn fetch_daily_summaries<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    user_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let mut drafts = Vec::new();
    for date in dates_in_range(start, end) {
        let url = format!(
            "{BASE_URL}/1/user/-/activities/date/{}.json",
            date.format("%Y-%m-%d")
        );
        let response = client
            .call(user_id, PROVIDER, |token| {
                let url = url.clone();
                async move { Ok(bearer_get(&url, &token)) }
            })
            .await?;

        let body = json_body(PROVIDER, &response)?;
        if let Some(summary) = body.get("summary") {
            if let Some(draft) = daily_draft(HealthCategory::DailySummary, date, summary.clone())
            {
                drafts.push(draft);
            }
        }
    }
    Ok(drafts)
}

fn daily_draft(
    category: HealthCategory,
    date: NaiveDate,
    payload: serde_json::Value,
) -> Option<HealthRecordDraft> {
    let recorded_at = date.and_hms_opt(0, 0, 0)?.and_utc();
    Some(HealthRecordDraft {
        category,
        natural_key: HealthRecordDraft::daily_key(date),
        recorded_at,
        payload,
    })
}
