// ABOUTME: Provider integration layer organizing transport, client and per-provider fetchers
// ABOUTME: Category fetch dispatch is an exhaustive match over the provider enum
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Provider API integration.
//!
//! The shared [`client::ProviderApiClient`] owns retry, quota and pagination
//! policy; the per-provider modules only know their endpoint grammar and
//! response shapes. [`HealthDataFetcher`] is the single entry point the sync
//! engine calls, dispatching exhaustively over [`ProviderId`].

/// Shared authenticated API client
pub mod client;
/// Provider error taxonomy
pub mod errors;
/// Fitbit Web API fetchers
pub mod fitbit;
/// Oura v2 API fetchers
pub mod oura;
/// HTTP transport seam
pub mod transport;
/// Whoop developer API fetchers
pub mod whoop;
/// Withings API fetchers and request signing
pub mod withings;

use crate::cache::CacheProvider;
use crate::models::{HealthCategory, HealthRecordDraft, Integration, ProviderId};
use chrono::{DateTime, NaiveDate, Utc};
use errors::{ProviderError, ProviderResult};
use transport::{HttpRequest, HttpResponse};
use uuid::Uuid;

/// Hard ceiling on per-day request loops, covering the longest backfill
const MAX_RANGE_DAYS: i64 = 92;

/// Historical window for a provider's first-connect backfill
#[must_use]
pub const fn backfill_days(provider: ProviderId) -> i64 {
    match provider {
        ProviderId::Fitbit | ProviderId::Withings => 90,
        ProviderId::Whoop | ProviderId::Oura => 30,
    }
}

/// Categories a provider can supply
#[must_use]
pub const fn supported_categories(provider: ProviderId) -> &'static [HealthCategory] {
    match provider {
        ProviderId::Fitbit => &[
            HealthCategory::Activity,
            HealthCategory::Sleep,
            HealthCategory::Weight,
            HealthCategory::Nutrition,
            HealthCategory::DailySummary,
        ],
        ProviderId::Whoop => &[HealthCategory::Activity, HealthCategory::Sleep],
        ProviderId::Oura => &[
            HealthCategory::Activity,
            HealthCategory::Sleep,
            HealthCategory::DailySummary,
        ],
        ProviderId::Withings => &[HealthCategory::Weight, HealthCategory::BloodPressure],
    }
}

/// Fetch entry point the sync engine dispatches through
pub struct HealthDataFetcher<C: CacheProvider> {
    client: client::ProviderApiClient<C>,
    withings_signer: Option<withings::WithingsSigner>,
}

impl<C: CacheProvider> HealthDataFetcher<C> {
    /// Create a fetcher. The Withings signer is optional so deployments
    /// without Withings credentials can still serve the other providers.
    #[must_use]
    pub const fn new(
        client: client::ProviderApiClient<C>,
        withings_signer: Option<withings::WithingsSigner>,
    ) -> Self {
        Self {
            client,
            withings_signer,
        }
    }

    /// The shared API client
    #[must_use]
    pub const fn client(&self) -> &client::ProviderApiClient<C> {
        &self.client
    }

    /// Fetch one category for one user over an inclusive date range
    ///
    /// # Errors
    ///
    /// Returns a provider error when any underlying request fails
    pub async fn fetch(
        &self,
        provider: ProviderId,
        user_id: Uuid,
        category: HealthCategory,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ProviderResult<Vec<HealthRecordDraft>> {
        if !supported_categories(provider).contains(&category) {
            return Ok(Vec::new());
        }

        match provider {
            ProviderId::Fitbit => {
                fitbit::fetch_category(&self.client, user_id, category, start, end).await
            }
            ProviderId::Whoop => {
                whoop::fetch_category(&self.client, user_id, category, start, end).await
            }
            ProviderId::Oura => {
                oura::fetch_category(&self.client, user_id, category, start, end).await
            }
            ProviderId::Withings => {
                let signer = self.withings_signer.as_ref().ok_or_else(|| {
                    ProviderError::Internal(crate::errors::AppError::config_missing(
                        "withings oauth credentials",
                    ))
                })?;
                withings::fetch_category(&self.client, signer, user_id, category, start, end)
                    .await
            }
        }
    }

    /// Renew the provider-side webhook subscription for an integration.
    /// Only Withings subscriptions expire; other providers are a no-op.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the renewal call fails
    pub async fn renew_webhook_subscription(
        &self,
        integration: &Integration,
        callback_url: &str,
    ) -> ProviderResult<()> {
        match integration.provider {
            ProviderId::Withings => {
                let signer = self.withings_signer.as_ref().ok_or_else(|| {
                    ProviderError::Internal(crate::errors::AppError::config_missing(
                        "withings oauth credentials",
                    ))
                })?;
                withings::renew_subscription(&self.client, signer, integration, callback_url)
                    .await
            }
            ProviderId::Fitbit | ProviderId::Whoop | ProviderId::Oura => Ok(()),
        }
    }
}

/// GET request with a bearer token
#[must_use]
pub fn bearer_get(url: &str, token: &str) -> HttpRequest {
    HttpRequest::get(url).with_header("Authorization", format!("Bearer {token}"))
}

/// Parse a successful response body as JSON
///
/// # Errors
///
/// Returns [`ProviderError::MalformedResponse`] for unparseable bodies
pub fn json_body(provider: ProviderId, response: &HttpResponse) -> ProviderResult<serde_json::Value> {
    serde_json::from_str(&response.body).map_err(|e| ProviderError::MalformedResponse {
        provider,
        message: format!("response body is not JSON: {e}"),
    })
}

/// Parse a provider event timestamp. Accepts RFC 3339 with offset, or a
/// naive local timestamp which is taken as UTC.
#[must_use]
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Inclusive date range, capped so a bad range cannot loop unbounded
pub fn dates_in_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let days = (end - start).num_days().clamp(0, MAX_RANGE_DAYS);
    (0..=days).filter_map(move |offset| start.checked_add_days(chrono::Days::new(
        u64::try_from(offset).unwrap_or(0),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_time_accepts_both_shapes() {
        assert!(parse_event_time("2025-01-15T07:30:00+02:00").is_some());
        assert!(parse_event_time("2025-01-15T07:30:00.000").is_some());
        assert!(parse_event_time("not a timestamp").is_none());
    }

    #[test]
    fn test_dates_in_range_is_inclusive() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        let dates: Vec<_> = dates_in_range(start, end).collect();
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], start);
        assert_eq!(dates[2], end);
    }

    #[test]
    fn test_unsupported_category_set_is_closed() {
        assert!(supported_categories(ProviderId::Whoop).contains(&HealthCategory::Sleep));
        assert!(!supported_categories(ProviderId::Whoop).contains(&HealthCategory::Weight));
    }
}
