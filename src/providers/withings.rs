// ABOUTME: Withings fetchers with HMAC-SHA256 nonce signing on every request
// ABOUTME: Combined measure groups split through a declarative type-to-category map
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Withings API fetchers.
//!
//! Withings is the odd dialect twice over. Requests are not authenticated by
//! bearer token alone: each carries `client_id`, a server-issued nonce and an
//! HMAC-SHA256 signature over `action,client_id,nonce` keyed by the client
//! secret. And its measure endpoint returns mixed measurement kinds in one
//! group; [`MEASURE_MAP`] declares how each type id maps to a category and
//! field name, so an unmapped type is logged rather than silently dropped.

use crate::cache::CacheProvider;
use crate::config::OAuthClientConfig;
use crate::errors::AppError;
use crate::models::{HealthCategory, HealthRecordDraft, Integration, ProviderId};
use crate::providers::client::ProviderApiClient;
use crate::providers::errors::{ProviderError, ProviderResult};
use crate::providers::transport::{HttpRequest, HttpTransport};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const MEASURE_URL: &str = "https://wbsapi.withings.net/measure";
const SIGNATURE_URL: &str = "https://wbsapi.withings.net/v2/signature";
const NOTIFY_URL: &str = "https://wbsapi.withings.net/notify";
const PROVIDER: ProviderId = ProviderId::Withings;

/// How one Withings measure type id lands in the health data model
pub struct MeasureMapping {
    /// Withings numeric measure type
    pub measure_type: i64,
    /// Category the measurement belongs to
    pub category: HealthCategory,
    /// Field name in the record payload
    pub field: &'static str,
}

/// Declarative measure-type table. Extending Withings coverage means adding
/// a row here, not another branch in the parser.
pub const MEASURE_MAP: &[MeasureMapping] = &[
    MeasureMapping {
        measure_type: 1,
        category: HealthCategory::Weight,
        field: "weight_kg",
    },
    MeasureMapping {
        measure_type: 6,
        category: HealthCategory::Weight,
        field: "fat_ratio_percent",
    },
    MeasureMapping {
        measure_type: 9,
        category: HealthCategory::BloodPressure,
        field: "diastolic_mmhg",
    },
    MeasureMapping {
        measure_type: 10,
        category: HealthCategory::BloodPressure,
        field: "systolic_mmhg",
    },
    MeasureMapping {
        measure_type: 11,
        category: HealthCategory::BloodPressure,
        field: "heart_pulse_bpm",
    },
];

fn mapping_for(measure_type: i64) -> Option<&'static MeasureMapping> {
    MEASURE_MAP.iter().find(|m| m.measure_type == measure_type)
}

fn measure_types_for(category: HealthCategory) -> Vec<i64> {
    MEASURE_MAP
        .iter()
        .filter(|m| m.category == category)
        .map(|m| m.measure_type)
        .collect()
}

/// Signs Withings requests and fetches the nonces they require
pub struct WithingsSigner {
    client_id: String,
    client_secret: String,
    transport: Arc<dyn HttpTransport>,
}

impl WithingsSigner {
    /// Create a signer from the provider's OAuth credentials
    #[must_use]
    pub fn new(creds: &OAuthClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            client_id: creds.client_id.clone(),
            client_secret: creds.client_secret.clone(),
            transport,
        }
    }

    /// HMAC-SHA256 over comma-joined parts, keyed by the client secret
    #[must_use]
    pub fn signature(&self, parts: &[&str]) -> String {
        let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, self.client_secret.as_bytes());
        let tag = ring::hmac::sign(&key, parts.join(",").as_bytes());
        hex::encode(tag.as_ref())
    }

    /// Fetch a single-use nonce from the signature service
    async fn fetch_nonce(&self) -> ProviderResult<String> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.signature(&["getnonce", &self.client_id, &timestamp]);
        let request = HttpRequest::post_form(
            SIGNATURE_URL,
            vec![
                ("action".to_owned(), "getnonce".to_owned()),
                ("client_id".to_owned(), self.client_id.clone()),
                ("timestamp".to_owned(), timestamp),
                ("signature".to_owned(), signature),
            ],
        );

        let response =
            self.transport
                .execute(request)
                .await
                .map_err(|e| ProviderError::Transient {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;

        let body: serde_json::Value = serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::MalformedResponse {
                provider: PROVIDER,
                message: format!("nonce response is not JSON: {e}"),
            }
        })?;

        body.pointer("/body/nonce")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::MalformedResponse {
                provider: PROVIDER,
                message: "nonce response missing body.nonce".into(),
            })
    }

    /// Signed form fields (`action`, `client_id`, `nonce`, `signature`) for
    /// one request. Every nonce is fetched fresh and used once.
    pub async fn signed_fields(&self, action: &str) -> ProviderResult<Vec<(String, String)>> {
        let nonce = self.fetch_nonce().await?;
        let signature = self.signature(&[action, &self.client_id, &nonce]);
        Ok(vec![
            ("action".to_owned(), action.to_owned()),
            ("client_id".to_owned(), self.client_id.clone()),
            ("nonce".to_owned(), nonce),
            ("signature".to_owned(), signature),
        ])
    }
}

/// Fetch one category for a user over an inclusive date range
///
/// # Errors
///
/// Returns a provider error when any underlying request fails
pub async fn fetch_category<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    signer: &WithingsSigner,
    user_id: Uuid,
    category: HealthCategory,
    start: NaiveDate,
    end: NaiveDate,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let meastypes = measure_types_for(category);
    if meastypes.is_empty() {
        return Ok(Vec::new());
    }

    let meastypes = meastypes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let startdate = start
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
        .to_string();
    let enddate = end
        .and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
        .to_string();

    let response = client
        .call(user_id, PROVIDER, |token| {
            let meastypes = meastypes.clone();
            let startdate = startdate.clone();
            let enddate = enddate.clone();
            async move {
                let mut fields = signer.signed_fields("getmeas").await?;
                fields.push(("meastypes".to_owned(), meastypes));
                fields.push(("category".to_owned(), "1".to_owned()));
                fields.push(("startdate".to_owned(), startdate));
                fields.push(("enddate".to_owned(), enddate));
                Ok(HttpRequest::post_form(MEASURE_URL, fields)
                    .with_header("Authorization", format!("Bearer {token}")))
            }
        })
        .await?;

    parse_measure_response(category, &response.body)
}

/// Split measure groups into per-category drafts through the declarative map
fn parse_measure_response(
    wanted: HealthCategory,
    body: &str,
) -> ProviderResult<Vec<HealthRecordDraft>> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse {
            provider: PROVIDER,
            message: format!("measure response is not JSON: {e}"),
        })?;

    let status = value
        .get("status")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(-1);
    if status != 0 {
        return Err(ProviderError::ApiError {
            provider: PROVIDER,
            status_code: 200,
            message: format!("measure endpoint returned status {status}"),
            retryable: false,
        });
    }

    let mut drafts = Vec::new();
    let Some(groups) = value
        .pointer("/body/measuregrps")
        .and_then(serde_json::Value::as_array)
    else {
        return Ok(drafts);
    };

    for group in groups {
        let Some(grpid) = group.get("grpid").and_then(serde_json::Value::as_i64) else {
            tracing::debug!("skipping measure group without grpid");
            continue;
        };
        let Some(recorded_at) = group
            .get("date")
            .and_then(serde_json::Value::as_i64)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        else {
            continue;
        };
        let Some(measures) = group.get("measures").and_then(serde_json::Value::as_array) else {
            continue;
        };

        let mut fields: BTreeMap<&'static str, f64> = BTreeMap::new();
        for measure in measures {
            let (Some(measure_type), Some(raw), Some(unit)) = (
                measure.get("type").and_then(serde_json::Value::as_i64),
                measure.get("value").and_then(serde_json::Value::as_i64),
                measure.get("unit").and_then(serde_json::Value::as_i64),
            ) else {
                continue;
            };
            let Some(mapping) = mapping_for(measure_type) else {
                tracing::debug!(measure_type, "unmapped withings measure type, skipping");
                continue;
            };
            if mapping.category != wanted {
                continue;
            }
            // Withings encodes real values as value * 10^unit.
            #[allow(clippy::cast_precision_loss)]
            let scaled = raw as f64 * 10f64.powi(i32::try_from(unit).unwrap_or(0));
            fields.insert(mapping.field, scaled);
        }

        if fields.is_empty() {
            continue;
        }
        let mut payload = serde_json::Map::new();
        for (field, value) in fields {
            if let Some(number) = serde_json::Number::from_f64(value) {
                payload.insert(field.to_owned(), serde_json::Value::Number(number));
            }
        }
        drafts.push(HealthRecordDraft {
            category: wanted,
            natural_key: grpid.to_string(),
            recorded_at,
            payload: serde_json::Value::Object(payload),
        });
    }
    Ok(drafts)
}

/// Notification classes subscribed at connect time: 1 is body measures,
/// 4 is blood pressure
const NOTIFY_APPLIS: &[i64] = &[1, 4];

/// Renew the notify subscriptions carried on the integration. Withings
/// subscriptions expire and must be re-subscribed periodically, once per
/// notification class.
///
/// # Errors
///
/// Returns a provider error when any subscribe call fails
pub async fn renew_subscription<C: CacheProvider>(
    client: &ProviderApiClient<C>,
    signer: &WithingsSigner,
    integration: &Integration,
    callback_url: &str,
) -> ProviderResult<()> {
    let user_id = integration.user_id;
    for &appli in NOTIFY_APPLIS {
        let response = client
            .call(user_id, PROVIDER, |token| {
                let callback_url = callback_url.to_owned();
                async move {
                    let mut fields = signer.signed_fields("subscribe").await?;
                    fields.push(("callbackurl".to_owned(), callback_url));
                    fields.push(("appli".to_owned(), appli.to_string()));
                    Ok(HttpRequest::post_form(NOTIFY_URL, fields)
                        .with_header("Authorization", format!("Bearer {token}")))
                }
            })
            .await?;

        let status = serde_json::from_str::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|v| v.get("status").and_then(serde_json::Value::as_i64))
            .unwrap_or(-1);
        if status != 0 {
            return Err(ProviderError::Internal(AppError::external_service(
                "withings",
                format!("notify subscribe for appli {appli} returned status {status}"),
            )));
        }
    }
    Ok(())
}
