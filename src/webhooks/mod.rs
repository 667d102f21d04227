// ABOUTME: Webhook payload parsing and HMAC signature validation per provider
// ABOUTME: Parsing never fails outward so endpoints can always acknowledge
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Inbound webhook handling.
//!
//! Providers disable delivery after repeated non-success responses, so the
//! endpoint must acknowledge everything it receives. Parsing here reflects
//! that: a malformed body or item yields fewer events, never an error. The
//! HTTP layer's only jobs are signature validation, parsing and enqueueing;
//! resolution to a user happens strictly through the provider-side user id
//! carried in the notification.

use crate::models::{HealthCategory, ProviderId};
use chrono::NaiveDate;
use ring::hmac;
use subtle::ConstantTimeEq;

/// One normalized notification extracted from a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Provider that sent the notification
    pub provider: ProviderId,
    /// Provider-side user id; the only accepted resolution key
    pub provider_user_id: String,
    /// Category the notification names, when it names one
    pub category: Option<HealthCategory>,
    /// Day the notification names, when it names one
    pub date: Option<NaiveDate>,
}

/// Outcome of webhook signature validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureValidation {
    /// Signature present and correct
    Valid,
    /// Signature missing or wrong; drop the delivery (still acknowledged)
    Invalid,
    /// No secret configured for this provider; validation skipped
    NotConfigured,
}

/// Validates webhook delivery signatures with a per-provider shared secret
pub struct WebhookSignatureValidator {
    secret: Option<String>,
}

impl WebhookSignatureValidator {
    /// Create a validator; `None` disables validation for the provider
    #[must_use]
    pub const fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Validate an HMAC-SHA256 hex signature over the raw request body.
    /// Comparison is constant-time.
    #[must_use]
    pub fn validate(&self, raw_body: &[u8], signature_hex: Option<&str>) -> SignatureValidation {
        let Some(secret) = &self.secret else {
            return SignatureValidation::NotConfigured;
        };
        let Some(signature_hex) = signature_hex else {
            return SignatureValidation::Invalid;
        };
        let Ok(provided) = hex::decode(signature_hex.trim()) else {
            return SignatureValidation::Invalid;
        };

        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let expected = hmac::sign(&key, raw_body);

        if expected.as_ref().ct_eq(&provided).into() {
            SignatureValidation::Valid
        } else {
            SignatureValidation::Invalid
        }
    }
}

/// Parse a raw webhook delivery into normalized events. Malformed input
/// yields an empty or partial list; per-item failures are logged and
/// skipped so the endpoint can still acknowledge.
#[must_use]
pub fn parse_notifications(provider: ProviderId, raw_body: &str) -> Vec<WebhookEvent> {
    match provider {
        ProviderId::Fitbit => parse_fitbit(raw_body),
        ProviderId::Whoop => parse_whoop(raw_body),
        ProviderId::Oura => parse_oura(raw_body),
        ProviderId::Withings => parse_withings(raw_body),
    }
}

/// Fitbit delivers a JSON array of notifications, each naming a collection
/// type, owner and date.
fn parse_fitbit(raw_body: &str) -> Vec<WebhookEvent> {
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str(raw_body) else {
        tracing::warn!(provider = %ProviderId::Fitbit, "webhook body is not a JSON array, dropping");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let owner_id = item.get("ownerId").and_then(serde_json::Value::as_str)?;
            let category = item
                .get("collectionType")
                .and_then(serde_json::Value::as_str)
                .and_then(fitbit_collection_category);
            let date = item
                .get("date")
                .and_then(serde_json::Value::as_str)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            Some(WebhookEvent {
                provider: ProviderId::Fitbit,
                provider_user_id: owner_id.to_owned(),
                category,
                date,
            })
        })
        .collect()
}

fn fitbit_collection_category(collection: &str) -> Option<HealthCategory> {
    match collection {
        "activities" => Some(HealthCategory::Activity),
        "sleep" => Some(HealthCategory::Sleep),
        "body" => Some(HealthCategory::Weight),
        "foods" => Some(HealthCategory::Nutrition),
        other => {
            tracing::debug!(collection = other, "unmapped fitbit collection type");
            None
        }
    }
}

/// Whoop delivers a single JSON object per event with a dotted type name.
fn parse_whoop(raw_body: &str) -> Vec<WebhookEvent> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw_body) else {
        tracing::warn!(provider = %ProviderId::Whoop, "webhook body is not JSON, dropping");
        return Vec::new();
    };

    let Some(user_id) = value.get("user_id").and_then(|v| {
        v.as_str()
            .map(str::to_owned)
            .or_else(|| v.as_i64().map(|n| n.to_string()))
    }) else {
        return Vec::new();
    };

    let category = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .and_then(|t| match t.split('.').next() {
            Some("workout") => Some(HealthCategory::Activity),
            Some("sleep") => Some(HealthCategory::Sleep),
            _ => None,
        });

    vec![WebhookEvent {
        provider: ProviderId::Whoop,
        provider_user_id: user_id,
        category,
        date: None,
    }]
}

/// Oura delivers a single JSON object naming a data type and user.
fn parse_oura(raw_body: &str) -> Vec<WebhookEvent> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw_body) else {
        tracing::warn!(provider = %ProviderId::Oura, "webhook body is not JSON, dropping");
        return Vec::new();
    };

    let Some(user_id) = value.get("user_id").and_then(serde_json::Value::as_str) else {
        return Vec::new();
    };

    let category = value
        .get("data_type")
        .and_then(serde_json::Value::as_str)
        .and_then(|t| match t {
            "workout" => Some(HealthCategory::Activity),
            "sleep" => Some(HealthCategory::Sleep),
            "daily_activity" => Some(HealthCategory::DailySummary),
            _ => None,
        });

    vec![WebhookEvent {
        provider: ProviderId::Oura,
        provider_user_id: user_id.to_owned(),
        category,
        date: None,
    }]
}

/// Withings delivers form-encoded fields; `appli` selects the data class.
fn parse_withings(raw_body: &str) -> Vec<WebhookEvent> {
    let fields: Vec<(String, String)> = url::form_urlencoded::parse(raw_body.as_bytes())
        .into_owned()
        .collect();

    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let Some(user_id) = field("userid").filter(|v| !v.is_empty()) else {
        tracing::warn!(provider = %ProviderId::Withings, "webhook body missing userid, dropping");
        return Vec::new();
    };

    let category = field("appli")
        .and_then(|a| a.parse::<i64>().ok())
        .and_then(withings_appli_category);
    let date = field("startdate")
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.date_naive());

    vec![WebhookEvent {
        provider: ProviderId::Withings,
        provider_user_id: user_id,
        category,
        date,
    }]
}

fn withings_appli_category(appli: i64) -> Option<HealthCategory> {
    match appli {
        1 => Some(HealthCategory::Weight),
        4 => Some(HealthCategory::BloodPressure),
        other => {
            tracing::debug!(appli = other, "unmapped withings notification class");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fitbit_array_parses_per_item() {
        let body = r#"[
            {"collectionType": "activities", "ownerId": "USER1", "date": "2025-04-01"},
            {"collectionType": "sleep", "ownerId": "USER2", "date": "2025-04-02"},
            {"collectionType": "activities"}
        ]"#;
        let events = parse_notifications(ProviderId::Fitbit, body);
        // The item without an ownerId is dropped; the rest survive.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].provider_user_id, "USER1");
        assert_eq!(events[0].category, Some(HealthCategory::Activity));
        assert_eq!(
            events[1].date,
            NaiveDate::from_ymd_opt(2025, 4, 2)
        );
    }

    #[test]
    fn test_malformed_bodies_yield_no_events() {
        assert!(parse_notifications(ProviderId::Fitbit, "not json").is_empty());
        assert!(parse_notifications(ProviderId::Whoop, "[1,2,3]").is_empty());
        assert!(parse_notifications(ProviderId::Oura, "{}").is_empty());
        assert!(parse_notifications(ProviderId::Withings, "").is_empty());
    }

    #[test]
    fn test_whoop_numeric_user_id_is_stringified() {
        let body = r#"{"user_id": 9001, "type": "workout.updated", "id": "w1"}"#;
        let events = parse_notifications(ProviderId::Whoop, body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].provider_user_id, "9001");
        assert_eq!(events[0].category, Some(HealthCategory::Activity));
    }

    #[test]
    fn test_withings_form_encoding() {
        let body = "userid=333&startdate=1700000000&enddate=1700003600&appli=1";
        let events = parse_notifications(ProviderId::Withings, body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].provider_user_id, "333");
        assert_eq!(events[0].category, Some(HealthCategory::Weight));
        assert!(events[0].date.is_some());
    }

    #[test]
    fn test_signature_validation() {
        let validator = WebhookSignatureValidator::new(Some("secret".into()));
        let body = b"payload";

        let key = hmac::Key::new(hmac::HMAC_SHA256, b"secret");
        let good = hex::encode(hmac::sign(&key, body).as_ref());

        assert_eq!(
            validator.validate(body, Some(&good)),
            SignatureValidation::Valid
        );
        assert_eq!(
            validator.validate(body, Some("deadbeef")),
            SignatureValidation::Invalid
        );
        assert_eq!(validator.validate(body, None), SignatureValidation::Invalid);

        let unconfigured = WebhookSignatureValidator::new(None);
        assert_eq!(
            unconfigured.validate(body, Some(&good)),
            SignatureValidation::NotConfigured
        );
    }
}
