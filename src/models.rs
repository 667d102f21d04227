// ABOUTME: Core domain models for provider integrations and synced health records
// ABOUTME: Defines Integration lifecycle state and the closed HealthCategory dispatch set
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Domain models shared across the token lifecycle, sync engine and stores.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported wearable/fitness providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Fitbit (PKCE, Basic-auth header credentials, 8h tokens)
    Fitbit,
    /// Whoop (body credentials, 24h tokens)
    Whoop,
    /// Oura (Basic-auth header credentials, GET revocation)
    Oura,
    /// Withings (body credentials, HMAC-signed requests, 3h tokens)
    Withings,
}

impl ProviderId {
    /// All supported providers
    pub const ALL: [Self; 4] = [Self::Fitbit, Self::Whoop, Self::Oura, Self::Withings];

    /// Lowercase provider name used in keys, logs and API responses
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fitbit => "fitbit",
            Self::Whoop => "whoop",
            Self::Oura => "oura",
            Self::Withings => "withings",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fitbit" => Ok(Self::Fitbit),
            "whoop" => Ok(Self::Whoop),
            "oura" => Ok(Self::Oura),
            "withings" => Ok(Self::Withings),
            other => Err(format!("unsupported provider: {other}")),
        }
    }
}

/// Synchronization status of one integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No sync in progress, last pass completed (or never ran)
    Idle,
    /// A backfill or sync pass currently owns the integration
    Syncing,
    /// Last pass failed; `sync_error` carries the reason
    Error,
}

/// Persisted link between one user and one provider's OAuth credentials
/// and sync state. At most one active row exists per (user, provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    /// Owning user
    pub user_id: Uuid,
    /// Provider this integration connects to
    pub provider: ProviderId,
    /// Current access token (cleared on disconnect)
    pub access_token: Option<String>,
    /// Single-use refresh token (cleared on disconnect)
    pub refresh_token: Option<String>,
    /// Access token expiry
    pub token_expires_at: Option<DateTime<Utc>>,
    /// False after disconnect (soft delete)
    pub is_active: bool,
    /// Sync state machine position
    pub sync_status: SyncStatus,
    /// Failure reason when `sync_status == Error`
    pub sync_error: Option<String>,
    /// Last successful sync pass
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Open map: provider-side user id, granted scopes, webhook
    /// subscription ids, device list
    pub provider_metadata: serde_json::Value,
    /// First successful code exchange
    pub connected_at: DateTime<Utc>,
}

impl Integration {
    /// Metadata key holding the provider-side user id
    pub const META_PROVIDER_USER_ID: &'static str = "provider_user_id";
    /// Metadata key holding granted scopes
    pub const META_SCOPES: &'static str = "scopes";
    /// Metadata key holding the webhook subscription id
    pub const META_WEBHOOK_SUBSCRIPTION_ID: &'static str = "webhook_subscription_id";
    /// Metadata key holding the webhook subscription expiry (RFC 3339)
    pub const META_WEBHOOK_EXPIRES_AT: &'static str = "webhook_expires_at";

    /// Create a fresh integration for a first-time connection
    #[must_use]
    pub fn new(user_id: Uuid, provider: ProviderId) -> Self {
        Self {
            user_id,
            provider,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            is_active: true,
            sync_status: SyncStatus::Idle,
            sync_error: None,
            last_synced_at: None,
            provider_metadata: serde_json::Value::Object(serde_json::Map::new()),
            connected_at: Utc::now(),
        }
    }

    /// Provider-side user id stored at token save time. Webhook resolution
    /// keys off this id, never a caller-supplied one.
    #[must_use]
    pub fn provider_user_id(&self) -> Option<&str> {
        self.provider_metadata
            .get(Self::META_PROVIDER_USER_ID)
            .and_then(serde_json::Value::as_str)
    }

    /// Set a metadata entry, initializing the map when absent
    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        if !self.provider_metadata.is_object() {
            self.provider_metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.provider_metadata.as_object_mut() {
            map.insert(key.to_owned(), value);
        }
    }

    /// Read a metadata entry
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.provider_metadata.get(key)
    }
}

/// Closed set of health record categories. Dispatch from category to the
/// per-provider fetch function is an exhaustive match over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCategory {
    /// Workout/activity sessions (natural key: external record id)
    Activity,
    /// Sleep sessions (natural key: external record id)
    Sleep,
    /// Body weight readings (natural key: external record id)
    Weight,
    /// Blood pressure readings (natural key: external record id)
    BloodPressure,
    /// Nutrition log, daily aggregate (natural key: calendar date)
    Nutrition,
    /// Daily activity summary (natural key: calendar date)
    DailySummary,
}

impl HealthCategory {
    /// All categories, for iteration
    pub const ALL: [Self; 6] = [
        Self::Activity,
        Self::Sleep,
        Self::Weight,
        Self::BloodPressure,
        Self::Nutrition,
        Self::DailySummary,
    ];

    /// Snake-case name used in keys and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Sleep => "sleep",
            Self::Weight => "weight",
            Self::BloodPressure => "blood_pressure",
            Self::Nutrition => "nutrition",
            Self::DailySummary => "daily_summary",
        }
    }

    /// True when the natural key is a calendar date (later updates overwrite)
    #[must_use]
    pub const fn is_daily_aggregate(self) -> bool {
        matches!(self, Self::Nutrition | Self::DailySummary)
    }
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored health record. Unique per (user, source, category, natural key);
/// re-ingestion updates in place, never duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Owning user
    pub user_id: Uuid,
    /// Provider the record came from
    pub source: ProviderId,
    /// Record category
    pub category: HealthCategory,
    /// External record id for event data, calendar date for daily aggregates
    pub natural_key: String,
    /// Event timestamp or start of the aggregate day
    pub recorded_at: DateTime<Utc>,
    /// Provider payload fields, normalized to JSON
    pub payload: serde_json::Value,
}

/// A record produced by a provider fetch, before user/source stamping
#[derive(Debug, Clone)]
pub struct HealthRecordDraft {
    /// Record category
    pub category: HealthCategory,
    /// Deduplication key within (user, source, category)
    pub natural_key: String,
    /// Event timestamp or start of the aggregate day
    pub recorded_at: DateTime<Utc>,
    /// Provider payload fields
    pub payload: serde_json::Value,
}

impl HealthRecordDraft {
    /// Natural key for a daily-aggregate record
    #[must_use]
    pub fn daily_key(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }
}

/// User-visible connection status for one (user, provider) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether an active integration exists
    pub connected: bool,
    /// Present only when connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncStatus>,
    /// Present only when connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Present only on a fatal auth failure ("reconnect" messaging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Status for a user with no active integration
    #[must_use]
    pub const fn disconnected() -> Self {
        Self {
            connected: false,
            sync_status: None,
            last_synced_at: None,
            error: None,
        }
    }
}
