// ABOUTME: Environment variable configuration for server, providers and Redis
// ABOUTME: Missing credentials for an enabled provider fail fast at startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Environment-based configuration.
//!
//! Provider OAuth credentials follow the `VITALSYNC_<PROVIDER>_CLIENT_ID`,
//! `VITALSYNC_<PROVIDER>_CLIENT_SECRET`, `VITALSYNC_<PROVIDER>_REDIRECT_URI`
//! convention. A provider listed in `VITALSYNC_ENABLED_PROVIDERS` without
//! credentials is a configuration error — the server refuses to start rather
//! than proceed silently.

use crate::errors::{AppError, AppResult};
use crate::models::ProviderId;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Default outbound HTTP request timeout in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Default outbound HTTP connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default periodic sync interval in seconds (15 minutes)
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 900;

/// OAuth client credentials for one provider
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    /// OAuth client id issued by the provider
    pub client_id: String,
    /// OAuth client secret issued by the provider
    pub client_secret: String,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Webhook signature verification secret, when the provider signs deliveries
    pub webhook_secret: Option<String>,
}

impl OAuthClientConfig {
    /// Load credentials for a provider from environment variables
    ///
    /// # Errors
    ///
    /// Returns a fail-fast configuration error when client id or secret is
    /// not set.
    pub fn from_env(provider: ProviderId) -> AppResult<Self> {
        let prefix = format!("VITALSYNC_{}", provider.as_str().to_uppercase());

        let client_id = env::var(format!("{prefix}_CLIENT_ID"))
            .map_err(|_| AppError::config_missing(format!("{prefix}_CLIENT_ID")))?;
        let client_secret = env::var(format!("{prefix}_CLIENT_SECRET"))
            .map_err(|_| AppError::config_missing(format!("{prefix}_CLIENT_SECRET")))?;
        let redirect_uri = env::var(format!("{prefix}_REDIRECT_URI")).unwrap_or_else(|_| {
            format!("http://localhost:8080/oauth/callback/{provider}")
        });
        let webhook_secret = env::var(format!("{prefix}_WEBHOOK_SECRET")).ok();

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            webhook_secret,
        })
    }
}

/// Redis connection and retry configuration
#[derive(Debug, Clone)]
pub struct RedisConnectionConfig {
    /// TCP connect timeout in seconds
    pub connection_timeout_secs: u64,
    /// Per-command response timeout in seconds
    pub response_timeout_secs: u64,
    /// Retries for the initial connection at startup
    pub initial_connection_retries: u32,
    /// Retries for reconnection after a dropped connection
    pub reconnection_retries: usize,
    /// Exponential backoff base for reconnection
    pub retry_exponent_base: u64,
    /// Initial retry delay in milliseconds
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 5,
            response_timeout_secs: 2,
            initial_connection_retries: 3,
            reconnection_retries: 6,
            retry_exponent_base: 2,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 5_000,
        }
    }
}

impl RedisConnectionConfig {
    /// Build from environment variables, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connection_timeout_secs: parse_env("REDIS_CONNECTION_TIMEOUT_SECS")
                .unwrap_or(defaults.connection_timeout_secs),
            response_timeout_secs: parse_env("REDIS_RESPONSE_TIMEOUT_SECS")
                .unwrap_or(defaults.response_timeout_secs),
            initial_connection_retries: parse_env("REDIS_INITIAL_CONNECTION_RETRIES")
                .unwrap_or(defaults.initial_connection_retries),
            reconnection_retries: parse_env("REDIS_RECONNECTION_RETRIES")
                .unwrap_or(defaults.reconnection_retries),
            retry_exponent_base: defaults.retry_exponent_base,
            initial_retry_delay_ms: parse_env("REDIS_INITIAL_RETRY_DELAY_MS")
                .unwrap_or(defaults.initial_retry_delay_ms),
            max_retry_delay_ms: parse_env("REDIS_MAX_RETRY_DELAY_MS")
                .unwrap_or(defaults.max_retry_delay_ms),
        }
    }
}

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Providers to enable; credentials must exist for each
    pub enabled_providers: Vec<ProviderId>,
    /// OAuth credentials per enabled provider
    pub oauth: HashMap<ProviderId, OAuthClientConfig>,
    /// Redis URL; `None` selects the in-memory cache
    pub redis_url: Option<String>,
    /// Outbound HTTP request timeout in seconds
    pub http_timeout_secs: u64,
    /// Outbound HTTP connect timeout in seconds
    pub http_connect_timeout_secs: u64,
    /// Periodic sync interval in seconds
    pub sync_interval_secs: u64,
}

impl ServerConfig {
    /// Load the full configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error when `VITALSYNC_ENABLED_PROVIDERS` names an unknown
    /// provider or an enabled provider is missing credentials.
    pub fn from_env() -> AppResult<Self> {
        let enabled_providers = match env::var("VITALSYNC_ENABLED_PROVIDERS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    ProviderId::from_str(s).map_err(AppError::config)
                })
                .collect::<AppResult<Vec<_>>>()?,
            Err(_) => ProviderId::ALL.to_vec(),
        };

        let mut oauth = HashMap::new();
        for provider in &enabled_providers {
            oauth.insert(*provider, OAuthClientConfig::from_env(*provider)?);
        }

        Ok(Self {
            enabled_providers,
            oauth,
            redis_url: env::var("REDIS_URL").ok(),
            http_timeout_secs: parse_env("VITALSYNC_HTTP_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            http_connect_timeout_secs: parse_env("VITALSYNC_HTTP_CONNECT_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            sync_interval_secs: parse_env("VITALSYNC_SYNC_INTERVAL_SECS")
                .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
        })
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_connection_defaults() {
        let config = RedisConnectionConfig::default();
        assert_eq!(config.connection_timeout_secs, 5);
        assert_eq!(config.initial_connection_retries, 3);
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        // No VITALSYNC_OURA_* variables are set in the test environment
        std::env::remove_var("VITALSYNC_OURA_CLIENT_ID");
        let result = OAuthClientConfig::from_env(ProviderId::Oura);
        assert!(result.is_err());
    }
}
