// ABOUTME: Per-provider OAuth dialect table covering endpoints, credentials and parsing
// ABOUTME: Four providers, four dialects, one declarative strategy per provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Provider OAuth dialects.
//!
//! Every provider implements OAuth 2.0 differently in the details that
//! matter: where client credentials go on the token request, whether PKCE is
//! required, how revocation is invoked, how early a token should be
//! refreshed, and what a token response even looks like. Each dialect is one
//! [`OAuthStrategy`] value; the lifecycle manager is generic over the table
//! and contains no provider conditionals.
//!
//! Credential placement is exclusive: a provider takes `client_id` and
//! `client_secret` either as an HTTP Basic `Authorization` header or as form
//! fields, never both on one request.

use crate::errors::{AppError, AppResult};
use crate::models::ProviderId;
use std::time::Duration;

/// Where client credentials go on token-endpoint requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPlacement {
    /// `Authorization: Basic base64(client_id:client_secret)` header
    BasicHeader,
    /// `client_id` and `client_secret` form fields in the request body
    RequestBody,
}

/// HTTP verb the provider's revocation endpoint expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeMethod {
    /// Revocation via GET with query parameters
    Get,
    /// Revocation via POST with form fields
    Post,
}

/// A successfully parsed token-endpoint response
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// Bearer access token
    pub access_token: String,
    /// Replacement refresh token, when the provider rotates them
    pub refresh_token: Option<String>,
    /// Access token lifetime
    pub expires_in: Duration,
    /// Scopes granted, when reported
    pub scopes: Option<String>,
    /// Provider-side user id, when the token response carries one
    pub provider_user_id: Option<String>,
}

/// One provider's complete OAuth dialect
pub struct OAuthStrategy {
    /// Provider this dialect belongs to
    pub provider: ProviderId,
    /// User-facing authorization page
    pub authorize_url: &'static str,
    /// Token endpoint (exchange and refresh)
    pub token_url: &'static str,
    /// Revocation endpoint
    pub revoke_url: &'static str,
    /// Scopes requested at connect time
    pub default_scopes: &'static str,
    /// Whether the authorization flow requires PKCE (S256)
    pub uses_pkce: bool,
    /// Credential placement on token-endpoint requests
    pub credential_placement: CredentialPlacement,
    /// Revocation verb
    pub revoke_method: RevokeMethod,
    /// Refresh this long before expiry
    pub refresh_buffer: Duration,
    /// Extra form fields every token-endpoint request must carry
    pub token_extra_params: &'static [(&'static str, &'static str)],
    /// Extra fields on revocation requests
    pub revoke_extra_params: &'static [(&'static str, &'static str)],
    /// Parse a 2xx token-endpoint body into a grant
    pub parse_token_response: fn(&str) -> AppResult<TokenGrant>,
    /// Classify a token-endpoint response as a rejected (dead) refresh token
    pub is_invalid_grant: fn(u16, &str) -> bool,
    /// Classify a data-endpoint response as a rejected access token
    pub is_auth_rejected: fn(u16, &str) -> bool,
}

const FITBIT: OAuthStrategy = OAuthStrategy {
    provider: ProviderId::Fitbit,
    authorize_url: "https://www.fitbit.com/oauth2/authorize",
    token_url: "https://api.fitbit.com/oauth2/token",
    revoke_url: "https://api.fitbit.com/oauth2/revoke",
    default_scopes: "activity heartrate sleep weight nutrition profile",
    uses_pkce: true,
    credential_placement: CredentialPlacement::BasicHeader,
    revoke_method: RevokeMethod::Post,
    refresh_buffer: Duration::from_secs(30 * 60),
    token_extra_params: &[],
    revoke_extra_params: &[],
    parse_token_response: parse_standard_grant,
    is_invalid_grant: standard_is_invalid_grant,
    is_auth_rejected: standard_is_auth_rejected,
};

const WHOOP: OAuthStrategy = OAuthStrategy {
    provider: ProviderId::Whoop,
    authorize_url: "https://api.prod.whoop.com/oauth/oauth2/auth",
    token_url: "https://api.prod.whoop.com/oauth/oauth2/token",
    revoke_url: "https://api.prod.whoop.com/oauth/oauth2/revoke",
    default_scopes: "read:profile read:recovery read:sleep read:workout read:body_measurement offline",
    uses_pkce: false,
    credential_placement: CredentialPlacement::RequestBody,
    revoke_method: RevokeMethod::Post,
    refresh_buffer: Duration::from_secs(30 * 60),
    token_extra_params: &[],
    revoke_extra_params: &[],
    parse_token_response: parse_standard_grant,
    is_invalid_grant: standard_is_invalid_grant,
    is_auth_rejected: standard_is_auth_rejected,
};

const OURA: OAuthStrategy = OAuthStrategy {
    provider: ProviderId::Oura,
    authorize_url: "https://cloud.ouraring.com/oauth/authorize",
    token_url: "https://api.ouraring.com/oauth/token",
    revoke_url: "https://api.ouraring.com/oauth/revoke",
    default_scopes: "daily heartrate workout session personal",
    uses_pkce: false,
    credential_placement: CredentialPlacement::BasicHeader,
    revoke_method: RevokeMethod::Get,
    refresh_buffer: Duration::from_secs(30 * 60),
    token_extra_params: &[],
    revoke_extra_params: &[],
    parse_token_response: parse_standard_grant,
    is_invalid_grant: standard_is_invalid_grant,
    is_auth_rejected: standard_is_auth_rejected,
};

const WITHINGS: OAuthStrategy = OAuthStrategy {
    provider: ProviderId::Withings,
    authorize_url: "https://account.withings.com/oauth2_user/authorize2",
    token_url: "https://wbsapi.withings.net/v2/oauth2",
    revoke_url: "https://wbsapi.withings.net/v2/oauth2",
    default_scopes: "user.info,user.metrics,user.activity",
    uses_pkce: false,
    credential_placement: CredentialPlacement::RequestBody,
    revoke_method: RevokeMethod::Post,
    refresh_buffer: Duration::from_secs(10 * 60),
    token_extra_params: &[("action", "requesttoken")],
    revoke_extra_params: &[("action", "revoke")],
    parse_token_response: parse_withings_grant,
    is_invalid_grant: withings_is_invalid_grant,
    is_auth_rejected: withings_is_auth_rejected,
};

impl OAuthStrategy {
    /// Dialect for a provider
    #[must_use]
    pub const fn for_provider(provider: ProviderId) -> &'static Self {
        match provider {
            ProviderId::Fitbit => &FITBIT,
            ProviderId::Whoop => &WHOOP,
            ProviderId::Oura => &OURA,
            ProviderId::Withings => &WITHINGS,
        }
    }
}

/// RFC 6749 token response: `access_token`, `expires_in`, optional
/// `refresh_token` and `scope`. Fitbit additionally reports `user_id`.
fn parse_standard_grant(body: &str) -> AppResult<TokenGrant> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AppError::invalid_format(format!("token response is not JSON: {e}")))?;

    let access_token = value
        .get("access_token")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::invalid_format("token response missing access_token"))?
        .to_owned();
    let expires_in = value
        .get("expires_in")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| AppError::invalid_format("token response missing expires_in"))?;

    Ok(TokenGrant {
        access_token,
        refresh_token: value
            .get("refresh_token")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
        expires_in: Duration::from_secs(expires_in),
        scopes: value
            .get("scope")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
        provider_user_id: value
            .get("user_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
    })
}

/// Withings wraps everything in `{"status": N, "body": {...}}` and reports
/// errors through a nonzero `status` on an HTTP 200.
fn parse_withings_grant(body: &str) -> AppResult<TokenGrant> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AppError::invalid_format(format!("token response is not JSON: {e}")))?;

    let status = value
        .get("status")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(-1);
    if status != 0 {
        return Err(AppError::external_service(
            "withings",
            format!("token endpoint returned status {status}"),
        ));
    }

    let inner = value
        .get("body")
        .ok_or_else(|| AppError::invalid_format("withings token response missing body"))?;

    let access_token = inner
        .get("access_token")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::invalid_format("token response missing access_token"))?
        .to_owned();
    let expires_in = inner
        .get("expires_in")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| AppError::invalid_format("token response missing expires_in"))?;

    Ok(TokenGrant {
        access_token,
        refresh_token: inner
            .get("refresh_token")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
        expires_in: Duration::from_secs(expires_in),
        scopes: inner
            .get("scope")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
        provider_user_id: inner
            .get("userid")
            .and_then(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .or_else(|| v.as_i64().map(|n| n.to_string()))
            }),
    })
}

fn standard_is_invalid_grant(status: u16, body: &str) -> bool {
    (status == 400 || status == 401) && body.contains("invalid_grant")
}

/// Withings signals a dead refresh token on an HTTP 200: in-body status 401
/// means invalid credentials or token.
fn withings_is_invalid_grant(status: u16, body: &str) -> bool {
    standard_is_invalid_grant(status, body) || withings_body_status(body) == Some(401)
}

fn standard_is_auth_rejected(status: u16, _body: &str) -> bool {
    status == 401
}

/// Withings data endpoints reject an invalid access token the same way its
/// token endpoint does: in-body status 401 on an HTTP 200.
fn withings_is_auth_rejected(status: u16, body: &str) -> bool {
    status == 401 || withings_body_status(body) == Some(401)
}

fn withings_body_status(body: &str) -> Option<i64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("status").and_then(serde_json::Value::as_i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_grant_with_fitbit_user_id() -> anyhow::Result<()> {
        let body = r#"{
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 28800,
            "scope": "activity sleep",
            "user_id": "ABC123"
        }"#;
        let grant = parse_standard_grant(body)?;
        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(grant.expires_in, Duration::from_secs(28_800));
        assert_eq!(grant.provider_user_id.as_deref(), Some("ABC123"));
        Ok(())
    }

    #[test]
    fn test_parse_withings_grant_unwraps_body() -> anyhow::Result<()> {
        let body = r#"{
            "status": 0,
            "body": {
                "userid": 12345,
                "access_token": "at-w",
                "refresh_token": "rt-w",
                "expires_in": 10800,
                "scope": "user.metrics"
            }
        }"#;
        let grant = parse_withings_grant(body)?;
        assert_eq!(grant.access_token, "at-w");
        assert_eq!(grant.provider_user_id.as_deref(), Some("12345"));
        assert_eq!(grant.expires_in, Duration::from_secs(10_800));
        Ok(())
    }

    #[test]
    fn test_withings_nonzero_status_is_an_error() {
        let body = r#"{"status": 503, "body": {}}"#;
        assert!(parse_withings_grant(body).is_err());
    }

    #[test]
    fn test_invalid_grant_classification() {
        assert!(standard_is_invalid_grant(
            400,
            r#"{"errors":[{"errorType":"invalid_grant"}]}"#
        ));
        assert!(!standard_is_invalid_grant(500, "invalid_grant"));
        // Withings reports a dead token on HTTP 200
        assert!(withings_is_invalid_grant(200, r#"{"status": 401}"#));
        assert!(!withings_is_invalid_grant(200, r#"{"status": 0}"#));
    }

    #[test]
    fn test_auth_rejection_classification() {
        assert!(standard_is_auth_rejected(401, ""));
        assert!(!standard_is_auth_rejected(403, ""));
        // Withings rejects an access token in-body on an HTTP 200
        assert!(withings_is_auth_rejected(200, r#"{"status": 401}"#));
        assert!(withings_is_auth_rejected(401, ""));
        assert!(!withings_is_auth_rejected(200, r#"{"status": 0, "body": {}}"#));
    }

    #[test]
    fn test_credential_placement_is_exclusive_per_provider() {
        assert_eq!(
            OAuthStrategy::for_provider(ProviderId::Fitbit).credential_placement,
            CredentialPlacement::BasicHeader
        );
        assert_eq!(
            OAuthStrategy::for_provider(ProviderId::Withings).credential_placement,
            CredentialPlacement::RequestBody
        );
        assert!(OAuthStrategy::for_provider(ProviderId::Fitbit).uses_pkce);
        assert!(!OAuthStrategy::for_provider(ProviderId::Oura).uses_pkce);
    }
}
