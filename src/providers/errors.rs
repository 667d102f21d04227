// ABOUTME: Structured error types for provider operations with retry information
// ABOUTME: Collapses every upstream failure mode into one typed, non-throwing result
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Provider-facing error taxonomy.
//!
//! Every failure crossing the sync boundary is one of these variants; nothing
//! in the provider or sync layers propagates a panic or an untyped error.
//! The taxonomy maps directly onto recovery policy:
//!
//! - [`ProviderError::ReconnectRequired`] and
//!   [`ProviderError::AuthenticationFailed`] are fatal for the integration
//!   and require user re-consent; never auto-retried.
//! - [`ProviderError::RateLimitExceeded`] is recoverable; the caller is told
//!   when to retry.
//! - [`ProviderError::Transient`] mutated nothing and is safe to retry on
//!   the next scheduled pass.

use crate::errors::AppError;
use crate::models::ProviderId;
use thiserror::Error;

/// Result alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Structured errors for provider API and token operations
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No active integration exists for the (user, provider) pair
    #[error("{provider} is not connected")]
    NotConnected {
        /// Provider involved
        provider: ProviderId,
    },

    /// Definitive auth failure (401 after the permitted retry, or
    /// invalid-grant on refresh); the user must re-consent
    #[error("{provider} authentication failed: {reason}")]
    AuthenticationFailed {
        /// Provider involved
        provider: ProviderId,
        /// Sanitized reason, never a verbatim provider body
        reason: String,
    },

    /// The stored refresh token was rejected; reconnection is required
    #[error("{provider} connection expired, please reconnect")]
    ReconnectRequired {
        /// Provider involved
        provider: ProviderId,
    },

    /// Local quota exhausted or provider returned 429
    #[error("{provider} rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded {
        /// Provider involved
        provider: ProviderId,
        /// Seconds until the quota window resets
        retry_after_secs: u64,
    },

    /// Network failure or timeout; no state was mutated
    #[error("{provider} request failed transiently: {message}")]
    Transient {
        /// Provider involved
        provider: ProviderId,
        /// Transport-level description
        message: String,
    },

    /// Non-2xx API response outside the auth/rate-limit cases
    #[error("{provider} API error (status {status_code}): {message}")]
    ApiError {
        /// Provider involved
        provider: ProviderId,
        /// HTTP status code
        status_code: u16,
        /// Truncated error body
        message: String,
        /// Whether a later retry may succeed (5xx)
        retryable: bool,
    },

    /// A provider response could not be parsed into the expected shape
    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse {
        /// Provider involved
        provider: ProviderId,
        /// Parse failure description
        message: String,
    },

    /// Infrastructure failure (store, cache, configuration)
    #[error(transparent)]
    Internal(#[from] AppError),
}

impl ProviderError {
    /// True when the failure is fatal for the integration (requires re-consent)
    #[must_use]
    pub const fn is_fatal_auth(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::ReconnectRequired { .. }
        )
    }

    /// True when nothing was mutated and the next scheduled pass may retry
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
            || matches!(self, Self::ApiError { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_auth_classification() {
        let err = ProviderError::ReconnectRequired {
            provider: ProviderId::Fitbit,
        };
        assert!(err.is_fatal_auth());
        assert!(!err.is_transient());

        let err = ProviderError::Transient {
            provider: ProviderId::Fitbit,
            message: "timeout".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_fatal_auth());
    }
}
