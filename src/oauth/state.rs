// ABOUTME: Single-use OAuth flow state storage with PKCE material generation
// ABOUTME: State tokens are consumed atomically so a replayed callback fails
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Authorization-flow state.
//!
//! Each authorization redirect carries a random `state` token mapping back to
//! the initiating user. The mapping lives in the cache with a short TTL and
//! is consumed with an atomic get-and-delete, so a given callback can succeed
//! exactly once. The PKCE verifier (when the provider requires PKCE) rides
//! along in the same entry and never leaves the server.

use crate::cache::CacheProvider;
use crate::errors::{AppError, AppResult};
use crate::models::ProviderId;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// How long an authorization flow may stay pending
pub const FLOW_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Pending authorization flow, stored under its state token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFlowState {
    /// User who initiated the flow
    pub user_id: Uuid,
    /// Provider being connected
    pub provider: ProviderId,
    /// PKCE code verifier, present when the provider requires PKCE
    pub pkce_verifier: Option<String>,
    /// Flow start time
    pub created_at: DateTime<Utc>,
}

/// PKCE material for one authorization flow
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// High-entropy verifier, kept server-side
    pub verifier: String,
    /// S256 challenge sent on the authorization URL
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier and its S256 challenge
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Generate a random state token for one authorization flow
#[must_use]
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Cache-backed store for pending authorization flows
#[derive(Clone)]
pub struct AuthFlowStateStore<C: CacheProvider> {
    cache: C,
}

impl<C: CacheProvider> AuthFlowStateStore<C> {
    /// Create a store over the given cache backend
    pub const fn new(cache: C) -> Self {
        Self { cache }
    }

    fn state_key(token: &str) -> String {
        format!("oauth_state:{token}")
    }

    /// Persist a pending flow under its state token
    ///
    /// # Errors
    ///
    /// Returns an error if the cache write fails
    pub async fn put(&self, token: &str, state: &AuthFlowState) -> AppResult<()> {
        let serialized = serde_json::to_string(state)
            .map_err(|e| AppError::serialization(format!("flow state: {e}")))?;
        self.cache
            .set_ex(&Self::state_key(token), &serialized, FLOW_STATE_TTL)
            .await
    }

    /// Atomically consume a pending flow. A second consumer of the same
    /// token, concurrent or later, gets `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache read fails or the entry is corrupt
    pub async fn consume(&self, token: &str) -> AppResult<Option<AuthFlowState>> {
        match self.cache.get_del(&Self::state_key(token)).await? {
            Some(serialized) => {
                let state = serde_json::from_str(&serialized)
                    .map_err(|e| AppError::serialization(format!("flow state: {e}")))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}
