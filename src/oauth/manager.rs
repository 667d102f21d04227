// ABOUTME: Token lifecycle manager covering connect, refresh, revoke and status
// ABOUTME: Refresh is single-flight per (user, provider) and persists before returning
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Token lifecycle orchestration.
//!
//! Providers issue single-use refresh tokens: exchanging one invalidates it
//! and returns a replacement. Two rules follow and both are enforced here.
//! First, a replacement refresh token is persisted before the new access
//! token is handed to any caller, so a crash between exchange and persist
//! can never leave the stored token dead. Second, refresh is single-flight
//! per (user, provider): concurrent callers serialize on a per-pair lock
//! and the winners-followers pattern means exactly one network exchange
//! happens per expiry.

use crate::config::OAuthClientConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{ConnectionStatus, Integration, ProviderId, SyncStatus};
use crate::oauth::state::{generate_state_token, AuthFlowState, AuthFlowStateStore, PkcePair};
use crate::oauth::strategy::{CredentialPlacement, OAuthStrategy, RevokeMethod, TokenGrant};
use crate::providers::errors::{ProviderError, ProviderResult};
use crate::providers::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::store::IntegrationStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Truncation limit for provider error bodies in logs and messages
const ERROR_BODY_MAX_LEN: usize = 256;

/// An authorization URL ready for user redirect
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Full authorization URL including state and PKCE challenge
    pub url: String,
    /// State token bound to this flow
    pub state: String,
}

/// Orchestrates the OAuth token lifecycle for every enabled provider
pub struct TokenLifecycleManager<C: crate::cache::CacheProvider> {
    store: Arc<dyn IntegrationStore>,
    transport: Arc<dyn HttpTransport>,
    flow_states: AuthFlowStateStore<C>,
    credentials: HashMap<ProviderId, OAuthClientConfig>,
    refresh_guards: DashMap<(Uuid, ProviderId), Arc<Mutex<()>>>,
}

impl<C: crate::cache::CacheProvider> TokenLifecycleManager<C> {
    /// Create a manager over the given store, transport and cache
    #[must_use]
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        transport: Arc<dyn HttpTransport>,
        cache: C,
        credentials: HashMap<ProviderId, OAuthClientConfig>,
    ) -> Self {
        Self {
            store,
            transport,
            flow_states: AuthFlowStateStore::new(cache),
            credentials,
            refresh_guards: DashMap::new(),
        }
    }

    fn creds(&self, provider: ProviderId) -> AppResult<&OAuthClientConfig> {
        self.credentials
            .get(&provider)
            .ok_or_else(|| AppError::config_missing(format!("{provider} oauth credentials")))
    }

    /// Build the authorization redirect URL for a user connecting a provider.
    /// State and PKCE material are generated here and stored single-use.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider has no configured credentials or
    /// the flow state cannot be stored
    pub async fn build_authorization_url(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> AppResult<AuthorizationRequest> {
        let strategy = OAuthStrategy::for_provider(provider);
        let creds = self.creds(provider)?;

        let state = generate_state_token();
        let pkce = strategy.uses_pkce.then(PkcePair::generate);

        self.flow_states
            .put(
                &state,
                &AuthFlowState {
                    user_id,
                    provider,
                    pkce_verifier: pkce.as_ref().map(|p| p.verifier.clone()),
                    created_at: Utc::now(),
                },
            )
            .await?;

        let mut url = url::Url::parse(strategy.authorize_url)
            .map_err(|e| AppError::internal(format!("bad authorize url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &creds.client_id)
                .append_pair("redirect_uri", &creds.redirect_uri)
                .append_pair("scope", strategy.default_scopes)
                .append_pair("state", &state);
            if let Some(pkce) = &pkce {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }

        tracing::info!(%provider, %user_id, "authorization flow started");
        Ok(AuthorizationRequest {
            url: url.into(),
            state,
        })
    }

    /// Complete the callback leg: consume the state token (single use),
    /// exchange the code and persist the resulting integration.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or replayed state, a rejected code, or
    /// a persistence failure
    pub async fn exchange_code(
        &self,
        state_token: &str,
        code: &str,
    ) -> ProviderResult<Integration> {
        let flow = self
            .flow_states
            .consume(state_token)
            .await?
            .ok_or_else(|| {
                ProviderError::Internal(AppError::invalid_input(
                    "unknown, expired or already used state token",
                ))
            })?;

        let provider = flow.provider;
        let strategy = OAuthStrategy::for_provider(provider);
        let creds = self.creds(provider).map_err(ProviderError::Internal)?;

        let mut fields = vec![
            ("grant_type".to_owned(), "authorization_code".to_owned()),
            ("code".to_owned(), code.to_owned()),
            ("redirect_uri".to_owned(), creds.redirect_uri.clone()),
        ];
        if let Some(verifier) = &flow.pkce_verifier {
            fields.push(("code_verifier".to_owned(), verifier.clone()));
        }

        let response = self
            .token_endpoint_request(strategy, creds, fields)
            .await?;

        if !response.is_success() {
            tracing::warn!(
                %provider,
                status = response.status,
                "authorization code exchange rejected"
            );
            return Err(ProviderError::AuthenticationFailed {
                provider,
                reason: format!("code exchange rejected with status {}", response.status),
            });
        }

        let grant = (strategy.parse_token_response)(&response.body).map_err(|e| {
            ProviderError::MalformedResponse {
                provider,
                message: e.to_string(),
            }
        })?;

        let integration = self.save_tokens(flow.user_id, provider, &grant).await?;
        tracing::info!(%provider, user_id = %flow.user_id, "provider connected");
        Ok(integration)
    }

    /// Persist a grant onto the (user, provider) integration, creating it on
    /// first connection. Stores the provider-side user id for webhook
    /// resolution.
    async fn save_tokens(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        grant: &TokenGrant,
    ) -> ProviderResult<Integration> {
        let mut integration = self
            .store
            .get_integration(user_id, provider)
            .await?
            .unwrap_or_else(|| Integration::new(user_id, provider));

        integration.access_token = Some(grant.access_token.clone());
        if let Some(refresh_token) = &grant.refresh_token {
            integration.refresh_token = Some(refresh_token.clone());
        }
        integration.token_expires_at = Some(
            Utc::now()
                + ChronoDuration::seconds(
                    i64::try_from(grant.expires_in.as_secs()).unwrap_or(i64::MAX),
                ),
        );
        integration.is_active = true;
        integration.sync_status = SyncStatus::Idle;
        integration.sync_error = None;
        if let Some(provider_user_id) = &grant.provider_user_id {
            integration.set_metadata(
                Integration::META_PROVIDER_USER_ID,
                serde_json::json!(provider_user_id),
            );
        }
        if let Some(scopes) = &grant.scopes {
            integration.set_metadata(Integration::META_SCOPES, serde_json::json!(scopes));
        }

        self.store.upsert_integration(&integration).await?;
        Ok(integration)
    }

    /// A valid access token for the pair, refreshing first when the stored
    /// token is inside the provider's refresh buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotConnected`] without an active
    /// integration, [`ProviderError::ReconnectRequired`] when the refresh
    /// token is dead, and [`ProviderError::Transient`] when a refresh was
    /// needed but could not be completed
    pub async fn get_access_token(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> ProviderResult<String> {
        let integration = self
            .store
            .get_integration(user_id, provider)
            .await?
            .filter(|i| i.is_active)
            .ok_or(ProviderError::NotConnected { provider })?;

        if !Self::needs_refresh(&integration) {
            if let Some(token) = integration.access_token {
                return Ok(token);
            }
        }

        match self.refresh_access_token(user_id, provider).await? {
            Some(refreshed) => refreshed
                .access_token
                .ok_or(ProviderError::NotConnected { provider }),
            None => Err(ProviderError::Transient {
                provider,
                message: "token refresh could not be completed".into(),
            }),
        }
    }

    fn needs_refresh(integration: &Integration) -> bool {
        let strategy = OAuthStrategy::for_provider(integration.provider);
        let buffer = ChronoDuration::seconds(
            i64::try_from(strategy.refresh_buffer.as_secs()).unwrap_or(i64::MAX),
        );
        match (&integration.access_token, integration.token_expires_at) {
            (Some(_), Some(expires_at)) => expires_at - buffer <= Utc::now(),
            _ => true,
        }
    }

    /// Refresh the pair's access token.
    ///
    /// `Ok(Some(_))` is a completed refresh with the rotated refresh token
    /// already persisted. `Ok(None)` is a transient failure with nothing
    /// mutated. `Err(ReconnectRequired)` means the provider rejected the
    /// refresh token; the integration is marked errored.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the refresh token is rejected or the
    /// integration cannot be loaded
    pub async fn refresh_access_token(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> ProviderResult<Option<Integration>> {
        let guard = self
            .refresh_guards
            .entry((user_id, provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _lock = guard.lock().await;

        // Re-read under the lock: a concurrent caller may have finished the
        // refresh while this one waited.
        let integration = self
            .store
            .get_integration(user_id, provider)
            .await?
            .filter(|i| i.is_active)
            .ok_or(ProviderError::NotConnected { provider })?;

        if !Self::needs_refresh(&integration) {
            return Ok(Some(integration));
        }

        self.refresh_locked(integration).await
    }

    /// Refresh after a provider rejected `stale_token` with a 401, ignoring
    /// the expiry buffer. If another task already rotated past the stale
    /// token the stored integration is returned without a network exchange.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::refresh_access_token`]
    pub async fn refresh_after_rejection(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        stale_token: &str,
    ) -> ProviderResult<Option<Integration>> {
        let guard = self
            .refresh_guards
            .entry((user_id, provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _lock = guard.lock().await;

        let integration = self
            .store
            .get_integration(user_id, provider)
            .await?
            .filter(|i| i.is_active)
            .ok_or(ProviderError::NotConnected { provider })?;

        if integration.access_token.as_deref() != Some(stale_token) {
            return Ok(Some(integration));
        }

        self.refresh_locked(integration).await
    }

    async fn refresh_locked(
        &self,
        mut integration: Integration,
    ) -> ProviderResult<Option<Integration>> {
        let provider = integration.provider;
        let strategy = OAuthStrategy::for_provider(provider);
        let creds = self.creds(provider).map_err(ProviderError::Internal)?;

        let Some(refresh_token) = integration.refresh_token.clone() else {
            return Err(self.mark_reconnect_required(integration, "no refresh token").await);
        };

        let fields = vec![
            ("grant_type".to_owned(), "refresh_token".to_owned()),
            ("refresh_token".to_owned(), refresh_token),
        ];

        let response = match self.token_endpoint_request(strategy, creds, fields).await {
            Ok(response) => response,
            Err(e) => {
                // Nothing was mutated; the next pass retries with the same
                // stored refresh token.
                tracing::warn!(%provider, error = %e, "token refresh failed transiently");
                return Ok(None);
            }
        };

        if (strategy.is_invalid_grant)(response.status, &response.body) {
            tracing::warn!(
                %provider,
                user_id = %integration.user_id,
                "refresh token rejected, reconnection required"
            );
            return Err(self
                .mark_reconnect_required(integration, "refresh token rejected")
                .await);
        }

        if !response.is_success() {
            if response.status == 429 || response.status >= 500 {
                tracing::warn!(
                    %provider,
                    status = response.status,
                    "token endpoint unavailable, will retry later"
                );
                return Ok(None);
            }
            return Err(self
                .mark_reconnect_required(
                    integration,
                    &format!("token endpoint returned status {}", response.status),
                )
                .await);
        }

        let grant = (strategy.parse_token_response)(&response.body).map_err(|e| {
            ProviderError::MalformedResponse {
                provider,
                message: e.to_string(),
            }
        })?;

        integration.access_token = Some(grant.access_token.clone());
        if let Some(new_refresh) = &grant.refresh_token {
            integration.refresh_token = Some(new_refresh.clone());
        }
        integration.token_expires_at = Some(
            Utc::now()
                + ChronoDuration::seconds(
                    i64::try_from(grant.expires_in.as_secs()).unwrap_or(i64::MAX),
                ),
        );
        integration.sync_status = SyncStatus::Idle;
        integration.sync_error = None;

        // The old refresh token died the moment the exchange succeeded. The
        // replacement must hit the store before any caller sees the new
        // access token.
        self.store.upsert_integration(&integration).await?;

        tracing::debug!(%provider, user_id = %integration.user_id, "access token refreshed");
        Ok(Some(integration))
    }

    async fn mark_reconnect_required(
        &self,
        mut integration: Integration,
        reason: &str,
    ) -> ProviderError {
        let provider = integration.provider;
        integration.sync_status = SyncStatus::Error;
        integration.sync_error = Some(format!("reconnect required: {reason}"));
        if let Err(e) = self.store.upsert_integration(&integration).await {
            tracing::error!(%provider, error = %e, "failed to record reconnect-required state");
        }
        ProviderError::ReconnectRequired { provider }
    }

    /// Refresh every active integration whose token is inside its refresh
    /// buffer. Fatal failures are recorded on the integration and do not
    /// stop the pass.
    pub async fn refresh_all_expiring(&self) {
        let integrations = match self.store.list_active().await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(error = %e, "proactive refresh pass could not list integrations");
                return;
            }
        };

        for integration in integrations {
            if !Self::needs_refresh(&integration) {
                continue;
            }
            let user_id = integration.user_id;
            let provider = integration.provider;
            match self.refresh_access_token(user_id, provider).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!(%provider, %user_id, "proactive refresh deferred");
                }
                Err(e) => {
                    tracing::warn!(%provider, %user_id, error = %e, "proactive refresh failed");
                }
            }
        }
    }

    /// Disconnect a provider: best-effort token revocation upstream, then
    /// clear stored tokens and deactivate. Idempotent; a revocation failure
    /// never blocks local cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error only when the local store update fails
    pub async fn disconnect(&self, user_id: Uuid, provider: ProviderId) -> AppResult<()> {
        let Some(mut integration) = self.store.get_integration(user_id, provider).await? else {
            return Ok(());
        };
        if !integration.is_active {
            return Ok(());
        }

        if let Some(token) = &integration.access_token {
            if let Err(e) = self.revoke_token(provider, token).await {
                tracing::warn!(%provider, %user_id, error = %e, "token revocation failed, continuing disconnect");
            }
        }

        integration.access_token = None;
        integration.refresh_token = None;
        integration.token_expires_at = None;
        integration.is_active = false;
        integration.sync_status = SyncStatus::Idle;
        integration.sync_error = None;
        self.store.upsert_integration(&integration).await?;

        tracing::info!(%provider, %user_id, "provider disconnected");
        Ok(())
    }

    async fn revoke_token(&self, provider: ProviderId, token: &str) -> AppResult<()> {
        let strategy = OAuthStrategy::for_provider(provider);
        let creds = self.creds(provider)?;

        let request = match strategy.revoke_method {
            RevokeMethod::Get => {
                let mut url = url::Url::parse(strategy.revoke_url)
                    .map_err(|e| AppError::internal(format!("bad revoke url: {e}")))?;
                url.query_pairs_mut().append_pair("access_token", token);
                Self::apply_credentials(HttpRequest::get(String::from(url)), strategy, creds)
            }
            RevokeMethod::Post => {
                let mut fields = vec![("token".to_owned(), token.to_owned())];
                for (name, value) in strategy.revoke_extra_params {
                    fields.push(((*name).to_owned(), (*value).to_owned()));
                }
                if strategy.credential_placement == CredentialPlacement::RequestBody {
                    fields.push(("client_id".to_owned(), creds.client_id.clone()));
                    fields.push(("client_secret".to_owned(), creds.client_secret.clone()));
                }
                let request = HttpRequest::post_form(strategy.revoke_url, fields);
                if strategy.credential_placement == CredentialPlacement::BasicHeader {
                    Self::apply_credentials(request, strategy, creds)
                } else {
                    request
                }
            }
        };

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(AppError::external_service(
                provider.as_str(),
                format!("revocation returned status {}", response.status),
            ));
        }
        Ok(())
    }

    /// User-visible connection status for a pair
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails
    pub async fn connection_status(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> AppResult<ConnectionStatus> {
        let Some(integration) = self
            .store
            .get_integration(user_id, provider)
            .await?
            .filter(|i| i.is_active)
        else {
            return Ok(ConnectionStatus::disconnected());
        };

        Ok(ConnectionStatus {
            connected: true,
            sync_status: Some(integration.sync_status),
            last_synced_at: integration.last_synced_at,
            error: integration.sync_error,
        })
    }

    /// Send a token-endpoint request with credentials placed per the
    /// provider's dialect. Transport failures surface as transient.
    async fn token_endpoint_request(
        &self,
        strategy: &OAuthStrategy,
        creds: &OAuthClientConfig,
        mut fields: Vec<(String, String)>,
    ) -> ProviderResult<HttpResponse> {
        for (name, value) in strategy.token_extra_params {
            fields.push(((*name).to_owned(), (*value).to_owned()));
        }
        if strategy.credential_placement == CredentialPlacement::RequestBody {
            fields.push(("client_id".to_owned(), creds.client_id.clone()));
            fields.push(("client_secret".to_owned(), creds.client_secret.clone()));
        }

        let mut request = HttpRequest::post_form(strategy.token_url, fields);
        if strategy.credential_placement == CredentialPlacement::BasicHeader {
            request = Self::apply_credentials(request, strategy, creds);
        }

        self.transport
            .execute(request)
            .await
            .map_err(|e| ProviderError::Transient {
                provider: strategy.provider,
                message: crate::logging::truncate_body(&e.to_string(), ERROR_BODY_MAX_LEN),
            })
    }

    fn apply_credentials(
        request: HttpRequest,
        strategy: &OAuthStrategy,
        creds: &OAuthClientConfig,
    ) -> HttpRequest {
        match strategy.credential_placement {
            CredentialPlacement::BasicHeader => {
                let encoded =
                    STANDARD.encode(format!("{}:{}", creds.client_id, creds.client_secret));
                request.with_header("Authorization", format!("Basic {encoded}"))
            }
            CredentialPlacement::RequestBody => request,
        }
    }
}
