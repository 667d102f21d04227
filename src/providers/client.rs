// ABOUTME: Authenticated provider API client with retry, quota and pagination policy
// ABOUTME: At most one 401-driven retry per call, 429 is surfaced never retried
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Authenticated calls against provider APIs.
//!
//! Every outbound data request flows through [`ProviderApiClient::call`],
//! which enforces one policy for all providers:
//!
//! 1. The local rate bucket is consulted first, before the token is even
//!    resolved; an exhausted bucket denies the call without network I/O,
//!    and a refresh is itself network I/O. A unit spent on a call that
//!    then fails before any request is sent is refunded.
//! 2. An access-token rejection (a 401, or the provider dialect's in-body
//!    equivalent) triggers exactly one forced refresh and retry. A second
//!    rejection is a definitive auth failure, so one user call costs at
//!    most two outbound requests.
//! 3. A 429 is surfaced with its `retry-after`, never retried here, and
//!    zeroes the local bucket so sibling tasks stop calling too.
//! 4. Authoritative quota headers overwrite the local bucket.
//!
//! Pagination walks opaque provider cursors and is capped so a provider bug
//! echoing the same cursor cannot loop forever.

use crate::cache::CacheProvider;
use crate::logging::truncate_body;
use crate::models::ProviderId;
use crate::oauth::{OAuthStrategy, TokenLifecycleManager};
use crate::providers::errors::{ProviderError, ProviderResult};
use crate::providers::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limiting::{ProviderRateLimiter, RateLimitDecision, RateLimitPolicy};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Hard cap on pages walked per paginated call
pub const MAX_PAGES: usize = 10;

const ERROR_BODY_MAX_LEN: usize = 256;

/// Authoritative quota header names for a provider, when it publishes them
#[must_use]
pub const fn quota_headers(provider: ProviderId) -> Option<(&'static str, &'static str)> {
    match provider {
        ProviderId::Fitbit => Some(("fitbit-rate-limit-remaining", "fitbit-rate-limit-reset")),
        ProviderId::Whoop | ProviderId::Oura | ProviderId::Withings => None,
    }
}

/// Shared client for authenticated provider API calls
pub struct ProviderApiClient<C: CacheProvider> {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenLifecycleManager<C>>,
    limiter: ProviderRateLimiter<C>,
}

impl<C: CacheProvider> ProviderApiClient<C> {
    /// Create a client over the shared transport, token manager and limiter
    pub const fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenLifecycleManager<C>>,
        limiter: ProviderRateLimiter<C>,
    ) -> Self {
        Self {
            transport,
            tokens,
            limiter,
        }
    }

    /// The token lifecycle manager backing this client
    #[must_use]
    pub fn tokens(&self) -> &TokenLifecycleManager<C> {
        &self.tokens
    }

    /// Execute one authenticated request. `build` receives a valid access
    /// token and produces the request; it is invoked again with a fresh
    /// token on the single permitted auth-rejection retry.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] classifying every failure mode
    pub async fn call<F, Fut>(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        build: F,
    ) -> ProviderResult<HttpResponse>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = ProviderResult<HttpRequest>> + Send,
    {
        if let RateLimitDecision::Denied { retry_after_secs } =
            self.limiter.check_and_increment(provider, user_id).await
        {
            return Err(ProviderError::RateLimitExceeded {
                provider,
                retry_after_secs,
            });
        }

        let token = match self.tokens.get_access_token(user_id, provider).await {
            Ok(token) => token,
            Err(e) => {
                // Nothing went out; give the spent unit back.
                self.limiter.refund(provider, user_id).await;
                return Err(e);
            }
        };
        let request = match build(token.clone()).await {
            Ok(request) => request,
            Err(e) => {
                self.limiter.refund(provider, user_id).await;
                return Err(e);
            }
        };
        let response = self.execute(provider, request).await?;
        self.apply_quota_headers(provider, user_id, &response).await;

        let auth_rejected = OAuthStrategy::for_provider(provider).is_auth_rejected;
        if !auth_rejected(response.status, &response.body) {
            return self.classify(provider, user_id, response).await;
        }

        // One forced refresh, one retry. A refresh that cannot complete is
        // transient; a second rejection is definitive.
        tracing::debug!(%provider, %user_id, "access token rejected, refreshing and retrying once");
        let refreshed = self
            .tokens
            .refresh_after_rejection(user_id, provider, &token)
            .await?
            .and_then(|i| i.access_token)
            .ok_or(ProviderError::Transient {
                provider,
                message: "token refresh could not be completed".into(),
            })?;

        let retry_request = build(refreshed).await?;
        let retry_response = self.execute(provider, retry_request).await?;
        self.apply_quota_headers(provider, user_id, &retry_response)
            .await;

        if auth_rejected(retry_response.status, &retry_response.body) {
            return Err(ProviderError::AuthenticationFailed {
                provider,
                reason: "access token still rejected after refresh".into(),
            });
        }
        self.classify(provider, user_id, retry_response).await
    }

    /// Walk a paginated endpoint. `build` receives the access token and the
    /// current cursor (`None` for the first page); `next_cursor` extracts
    /// the opaque continuation from a page, `None` ending the walk.
    ///
    /// # Errors
    ///
    /// Returns the first page-level error; earlier pages are discarded
    pub async fn call_paginated<F, Fut>(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        build: F,
        next_cursor: fn(&HttpResponse) -> Option<String>,
    ) -> ProviderResult<Vec<HttpResponse>>
    where
        F: Fn(String, Option<String>) -> Fut + Send + Sync,
        Fut: Future<Output = ProviderResult<HttpRequest>> + Send,
    {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        for page_index in 0..MAX_PAGES {
            let current = cursor.clone();
            let response = self
                .call(user_id, provider, |token| build(token, current.clone()))
                .await?;
            cursor = next_cursor(&response);
            pages.push(response);

            match cursor {
                Some(_) => {}
                None => return Ok(pages),
            }
            if page_index + 1 == MAX_PAGES {
                tracing::warn!(
                    %provider,
                    %user_id,
                    "pagination cap reached with a continuation still present"
                );
            }
        }
        Ok(pages)
    }

    async fn execute(
        &self,
        provider: ProviderId,
        request: HttpRequest,
    ) -> ProviderResult<HttpResponse> {
        self.transport
            .execute(request)
            .await
            .map_err(|e| ProviderError::Transient {
                provider,
                message: e.to_string(),
            })
    }

    async fn apply_quota_headers(
        &self,
        provider: ProviderId,
        user_id: Uuid,
        response: &HttpResponse,
    ) {
        let Some((remaining_header, reset_header)) = quota_headers(provider) else {
            return;
        };
        let remaining = response.header(remaining_header).and_then(|v| v.parse().ok());
        let reset = response.header(reset_header).and_then(|v| v.parse().ok());
        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            self.limiter
                .update_from_headers(provider, user_id, remaining, reset)
                .await;
        }
    }

    async fn classify(
        &self,
        provider: ProviderId,
        user_id: Uuid,
        response: HttpResponse,
    ) -> ProviderResult<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }

        if response.status == 429 {
            let retry_after_secs = response
                .header("retry-after")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| RateLimitPolicy::for_provider(provider).window.as_secs());
            // Stop local traffic for the rest of the window.
            self.limiter
                .update_from_headers(provider, user_id, 0, retry_after_secs)
                .await;
            return Err(ProviderError::RateLimitExceeded {
                provider,
                retry_after_secs,
            });
        }

        Err(ProviderError::ApiError {
            provider,
            status_code: response.status,
            message: truncate_body(&response.body, ERROR_BODY_MAX_LEN),
            retryable: response.status >= 500,
        })
    }
}
