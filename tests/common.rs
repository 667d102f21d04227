// ABOUTME: Shared test fixtures: scripted HTTP transport and a wired service harness
// ABOUTME: Lets tests script exact provider response sequences without a live server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;
use vitalsync::cache::{memory::InMemoryCache, CacheConfig, CacheProvider};
use vitalsync::config::OAuthClientConfig;
use vitalsync::errors::{AppError, AppResult};
use vitalsync::models::{Integration, ProviderId};
use vitalsync::oauth::TokenLifecycleManager;
use vitalsync::providers::client::ProviderApiClient;
use vitalsync::providers::transport::{HttpRequest, HttpResponse, HttpTransport};
use vitalsync::rate_limiting::ProviderRateLimiter;
use vitalsync::store::{InMemoryStore, IntegrationStore};

enum Scripted {
    Response(HttpResponse),
    TransportError(String),
}

/// Transport that replays a scripted response sequence and records every
/// request it receives
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.push_with_headers(status, body, &[]);
    }

    pub fn push_json(&self, status: u16, body: &serde_json::Value) {
        self.push_with_headers(status, &body.to_string(), &[]);
    }

    pub fn push_with_headers(&self, status: u16, body: &str, headers: &[(&str, &str)]) {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.to_lowercase(), (*value).to_owned()))
            .collect();
        let mut queue = self.responses.lock().unwrap();
        queue.push_back(Scripted::Response(HttpResponse {
            status,
            headers,
            body: body.to_owned(),
        }));
    }

    pub fn push_transport_error(&self, message: &str) {
        let mut queue = self.responses.lock().unwrap();
        queue.push_back(Scripted::TransportError(message.to_owned()));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> AppResult<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::TransportError(message)) => {
                Err(AppError::external_service("http", message))
            }
            None => Err(AppError::internal("no scripted response remaining")),
        }
    }
}

/// Standard OAuth token response body
pub fn token_json(access: &str, refresh: &str, expires_in: u64) -> serde_json::Value {
    serde_json::json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": expires_in,
        "scope": "activity sleep",
        "user_id": "PROVIDER-USER"
    })
}

fn test_credentials() -> HashMap<ProviderId, OAuthClientConfig> {
    ProviderId::ALL
        .into_iter()
        .map(|provider| {
            (
                provider,
                OAuthClientConfig {
                    client_id: format!("cid-{provider}"),
                    client_secret: format!("secret-{provider}"),
                    redirect_uri: format!("http://localhost:8080/oauth/callback/{provider}"),
                    webhook_secret: Some(format!("whsec-{provider}")),
                },
            )
        })
        .collect()
}

/// Fully wired service stack over in-memory backends and a scripted transport
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub cache: InMemoryCache,
    pub transport: Arc<ScriptedTransport>,
    pub tokens: Arc<TokenLifecycleManager<InMemoryCache>>,
}

impl Harness {
    pub async fn new() -> anyhow::Result<Self> {
        let store = Arc::new(InMemoryStore::default());
        let cache = InMemoryCache::new(CacheConfig::for_tests()).await?;
        let transport = ScriptedTransport::new();
        let tokens = Arc::new(TokenLifecycleManager::new(
            store.clone() as Arc<dyn IntegrationStore>,
            transport.clone(),
            cache.clone(),
            test_credentials(),
        ));
        Ok(Self {
            store,
            cache,
            transport,
            tokens,
        })
    }

    pub fn client(&self) -> ProviderApiClient<InMemoryCache> {
        ProviderApiClient::new(
            self.transport.clone(),
            self.tokens.clone(),
            ProviderRateLimiter::new(self.cache.clone()),
        )
    }

    pub fn limiter(&self) -> ProviderRateLimiter<InMemoryCache> {
        ProviderRateLimiter::new(self.cache.clone())
    }

    /// Seed a connected integration with tokens expiring `expires_in_secs`
    /// from now
    pub async fn seed_integration(
        &self,
        provider: ProviderId,
        expires_in_secs: i64,
        provider_user_id: &str,
    ) -> anyhow::Result<Integration> {
        let mut integration = Integration::new(Uuid::new_v4(), provider);
        integration.access_token = Some("access-old".to_owned());
        integration.refresh_token = Some("refresh-old".to_owned());
        integration.token_expires_at = Some(Utc::now() + ChronoDuration::seconds(expires_in_secs));
        integration.set_metadata(
            Integration::META_PROVIDER_USER_ID,
            serde_json::json!(provider_user_id),
        );
        self.store.upsert_integration(&integration).await?;
        Ok(integration)
    }
}
