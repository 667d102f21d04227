// ABOUTME: HTTP transport trait decoupling provider clients from reqwest
// ABOUTME: Production transport wraps a shared reqwest client with timeouts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Outbound HTTP seam.
//!
//! Provider clients and the token lifecycle speak to the network through
//! [`HttpTransport`] rather than a concrete client, so tests can script
//! exact response sequences (401 then 200, quota headers, timeouts) without
//! a live server. A transport error means the request may not have reached
//! the provider at all; non-2xx responses come back as ordinary
//! [`HttpResponse`] values for the caller to classify.

use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// HTTP method subset used against provider APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// DELETE request
    Delete,
}

/// Request body payloads
#[derive(Debug, Clone)]
pub enum HttpBody {
    /// `application/x-www-form-urlencoded` fields
    Form(Vec<(String, String)>),
    /// `application/json` payload
    Json(serde_json::Value),
}

/// One outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Absolute URL including query string
    pub url: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Optional body
    pub body: Option<HttpBody>,
}

impl HttpRequest {
    /// GET request with no headers or body
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// POST request with form-encoded fields
    #[must_use]
    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(HttpBody::Form(fields)),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One provider response with headers normalized to lowercase names
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Response body as text
    pub body: String,
}

impl HttpResponse {
    /// True for 2xx statuses
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Header lookup by lowercase name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Transport abstraction over the HTTP client
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute one request
    ///
    /// # Errors
    ///
    /// Returns an error only for transport failures (connect, timeout, TLS).
    /// Non-2xx responses are returned as values.
    async fn execute(&self, request: HttpRequest) -> AppResult<HttpResponse>;
}

/// Production transport over a shared `reqwest` client
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given request and connect timeouts
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed
    pub fn new(timeout: Duration, connect_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> AppResult<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match request.body {
            Some(HttpBody::Form(fields)) => builder.form(&fields),
            Some(HttpBody::Json(value)) => builder.json(&value),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::external_service("http", format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_owned()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::external_service("http", format!("failed to read body: {e}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_lowercase() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_owned(), "30".to_owned());
        let response = HttpResponse {
            status: 429,
            headers,
            body: String::new(),
        };
        assert_eq!(response.header("retry-after"), Some("30"));
        assert!(!response.is_success());
    }
}
