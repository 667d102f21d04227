// ABOUTME: Multi-provider health data synchronization engine library root
// ABOUTME: OAuth token lifecycle, rate limiting, sync engine and webhook handling
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! VitalSync keeps wearable health data flowing from Fitbit, Whoop, Oura
//! and Withings into one normalized store.
//!
//! The library is organized around a handful of explicitly constructed
//! services, wired together at process start and passed by reference:
//!
//! - [`oauth::TokenLifecycleManager`] owns connect, refresh, revoke and
//!   status for every provider, driven by per-provider dialect strategies.
//! - [`providers::client::ProviderApiClient`] makes authenticated calls
//!   with a uniform retry, quota and pagination policy.
//! - [`rate_limiting::ProviderRateLimiter`] enforces local request budgets
//!   and fails open when the cache is unavailable.
//! - [`sync::SyncEngine`] runs periodic, webhook-triggered and backfill
//!   passes with idempotent upserts.
//! - [`scheduler::JobScheduler`] drives the recurring passes.
//!
//! Persistence and caching sit behind the [`store`] and [`cache`] traits so
//! deployments choose their own backends.

/// Cache abstraction with in-memory and Redis backends
pub mod cache;
/// Environment-based configuration
pub mod config;
/// Application error types
pub mod errors;
/// Structured logging setup
pub mod logging;
/// Domain models
pub mod models;
/// OAuth token lifecycle
pub mod oauth;
/// Provider API integration
pub mod providers;
/// Outbound rate limiting
pub mod rate_limiting;
/// Background job scheduling
pub mod scheduler;
/// Persistence traits and in-memory implementation
pub mod store;
/// Sync orchestration
pub mod sync;
/// Webhook parsing and signature validation
pub mod webhooks;
