// ABOUTME: Configuration module organizing environment-based settings
// ABOUTME: All configuration is read from environment variables at startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Environment-only configuration.

/// Environment variable driven configuration types
pub mod environment;

pub use environment::{OAuthClientConfig, RedisConnectionConfig, ServerConfig};
