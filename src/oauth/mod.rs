// ABOUTME: OAuth module organizing dialect strategies, flow state and the lifecycle manager
// ABOUTME: One manager instance serves every enabled provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! OAuth token lifecycle.

/// Token lifecycle manager
pub mod manager;
/// Single-use authorization flow state
pub mod state;
/// Per-provider OAuth dialects
pub mod strategy;

pub use manager::{AuthorizationRequest, TokenLifecycleManager};
pub use state::{AuthFlowState, AuthFlowStateStore, PkcePair};
pub use strategy::{CredentialPlacement, OAuthStrategy, RevokeMethod, TokenGrant};
