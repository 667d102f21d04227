// ABOUTME: Sync module organizing the engine and the idempotent upserter
// ABOUTME: One engine instance serves periodic, webhook and backfill triggers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 VitalSync contributors

//! Health data synchronization.

/// Sync pass orchestration
pub mod engine;
/// Idempotent record persistence
pub mod upsert;

pub use engine::{SyncEngine, SyncOutcome};
pub use upsert::{DataUpserter, UpsertStats};
