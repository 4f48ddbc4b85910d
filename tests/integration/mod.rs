//! Integration test suite for refit
//!
//! End-to-end tests driving the update engine against temporary
//! installations and in-memory or `file://` release servers.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **upgrade**: Version checks, reconciliation, backup and rollback
//! - **migration**: Schema migration scripts and their rollback
//! - **query**: The component checksum query
//! - **cli**: The `refit` binary

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod migration;
mod query;
mod upgrade;
