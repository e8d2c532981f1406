//! powledger - A single-node proof-of-work ledger simulator
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Block headers, the chain, account/pool state and validation
//! - [`transaction`] - Transfer type and id derivation
//!
//! ## Consensus
//! - [`miner`] - Bounded, cancellable proof-of-work search
//!
//! ## Hashing
//! - [`crypto`] - The mixing hash behind every identifier
//!
//! ## Orchestration
//! - [`node`] - Shared ledger access for concurrent workers
//! - [`events`] - Observer side channel for reporting
//! - [`generator`] - Synthetic accounts and transfers
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Hashing
// ============================================================================
pub mod crypto;

// ============================================================================
// Orchestration
// ============================================================================
pub mod events;
pub mod generator;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
