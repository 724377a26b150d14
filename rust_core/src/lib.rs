//! Pick 4 Core - weekly settlement engine for the Baseball Pick 4 pool.
//!
//! This crate provides:
//! - MLB Stats API client for schedules, boxscores, and rosters
//! - Result ingestion with slate filtering and in-memory aggregation
//! - Scoring of weekly picks against ingested results
//! - Winner determination with cross-team pooled payouts and rollover
//! - Full-recompute standings aggregation with streaks and rankings
//! - Balance and append-only transaction ledger operations
//! - Payment intake with exact 80/10/10 pot splits
//!
//! All money math uses integer cents ([`utils::money::Money`]); the
//! settlement stages are idempotent and safe to re-run.

pub mod clients;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::SettlementError;
pub use utils::money::Money;
