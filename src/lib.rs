//! Trade Copilot Library
//!
//! Live trade ingestion for linked broker accounts: connection supervision,
//! position diffing, reconciliation, trade processing with behavioral
//! checks and scoring, and per-user event delivery.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod secrets;
pub mod task_runner;
