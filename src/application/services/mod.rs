pub mod broadcaster;
pub mod connection_registry;
pub mod keyed_locks;
pub mod reconciliation;
pub mod scoring_service;
pub mod trade_processor;
