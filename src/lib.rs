//! Bridge relayer - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod chain;
pub mod config;
pub mod confirmation;
pub mod contracts;
pub mod dispatcher;
pub mod engine;
pub mod metrics;
pub mod retry_queue;
pub mod status;
pub mod testing;
pub mod types;
