//! Library entrypoint for coinsentry.
//!
//! The price-alert monitoring core lives here so integration tests under
//! `tests/` can drive the engine, evaluator, and price source directly
//! with injected collaborators.

pub mod config;
pub mod models;
pub mod services;
