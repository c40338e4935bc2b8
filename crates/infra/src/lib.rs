//! `tradeflow-infra` — the transactional engine over the pure domain crates.
//!
//! Every mutation runs the same pipeline: load the document, run its pure
//! transition, apply the declared effects to the inventory ledger and client
//! balances all-or-nothing, then commit the new document version together
//! with its change-history snapshot. A single engine lock serializes
//! mutations; callers hitting contention get a retryable error instead of
//! blocking forever.

pub mod engine;
pub mod state;

pub use engine::{Engine, EngineConfig};
pub use state::EngineState;

#[cfg(test)]
mod integration_tests;
