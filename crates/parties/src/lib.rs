//! `tradeflow-parties` — client/supplier records and credit control.
//!
//! Master-data CRUD lives outside the core; this crate holds the read-side
//! records the engine consults (names, limits, terms) plus the one mutable
//! field the engine owns: the client's CREDIT balance.

pub mod client;
pub mod credit;
pub mod supplier;

pub use client::Client;
pub use credit::{CreditCheck, CreditOverride, CreditStatus, DEFAULT_WARNING_THRESHOLD};
pub use supplier::Supplier;
