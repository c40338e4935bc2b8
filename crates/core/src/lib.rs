//! `tradeflow-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod document;
pub mod effect;
pub mod error;
pub mod id;

pub use document::{Document, EntityKind, Transition};
pub use effect::{Effect, StockKey};
pub use error::{require_reason, DomainError, DomainResult};
pub use id::{
    BatchNo, ClientId, DocumentId, ProductId, SupplierId, UserId, VariantId, WarehouseId,
};
