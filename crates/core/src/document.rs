//! Document lifecycle trait and the transition outcome type.

use serde::{Deserialize, Serialize};

use crate::effect::Effect;
use crate::id::DocumentId;

/// Kind tag for tracked entities (documents plus the mutable master records
/// the engine versions). Used as the change-history scope and for rendering
/// blockers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    PurchaseOrder,
    GoodsReceiptNote,
    PurchaseInvoice,
    SalesOrder,
    DeliveryNote,
    SalesInvoice,
    CreditNote,
    Client,
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            EntityKind::PurchaseOrder => "PURCHASE_ORDER",
            EntityKind::GoodsReceiptNote => "GOODS_RECEIPT_NOTE",
            EntityKind::PurchaseInvoice => "PURCHASE_INVOICE",
            EntityKind::SalesOrder => "SALES_ORDER",
            EntityKind::DeliveryNote => "DELIVERY_NOTE",
            EntityKind::SalesInvoice => "SALES_INVOICE",
            EntityKind::CreditNote => "CREDIT_NOTE",
            EntityKind::Client => "CLIENT",
        };
        f.write_str(name)
    }
}

/// Minimal lifecycle interface every document implements.
///
/// Intentionally small so each module can model its own transitions as pure
/// functions without bringing in any infrastructure concerns.
pub trait Document {
    /// Returns the document identifier.
    fn id(&self) -> DocumentId;

    /// Kind tag (change-history scope).
    fn kind(&self) -> EntityKind;

    /// Monotonically increasing version of the document's state, bumped by
    /// the engine on each committed mutation.
    fn version(&self) -> u64;

    /// True once no further transitions are legal.
    fn is_terminal(&self) -> bool;
}

/// Outcome of a pure transition: the post-transition document plus the
/// declarative side effects the engine must apply in the same transaction.
///
/// Transitions must not mutate `self`; they return the evolved copy here.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<D> {
    pub document: D,
    pub effects: Vec<Effect>,
}

impl<D> Transition<D> {
    /// Transition with no ledger/credit side effects (status flips).
    pub fn pure(document: D) -> Self {
        Self {
            document,
            effects: Vec::new(),
        }
    }

    pub fn with_effects(document: D, effects: Vec<Effect>) -> Self {
        Self { document, effects }
    }
}
