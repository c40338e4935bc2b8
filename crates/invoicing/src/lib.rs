//! `tradeflow-invoicing` — customer billing documents.
//!
//! SalesInvoice (direct, order-linked or delivery-linked) and CreditNote
//! (the post-invoice return/refund document). Both gate CREDIT clients
//! through `tradeflow-parties` and emit balance effects alongside their
//! stock effects.

pub mod credit_note;
pub mod invoice;

pub use credit_note::{CreditNote, CreditNoteLine, CreditNoteStatus, NewCreditLine};
pub use invoice::{
    NewInvoiceItem, SalesInvoice, SalesInvoiceItem, SalesInvoiceItemId, SalesInvoiceStatus,
    VoidPolicy,
};
