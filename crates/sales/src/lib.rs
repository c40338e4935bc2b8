//! `tradeflow-sales` — order-to-cash document state machines.
//!
//! SalesOrder (quote-to-fulfilment tracking with credit gating) and
//! DeliveryNote (the stock-moving dispatch document). Invoicing lives in
//! `tradeflow-invoicing`; it feeds fulfilment back into the order through
//! the same per-line accrual used for deliveries.

pub mod delivery;
pub mod order;

pub use delivery::{DeliveryNote, DeliveryNoteStatus, DnItem, NewDnLine, NewStandaloneDnLine};
pub use order::{
    NewSoItem, PaymentType, SalesOrder, SalesOrderItemId, SalesOrderStatus, SoItem,
};
