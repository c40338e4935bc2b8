//! `tradeflow-purchasing` — procure-to-pay document state machines.
//!
//! PurchaseOrder → GoodsReceiptNote → PurchaseInvoice, plus the two read-side
//! calculators that run against committed purchase state: the landed-cost
//! allocator and the three-way-match comparator.

pub mod cost;
pub mod invoice;
pub mod landed_cost;
pub mod matching;
pub mod order;
pub mod receipt;

pub use cost::{AdditionalCost, CostType};
pub use invoice::{PurchaseInvoice, PurchaseInvoiceItem, PurchaseInvoiceStatus};
pub use landed_cost::{CostEntry, CostSource, CostableLine, LandedCost, LandedCostLine};
pub use matching::{three_way_match, MatchReport, MatchRow, COST_TOLERANCE};
pub use order::{ImportMetadata, NewPoItem, PoItem, PoItemId, PurchaseOrder, PurchaseOrderStatus};
pub use receipt::{GoodsReceiptNote, GrnItem, NewGrnLine, GrnStatus};
