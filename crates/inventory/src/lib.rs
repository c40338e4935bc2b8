//! `tradeflow-inventory` — the shared inventory ledger.
//!
//! Single source of truth for stock quantities across all document types:
//! a keyed store at (product, variant, warehouse, batch) granularity with
//! atomic read-modify-write operations. Injected into the engine as a plain
//! value; synchronization lives at the transaction boundary, not here.

pub mod ledger;
pub mod movement;

pub use ledger::{InventoryLedger, StockLevel};
pub use movement::{MovementLog, MovementType, StockMovement};
