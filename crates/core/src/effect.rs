//! Declarative side-effect commands emitted by document transitions.
//!
//! State machines never touch the inventory ledger or client balances
//! directly: they return `Effect`s describing what must happen, and the
//! transactional engine applies them atomically alongside the document
//! mutation. This keeps every transition a pure function.

use serde::{Deserialize, Serialize};

use crate::id::{BatchNo, ClientId, ProductId, VariantId, WarehouseId};

/// Ledger key: per-warehouse, per-product(+variant+batch) granularity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub warehouse_id: WarehouseId,
    pub batch_no: Option<BatchNo>,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            variant_id: None,
            warehouse_id,
            batch_no: None,
        }
    }

    pub fn with_variant(mut self, variant_id: Option<VariantId>) -> Self {
        self.variant_id = variant_id;
        self
    }

    pub fn with_batch(mut self, batch_no: Option<BatchNo>) -> Self {
        self.batch_no = batch_no;
        self
    }

    /// True when `self` addresses the same product/variant/warehouse,
    /// ignoring batch (availability checks sum across batches).
    pub fn same_line(&self, other: &StockKey) -> bool {
        self.product_id == other.product_id
            && self.variant_id == other.variant_id
            && self.warehouse_id == other.warehouse_id
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)?;
        if let Some(batch) = &self.batch_no {
            write!(f, "#{batch}")?;
        }
        Ok(())
    }
}

/// Side-effect command consumed by the inventory ledger and credit control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Remove stock. Fails the whole batch with `InsufficientStock` if the
    /// key lacks enough quantity.
    StockDeduct { key: StockKey, qty: i64 },

    /// Return stock (reversal path). Always succeeds; creates the batch
    /// record when absent.
    StockRestore { key: StockKey, qty: i64 },

    /// Add newly received stock, creating the batch record when absent.
    StockReceive {
        key: StockKey,
        qty: i64,
        bin_location: Option<String>,
    },

    /// Increase a client's outstanding CREDIT balance.
    BalanceCharge { client_id: ClientId, amount: f64 },

    /// Reduce a client's outstanding CREDIT balance (void/return reversal).
    BalanceRelease { client_id: ClientId, amount: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_line_ignores_batch() {
        let key = StockKey::new(ProductId::new(), WarehouseId::new());
        let batched = key.clone().with_batch(Some(BatchNo::new("20250825-001")));
        assert!(key.same_line(&batched));
        assert_ne!(key, batched);
    }

    #[test]
    fn same_line_distinguishes_warehouses() {
        let product_id = ProductId::new();
        let a = StockKey::new(product_id, WarehouseId::new());
        let b = StockKey::new(product_id, WarehouseId::new());
        assert!(!a.same_line(&b));
    }
}
