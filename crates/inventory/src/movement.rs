use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeflow_core::{DocumentId, EntityKind, StockKey, UserId};

/// Why stock moved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Receipt,
    Delivery,
    Sale,
    SalesReturn,
    Adjustment,
}

/// One row of the stock-movement audit trail. Quantity is signed: receipts
/// and returns positive, deliveries/sales negative, reversals whichever
/// undoes the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub key: StockKey,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reference_kind: EntityKind,
    pub reference_id: DocumentId,
    pub actor: UserId,
    pub moved_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Append-only movement trail, recorded by the engine in the same
/// transaction as the ledger mutation it describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementLog {
    entries: Vec<StockMovement>,
}

impl MovementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, movement: StockMovement) {
        self.entries.push(movement);
    }

    pub fn entries(&self) -> &[StockMovement] {
        &self.entries
    }

    /// Movements referencing one document, in recorded order.
    pub fn for_reference(&self, reference_id: DocumentId) -> Vec<&StockMovement> {
        self.entries
            .iter()
            .filter(|m| m.reference_id == reference_id)
            .collect()
    }

    /// Net signed quantity for a ledger line across the whole trail.
    pub fn net_for_line(&self, key: &StockKey) -> i64 {
        self.entries
            .iter()
            .filter(|m| m.key.same_line(key))
            .map(|m| m.quantity)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradeflow_core::{ProductId, WarehouseId};

    #[test]
    fn net_for_line_sums_signed_quantities() {
        let mut log = MovementLog::new();
        let key = StockKey::new(ProductId::new(), WarehouseId::new());
        let actor = UserId::new();
        let doc = DocumentId::new();

        log.record(StockMovement {
            key: key.clone(),
            movement_type: MovementType::Receipt,
            quantity: 50,
            reference_kind: EntityKind::GoodsReceiptNote,
            reference_id: doc,
            actor,
            moved_at: Utc::now(),
            notes: None,
        });
        log.record(StockMovement {
            key: key.clone(),
            movement_type: MovementType::Delivery,
            quantity: -20,
            reference_kind: EntityKind::DeliveryNote,
            reference_id: DocumentId::new(),
            actor,
            moved_at: Utc::now(),
            notes: None,
        });

        assert_eq!(log.net_for_line(&key), 30);
        assert_eq!(log.for_reference(doc).len(), 1);
    }
}
