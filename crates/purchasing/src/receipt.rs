use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    BatchNo, Document, DocumentId, DomainError, DomainResult, Effect, EntityKind, StockKey,
    Transition, UserId, WarehouseId, require_reason,
};

use crate::cost::AdditionalCost;
use crate::order::{PoItemId, PurchaseOrder};

/// GRN status. Receipts are born COMPLETED (goods are on the shelf the
/// moment the note is posted); CANCELLED is the reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrnStatus {
    Completed,
    Cancelled,
}

/// Received line, bound to the PO line it fulfils.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrnItem {
    pub po_item_id: PoItemId,
    pub received_qty: i64,
    pub batch_no: BatchNo,
    pub bin_location: Option<String>,
}

/// Input line for `GoodsReceiptNote::create`. A missing batch number gets a
/// dated one generated from the receipt date and line position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGrnLine {
    pub po_item_id: PoItemId,
    pub received_qty: i64,
    pub batch_no: Option<BatchNo>,
    pub bin_location: Option<String>,
}

/// Goods receipt note: the physical-arrival record against a purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodsReceiptNote {
    id: DocumentId,
    purchase_order_id: DocumentId,
    warehouse_id: WarehouseId,
    received_date: DateTime<Utc>,
    received_by: UserId,
    status: GrnStatus,
    items: Vec<GrnItem>,
    costs: Vec<AdditionalCost>,
    cancel_reason: Option<String>,
    version: u64,
}

impl GoodsReceiptNote {
    /// Post a receipt against `po`. Validates every line against the PO's
    /// remaining quantities, then emits one `StockReceive` per line. The
    /// caller applies the paired `po.record_receipt` transition in the same
    /// transaction.
    pub fn create(
        po: &PurchaseOrder,
        id: DocumentId,
        warehouse_id: WarehouseId,
        received_date: DateTime<Utc>,
        received_by: UserId,
        lines: Vec<NewGrnLine>,
    ) -> DomainResult<Transition<Self>> {
        if !po.is_receivable() {
            return Err(DomainError::invalid_transition(format!(
                "cannot receive goods for {:?} purchase order",
                po.status()
            )));
        }
        if lines.is_empty() {
            return Err(DomainError::validation(
                "goods receipt must have at least one line",
            ));
        }

        let mut items = Vec::with_capacity(lines.len());
        let mut effects = Vec::with_capacity(lines.len());
        for (idx, line) in lines.into_iter().enumerate() {
            if line.received_qty <= 0 {
                return Err(DomainError::validation(format!(
                    "received quantity must be positive (got {})",
                    line.received_qty
                )));
            }
            let po_item = po
                .item(line.po_item_id)
                .ok_or_else(|| DomainError::not_found(format!("PO item {}", line.po_item_id)))?;
            let remaining = po_item.remaining();
            if line.received_qty > remaining {
                return Err(DomainError::over_receipt(format!(
                    "cannot receive {} of {}: only {remaining} remaining on order",
                    line.received_qty, po_item.product_id
                )));
            }

            let batch_no = line.batch_no.unwrap_or_else(|| {
                BatchNo::generated(received_date.date_naive(), idx as u32 + 1)
            });
            let key = StockKey::new(po_item.product_id, warehouse_id)
                .with_variant(po_item.variant_id)
                .with_batch(Some(batch_no.clone()));
            effects.push(Effect::StockReceive {
                key,
                qty: line.received_qty,
                bin_location: line.bin_location.clone(),
            });
            items.push(GrnItem {
                po_item_id: line.po_item_id,
                received_qty: line.received_qty,
                batch_no,
                bin_location: line.bin_location,
            });
        }

        let grn = Self {
            id,
            purchase_order_id: po.id(),
            warehouse_id,
            received_date,
            received_by,
            status: GrnStatus::Completed,
            items,
            costs: Vec::new(),
            cancel_reason: None,
            version: 0,
        };
        Ok(Transition::with_effects(grn, effects))
    }

    pub fn purchase_order_id(&self) -> DocumentId {
        self.purchase_order_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn received_date(&self) -> DateTime<Utc> {
        self.received_date
    }

    pub fn received_by(&self) -> UserId {
        self.received_by
    }

    pub fn status(&self) -> GrnStatus {
        self.status
    }

    pub fn items(&self) -> &[GrnItem] {
        &self.items
    }

    pub fn costs(&self) -> &[AdditionalCost] {
        &self.costs
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Quantities received per PO line, for the paired order transition.
    pub fn receipt_lines(&self) -> Vec<(PoItemId, i64)> {
        self.items
            .iter()
            .map(|i| (i.po_item_id, i.received_qty))
            .collect()
    }

    /// Cancel the receipt: deducts the received batches back out of stock
    /// and (via the caller's paired `po.revert_receipt`) walks the order's
    /// received quantities back. Fails if the stock has since been shipped.
    pub fn cancel(&self, po: &PurchaseOrder, reason: &str) -> DomainResult<Transition<Self>> {
        if self.status != GrnStatus::Completed {
            return Err(DomainError::invalid_transition(format!(
                "only COMPLETED goods receipts can be cancelled (status: {:?})",
                self.status
            )));
        }
        let reason = require_reason(reason, "goods receipt cancellation")?;

        let mut effects = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let po_item = po
                .item(item.po_item_id)
                .ok_or_else(|| DomainError::not_found(format!("PO item {}", item.po_item_id)))?;
            let key = StockKey::new(po_item.product_id, self.warehouse_id)
                .with_variant(po_item.variant_id)
                .with_batch(Some(item.batch_no.clone()));
            effects.push(Effect::StockDeduct {
                key,
                qty: item.received_qty,
            });
        }

        let mut next = self.clone();
        next.status = GrnStatus::Cancelled;
        next.cancel_reason = Some(reason);
        Ok(Transition::with_effects(next, effects))
    }

    /// Append a receipt-scoped additional cost (e.g. local haulage).
    pub fn add_cost(&self, cost: AdditionalCost) -> DomainResult<Transition<Self>> {
        if self.status != GrnStatus::Completed {
            return Err(DomainError::invalid_transition(
                "costs can only be added to COMPLETED goods receipts",
            ));
        }
        let mut next = self.clone();
        next.costs.push(cost);
        Ok(Transition::pure(next))
    }
}

impl Document for GoodsReceiptNote {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::GoodsReceiptNote
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_terminal(&self) -> bool {
        self.status == GrnStatus::Cancelled
    }
}
