use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradeflow_core::{
    Document, DocumentId, DomainError, DomainResult, EntityKind, ProductId, SupplierId,
    Transition, VariantId, require_reason,
};

use crate::cost::AdditionalCost;

/// Purchase order line identifier, referenced by GRN lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoItemId(Uuid);

impl PoItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PoItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PoItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Pending,
    InTransit,
    Received,
    Cancelled,
}

/// Order line: product, ordered quantity, agreed unit cost, cumulative
/// received quantity maintained by GRN transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoItem {
    pub id: PoItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub ordered_qty: i64,
    pub unit_cost: f64,
    pub received_qty: i64,
}

impl PoItem {
    pub fn remaining(&self) -> i64 {
        self.ordered_qty - self.received_qty
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_qty >= self.ordered_qty
    }

    pub fn product_cost(&self) -> f64 {
        self.ordered_qty as f64 * self.unit_cost
    }
}

/// Input line for `PurchaseOrder::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPoItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub ordered_qty: i64,
    pub unit_cost: f64,
}

/// Import/shipping metadata carried by container orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMetadata {
    pub container_no: Option<String>,
    pub ship_date: Option<DateTime<Utc>>,
    pub expected_arrival_date: Option<DateTime<Utc>>,
}

/// Purchase order document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: DocumentId,
    supplier_id: SupplierId,
    order_date: DateTime<Utc>,
    status: PurchaseOrderStatus,
    items: Vec<PoItem>,
    costs: Vec<AdditionalCost>,
    import: ImportMetadata,
    cancel_reason: Option<String>,
    version: u64,
}

impl PurchaseOrder {
    pub fn create(
        id: DocumentId,
        supplier_id: SupplierId,
        order_date: DateTime<Utc>,
        items: Vec<NewPoItem>,
        import: ImportMetadata,
    ) -> DomainResult<Self> {
        if items.is_empty() {
            return Err(DomainError::validation(
                "purchase order must have at least one item",
            ));
        }
        for item in &items {
            if item.ordered_qty <= 0 {
                return Err(DomainError::validation(format!(
                    "ordered quantity must be positive (got {})",
                    item.ordered_qty
                )));
            }
            if item.unit_cost < 0.0 {
                return Err(DomainError::validation(format!(
                    "unit cost cannot be negative (got {})",
                    item.unit_cost
                )));
            }
        }

        Ok(Self {
            id,
            supplier_id,
            order_date,
            status: PurchaseOrderStatus::Pending,
            items: items
                .into_iter()
                .map(|i| PoItem {
                    id: PoItemId::new(),
                    product_id: i.product_id,
                    variant_id: i.variant_id,
                    ordered_qty: i.ordered_qty,
                    unit_cost: i.unit_cost,
                    received_qty: 0,
                })
                .collect(),
            costs: Vec::new(),
            import,
            cancel_reason: None,
            version: 0,
        })
    }

    pub fn supplier_id(&self) -> SupplierId {
        self.supplier_id
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[PoItem] {
        &self.items
    }

    pub fn item(&self, item_id: PoItemId) -> Option<&PoItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn costs(&self) -> &[AdditionalCost] {
        &self.costs
    }

    pub fn import(&self) -> &ImportMetadata {
        &self.import
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Goods may only be received against PENDING or IN_TRANSIT orders.
    pub fn is_receivable(&self) -> bool {
        matches!(
            self.status,
            PurchaseOrderStatus::Pending | PurchaseOrderStatus::InTransit
        )
    }

    fn derived_status(&self) -> PurchaseOrderStatus {
        if !self.items.is_empty() && self.items.iter().all(PoItem::is_fully_received) {
            PurchaseOrderStatus::Received
        } else if self.import.ship_date.is_some() {
            PurchaseOrderStatus::InTransit
        } else {
            PurchaseOrderStatus::Pending
        }
    }

    /// PENDING → IN_TRANSIT. Records the ship date (defaulting to the
    /// transition time) so later receipt reversals settle back here rather
    /// than PENDING.
    pub fn mark_in_transit(&self, ship_date: Option<DateTime<Utc>>) -> DomainResult<Transition<Self>> {
        if self.status != PurchaseOrderStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "only PENDING purchase orders can be marked in transit (status: {:?})",
                self.status
            )));
        }
        let mut next = self.clone();
        next.status = PurchaseOrderStatus::InTransit;
        next.import.ship_date = Some(ship_date.unwrap_or_else(Utc::now));
        Ok(Transition::pure(next))
    }

    /// Cancel an unfulfilled order. Rejected once any quantity has been
    /// received — cancel the GRNs first so stock reconciles.
    pub fn cancel(&self, reason: &str) -> DomainResult<Transition<Self>> {
        if !self.is_receivable() {
            return Err(DomainError::invalid_transition(format!(
                "only PENDING or IN_TRANSIT purchase orders can be cancelled (status: {:?})",
                self.status
            )));
        }
        if self.items.iter().any(|i| i.received_qty > 0) {
            return Err(DomainError::invalid_transition(
                "purchase order has received quantities; cancel its goods receipts first",
            ));
        }
        let reason = require_reason(reason, "purchase order cancellation")?;
        let mut next = self.clone();
        next.status = PurchaseOrderStatus::Cancelled;
        next.cancel_reason = Some(reason);
        Ok(Transition::pure(next))
    }

    /// Record received quantities from a completed GRN. Each line increments
    /// the matching item's cumulative received quantity; the order
    /// auto-advances to RECEIVED once every item is fully received.
    ///
    /// Over-receipt is validated by GRN creation; this guards again so the
    /// ledger and the order can never disagree.
    pub fn record_receipt(&self, lines: &[(PoItemId, i64)]) -> DomainResult<Transition<Self>> {
        if !self.is_receivable() {
            return Err(DomainError::invalid_transition(format!(
                "cannot receive goods for {:?} purchase order",
                self.status
            )));
        }
        let mut next = self.clone();
        for (item_id, qty) in lines {
            let item = next
                .items
                .iter_mut()
                .find(|i| i.id == *item_id)
                .ok_or_else(|| DomainError::not_found(format!("PO item {item_id}")))?;
            let remaining = item.remaining();
            if *qty > remaining {
                return Err(DomainError::over_receipt(format!(
                    "quantity {qty} exceeds remaining ordered quantity ({remaining})"
                )));
            }
            item.received_qty += qty;
        }
        next.status = next.derived_status();
        Ok(Transition::pure(next))
    }

    /// Reverse previously recorded receipts (GRN cancellation). Decrements
    /// received quantities and recomputes status, stepping back out of
    /// RECEIVED when the order is no longer fully received.
    pub fn revert_receipt(&self, lines: &[(PoItemId, i64)]) -> DomainResult<Transition<Self>> {
        if self.status == PurchaseOrderStatus::Cancelled {
            return Err(DomainError::invalid_transition(
                "cannot revert receipts on a cancelled purchase order",
            ));
        }
        let mut next = self.clone();
        for (item_id, qty) in lines {
            let item = next
                .items
                .iter_mut()
                .find(|i| i.id == *item_id)
                .ok_or_else(|| DomainError::not_found(format!("PO item {item_id}")))?;
            if *qty > item.received_qty {
                return Err(DomainError::validation(format!(
                    "cannot revert {qty}: only {} received on this line",
                    item.received_qty
                )));
            }
            item.received_qty -= qty;
        }
        next.status = next.derived_status();
        Ok(Transition::pure(next))
    }

    /// Append an additional cost. Legal while the order is cost-eligible
    /// (IN_TRANSIT or RECEIVED); landed cost is recomputed on demand, never
    /// cached.
    pub fn add_cost(&self, cost: AdditionalCost) -> DomainResult<Transition<Self>> {
        if !matches!(
            self.status,
            PurchaseOrderStatus::InTransit | PurchaseOrderStatus::Received
        ) {
            return Err(DomainError::invalid_transition(format!(
                "costs can only be added to IN_TRANSIT or RECEIVED purchase orders (status: {:?})",
                self.status
            )));
        }
        let mut next = self.clone();
        next.costs.push(cost);
        Ok(Transition::pure(next))
    }
}

impl Document for PurchaseOrder {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::PurchaseOrder
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled
        )
    }
}
