use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    BatchNo, ClientId, Document, DocumentId, DomainError, DomainResult, Effect, EntityKind,
    ProductId, StockKey, Transition, UserId, VariantId, WarehouseId, require_reason,
};

use crate::order::{SalesOrder, SalesOrderItemId};

/// PENDING (picked, not yet moved) → DISPATCHED (stock deducted) →
/// DELIVERED (customer signed). CANCELLED only from PENDING; once stock
/// has moved the reversal document is a credit note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryNoteStatus {
    Pending,
    Dispatched,
    Delivered,
    Cancelled,
}

/// Dispatch line, denormalized from the sales order line at creation so the
/// stock key can be built without re-reading the order. Standalone notes
/// carry no order line reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnItem {
    pub so_item_id: Option<SalesOrderItemId>,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    /// Specific batch to pick. `None` lets the ledger drain batches oldest
    /// first.
    pub batch_no: Option<BatchNo>,
}

/// Input line for `DeliveryNote::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDnLine {
    pub so_item_id: SalesOrderItemId,
    pub qty: i64,
    pub batch_no: Option<BatchNo>,
}

/// Input line for `DeliveryNote::create_standalone`, which has no order to
/// denormalize from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStandaloneDnLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    pub batch_no: Option<BatchNo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryNote {
    id: DocumentId,
    /// Absent on standalone notes raised without an order.
    sales_order_id: Option<DocumentId>,
    client_id: ClientId,
    warehouse_id: WarehouseId,
    status: DeliveryNoteStatus,
    items: Vec<DnItem>,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    dispatched_by: Option<UserId>,
    cancel_reason: Option<String>,
    version: u64,
}

impl DeliveryNote {
    /// Pick goods against a confirmed order. Validates each line against the
    /// order's remaining deliverable quantity; stock is only deducted later,
    /// at dispatch.
    pub fn create(
        so: &SalesOrder,
        id: DocumentId,
        created_at: DateTime<Utc>,
        lines: Vec<NewDnLine>,
    ) -> DomainResult<Self> {
        if !so.is_fulfillable() {
            return Err(DomainError::invalid_transition(format!(
                "cannot raise a delivery note against {:?} sales order",
                so.status()
            )));
        }
        if lines.is_empty() {
            return Err(DomainError::validation(
                "delivery note must have at least one line",
            ));
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "delivery quantity must be positive (got {})",
                    line.qty
                )));
            }
            let so_item = so.item(line.so_item_id).ok_or_else(|| {
                DomainError::not_found(format!("sales order item {}", line.so_item_id))
            })?;
            let remaining = so_item.remaining_deliverable();
            if line.qty > remaining {
                return Err(DomainError::validation(format!(
                    "cannot deliver {} of {}: only {remaining} remaining on order",
                    line.qty, so_item.product_id
                )));
            }
            items.push(DnItem {
                so_item_id: Some(line.so_item_id),
                product_id: so_item.product_id,
                variant_id: so_item.variant_id,
                qty: line.qty,
                batch_no: line.batch_no,
            });
        }

        Ok(Self {
            id,
            sales_order_id: Some(so.id()),
            client_id: so.client_id(),
            warehouse_id: so.warehouse_id(),
            status: DeliveryNoteStatus::Pending,
            items,
            created_at,
            dispatched_at: None,
            delivered_at: None,
            dispatched_by: None,
            cancel_reason: None,
            version: 0,
        })
    }

    /// Ship goods to a client with no order behind them. Same lifecycle as
    /// an order-linked note, but dispatch accrues nothing anywhere and the
    /// note cannot be invoiced from.
    pub fn create_standalone(
        id: DocumentId,
        client_id: ClientId,
        warehouse_id: WarehouseId,
        created_at: DateTime<Utc>,
        lines: Vec<NewStandaloneDnLine>,
    ) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "delivery note must have at least one line",
            ));
        }
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "delivery quantity must be positive (got {})",
                    line.qty
                )));
            }
            items.push(DnItem {
                so_item_id: None,
                product_id: line.product_id,
                variant_id: line.variant_id,
                qty: line.qty,
                batch_no: line.batch_no,
            });
        }

        Ok(Self {
            id,
            sales_order_id: None,
            client_id,
            warehouse_id,
            status: DeliveryNoteStatus::Pending,
            items,
            created_at,
            dispatched_at: None,
            delivered_at: None,
            dispatched_by: None,
            cancel_reason: None,
            version: 0,
        })
    }

    pub fn sales_order_id(&self) -> Option<DocumentId> {
        self.sales_order_id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn status(&self) -> DeliveryNoteStatus {
        self.status
    }

    pub fn items(&self) -> &[DnItem] {
        &self.items
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dispatched_at(&self) -> Option<DateTime<Utc>> {
        self.dispatched_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn dispatched_by(&self) -> Option<UserId> {
        self.dispatched_by
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Quantities per SO line, for the paired order accrual. Empty on
    /// standalone notes.
    pub fn delivery_lines(&self) -> Vec<(SalesOrderItemId, i64)> {
        self.items
            .iter()
            .filter_map(|i| i.so_item_id.map(|id| (id, i.qty)))
            .collect()
    }

    fn stock_key(&self, item: &DnItem) -> StockKey {
        StockKey::new(item.product_id, self.warehouse_id)
            .with_variant(item.variant_id)
            .with_batch(item.batch_no.clone())
    }

    /// PENDING → DISPATCHED. Emits one `StockDeduct` per line; the engine
    /// applies them all-or-nothing, so a short batch fails the whole
    /// dispatch with `InsufficientStock` and the note stays PENDING. The
    /// caller pairs this with `so.record_delivery(delivery_lines())`.
    pub fn dispatch(
        &self,
        dispatched_by: UserId,
        dispatched_at: DateTime<Utc>,
    ) -> DomainResult<Transition<Self>> {
        if self.status != DeliveryNoteStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "only PENDING delivery notes can be dispatched (status: {:?})",
                self.status
            )));
        }

        let effects = self
            .items
            .iter()
            .map(|item| Effect::StockDeduct {
                key: self.stock_key(item),
                qty: item.qty,
            })
            .collect();

        let mut next = self.clone();
        next.status = DeliveryNoteStatus::Dispatched;
        next.dispatched_at = Some(dispatched_at);
        next.dispatched_by = Some(dispatched_by);
        Ok(Transition::with_effects(next, effects))
    }

    /// DISPATCHED → DELIVERED. Proof-of-delivery flip; stock already moved.
    pub fn deliver(&self, delivered_at: DateTime<Utc>) -> DomainResult<Transition<Self>> {
        if self.status != DeliveryNoteStatus::Dispatched {
            return Err(DomainError::invalid_transition(format!(
                "only DISPATCHED delivery notes can be marked delivered (status: {:?})",
                self.status
            )));
        }
        let mut next = self.clone();
        next.status = DeliveryNoteStatus::Delivered;
        next.delivered_at = Some(delivered_at);
        Ok(Transition::pure(next))
    }

    /// Cancel an undispatched note. No stock effect; nothing has moved yet.
    pub fn cancel(&self, reason: &str) -> DomainResult<Transition<Self>> {
        if self.status != DeliveryNoteStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "only PENDING delivery notes can be cancelled (status: {:?})",
                self.status
            )));
        }
        let reason = require_reason(reason, "delivery note cancellation")?;
        let mut next = self.clone();
        next.status = DeliveryNoteStatus::Cancelled;
        next.cancel_reason = Some(reason);
        Ok(Transition::pure(next))
    }
}

impl Document for DeliveryNote {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::DeliveryNote
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DeliveryNoteStatus::Delivered | DeliveryNoteStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{NewSoItem, PaymentType};
    use tradeflow_core::ClientId;
    use tradeflow_parties::client::Client;
    use tradeflow_parties::credit::CreditOverride;

    fn confirmed_order(qty: i64) -> SalesOrder {
        let client = Client::new(ClientId::new(), "Acme Traders", 0.0, 30).unwrap();
        let so = SalesOrder::create(
            DocumentId::new(),
            client.id(),
            WarehouseId::new(),
            Utc::now(),
            PaymentType::Cash,
            vec![NewSoItem {
                product_id: ProductId::new(),
                variant_id: None,
                ordered_qty: qty,
                unit_price: 10.0,
                discount: 0.0,
            }],
        )
        .unwrap();
        so.confirm(&client, &CreditOverride::none()).unwrap().document
    }

    fn note_for(so: &SalesOrder, qty: i64) -> DeliveryNote {
        DeliveryNote::create(
            so,
            DocumentId::new(),
            Utc::now(),
            vec![NewDnLine {
                so_item_id: so.items()[0].id,
                qty,
                batch_no: None,
            }],
        )
        .unwrap()
    }

    #[test]
    fn creation_validates_remaining_deliverable() {
        let so = confirmed_order(10);
        let item_id = so.items()[0].id;
        let so = so.record_delivery(&[(item_id, 8)]).unwrap().document;

        let err = DeliveryNote::create(
            &so,
            DocumentId::new(),
            Utc::now(),
            vec![NewDnLine {
                so_item_id: item_id,
                qty: 3,
                batch_no: None,
            }],
        )
        .unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("only 2 remaining"), "{msg}"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn draft_order_rejects_delivery_notes() {
        let so = SalesOrder::create(
            DocumentId::new(),
            ClientId::new(),
            WarehouseId::new(),
            Utc::now(),
            PaymentType::Cash,
            vec![NewSoItem {
                product_id: ProductId::new(),
                variant_id: None,
                ordered_qty: 5,
                unit_price: 1.0,
                discount: 0.0,
            }],
        )
        .unwrap();
        let err = DeliveryNote::create(
            &so,
            DocumentId::new(),
            Utc::now(),
            vec![NewDnLine {
                so_item_id: so.items()[0].id,
                qty: 1,
                batch_no: None,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn dispatch_emits_one_deduct_per_line() {
        let so = confirmed_order(10);
        let dn = note_for(&so, 6);
        let t = dn.dispatch(UserId::new(), Utc::now()).unwrap();

        assert_eq!(t.document.status(), DeliveryNoteStatus::Dispatched);
        assert_eq!(t.effects.len(), 1);
        match &t.effects[0] {
            Effect::StockDeduct { key, qty } => {
                assert_eq!(*qty, 6);
                assert_eq!(key.warehouse_id, so.warehouse_id());
                assert_eq!(key.batch_no, None);
            }
            other => panic!("expected StockDeduct, got {other:?}"),
        }

        let err = t.document.dispatch(UserId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn deliver_requires_dispatch_first() {
        let so = confirmed_order(10);
        let dn = note_for(&so, 6);
        let err = dn.deliver(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let dn = dn.dispatch(UserId::new(), Utc::now()).unwrap().document;
        let dn = dn.deliver(Utc::now()).unwrap().document;
        assert_eq!(dn.status(), DeliveryNoteStatus::Delivered);
        assert!(dn.is_terminal());
    }

    #[test]
    fn standalone_note_dispatches_without_order_accrual() {
        let dn = DeliveryNote::create_standalone(
            DocumentId::new(),
            ClientId::new(),
            WarehouseId::new(),
            Utc::now(),
            vec![NewStandaloneDnLine {
                product_id: ProductId::new(),
                variant_id: None,
                qty: 3,
                batch_no: None,
            }],
        )
        .unwrap();

        assert_eq!(dn.sales_order_id(), None);
        assert!(dn.delivery_lines().is_empty());

        let t = dn.dispatch(UserId::new(), Utc::now()).unwrap();
        assert_eq!(t.document.status(), DeliveryNoteStatus::Dispatched);
        assert!(matches!(t.effects[0], Effect::StockDeduct { qty: 3, .. }));
    }

    #[test]
    fn standalone_note_rejects_empty_and_non_positive_lines() {
        let err = DeliveryNote::create_standalone(
            DocumentId::new(),
            ClientId::new(),
            WarehouseId::new(),
            Utc::now(),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = DeliveryNote::create_standalone(
            DocumentId::new(),
            ClientId::new(),
            WarehouseId::new(),
            Utc::now(),
            vec![NewStandaloneDnLine {
                product_id: ProductId::new(),
                variant_id: None,
                qty: 0,
                batch_no: None,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancel_only_while_pending() {
        let so = confirmed_order(10);
        let dn = note_for(&so, 6);
        let dispatched = dn.dispatch(UserId::new(), Utc::now()).unwrap().document;
        let err = dispatched.cancel("wrong picks").unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let cancelled = dn.cancel("wrong picks").unwrap().document;
        assert_eq!(cancelled.status(), DeliveryNoteStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason(), Some("wrong picks"));
    }
}
