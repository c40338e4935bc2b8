use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradeflow_core::{
    BatchNo, ClientId, Document, DocumentId, DomainError, DomainResult, Effect, EntityKind,
    ProductId, StockKey, Transition, UserId, VariantId, WarehouseId, require_reason,
};
use tradeflow_parties::client::Client;
use tradeflow_parties::credit::{authorize, CreditCheck, CreditOverride, DEFAULT_WARNING_THRESHOLD};
use tradeflow_sales::delivery::DeliveryNote;
use tradeflow_sales::order::{PaymentType, SalesOrder, SalesOrderItemId};

/// Sales invoice line identifier, referenced by credit note lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesInvoiceItemId(Uuid);

impl SalesInvoiceItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SalesInvoiceItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SalesInvoiceItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment-derived status plus the VOIDED reversal state. There is no
/// CANCELLED: void is the only reversal an issued invoice supports, since
/// it has stock and balance effects to unwind. Overdue is not a stored
/// status either; [`SalesInvoice::is_overdue`] derives it from the due
/// date, so an invoice never needs a sweep to flip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesInvoiceStatus {
    Pending,
    Partial,
    Paid,
    Voided,
}

/// Which statuses an invoice may be voided from. Defaults to PENDING only;
/// sites that allow reversing paid invoices widen it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidPolicy {
    allowed: HashSet<SalesInvoiceStatus>,
}

impl VoidPolicy {
    pub fn pending_only() -> Self {
        Self {
            allowed: HashSet::from([SalesInvoiceStatus::Pending]),
        }
    }

    pub fn allowing(statuses: impl IntoIterator<Item = SalesInvoiceStatus>) -> Self {
        Self {
            allowed: statuses.into_iter().collect(),
        }
    }

    pub fn allows(&self, status: SalesInvoiceStatus) -> bool {
        self.allowed.contains(&status)
    }
}

impl Default for VoidPolicy {
    fn default() -> Self {
        Self::pending_only()
    }
}

/// Billed line. Snapshot of price/discount at invoicing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesInvoiceItem {
    pub id: SalesInvoiceItemId,
    pub so_item_id: Option<SalesOrderItemId>,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    pub unit_price: f64,
    pub discount: f64,
    pub batch_no: Option<BatchNo>,
}

impl SalesInvoiceItem {
    pub fn line_total(&self) -> f64 {
        self.qty as f64 * self.unit_price * (1.0 - self.discount / 100.0)
    }
}

/// Input line for `SalesInvoice::direct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoiceItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    pub unit_price: f64,
    pub discount: f64,
    pub batch_no: Option<BatchNo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesInvoice {
    id: DocumentId,
    client_id: ClientId,
    warehouse_id: WarehouseId,
    sales_order_id: Option<DocumentId>,
    delivery_note_id: Option<DocumentId>,
    invoice_date: DateTime<Utc>,
    payment_type: PaymentType,
    status: SalesInvoiceStatus,
    items: Vec<SalesInvoiceItem>,
    tax_rate: f64,
    paid_amount: f64,
    credit_override_reason: Option<String>,
    voided_at: Option<DateTime<Utc>>,
    voided_by: Option<UserId>,
    void_reason: Option<String>,
    version: u64,
}

impl SalesInvoice {
    fn validate_items(items: &[SalesInvoiceItem], tax_rate: f64) -> DomainResult<()> {
        if items.is_empty() {
            return Err(DomainError::validation(
                "sales invoice must have at least one item",
            ));
        }
        for item in items {
            if item.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "invoiced quantity must be positive (got {})",
                    item.qty
                )));
            }
            if item.unit_price < 0.0 {
                return Err(DomainError::validation(format!(
                    "unit price cannot be negative (got {})",
                    item.unit_price
                )));
            }
            if !(0.0..=100.0).contains(&item.discount) {
                return Err(DomainError::validation(format!(
                    "discount must be between 0 and 100 (got {})",
                    item.discount
                )));
            }
        }
        if !(0.0..=100.0).contains(&tax_rate) {
            return Err(DomainError::validation(format!(
                "tax rate must be between 0 and 100 (got {tax_rate})"
            )));
        }
        Ok(())
    }

    fn finish_create(
        mut invoice: Self,
        client: &Client,
        ovr: &CreditOverride,
        deduct_stock: bool,
    ) -> DomainResult<Transition<Self>> {
        let mut effects = Vec::new();
        if deduct_stock {
            for item in &invoice.items {
                effects.push(Effect::StockDeduct {
                    key: StockKey::new(item.product_id, invoice.warehouse_id)
                        .with_variant(item.variant_id)
                        .with_batch(item.batch_no.clone()),
                    qty: item.qty,
                });
            }
        }
        if invoice.payment_type == PaymentType::Credit {
            let total = invoice.total();
            let check = CreditCheck::evaluate(client, total, DEFAULT_WARNING_THRESHOLD);
            invoice.credit_override_reason = authorize(&check, ovr)?;
            effects.push(Effect::BalanceCharge {
                client_id: invoice.client_id,
                amount: total,
            });
        }
        Ok(Transition::with_effects(invoice, effects))
    }

    /// Walk-in sale with no order behind it. Deducts stock at creation and,
    /// for CREDIT clients, charges the balance behind the credit gate.
    pub fn direct(
        id: DocumentId,
        client: &Client,
        ovr: &CreditOverride,
        warehouse_id: WarehouseId,
        invoice_date: DateTime<Utc>,
        payment_type: PaymentType,
        items: Vec<NewInvoiceItem>,
        tax_rate: f64,
    ) -> DomainResult<Transition<Self>> {
        let items: Vec<SalesInvoiceItem> = items
            .into_iter()
            .map(|i| SalesInvoiceItem {
                id: SalesInvoiceItemId::new(),
                so_item_id: None,
                product_id: i.product_id,
                variant_id: i.variant_id,
                qty: i.qty,
                unit_price: i.unit_price,
                discount: i.discount,
                batch_no: i.batch_no,
            })
            .collect();
        Self::validate_items(&items, tax_rate)?;

        let invoice = Self {
            id,
            client_id: client.id(),
            warehouse_id,
            sales_order_id: None,
            delivery_note_id: None,
            invoice_date,
            payment_type,
            status: SalesInvoiceStatus::Pending,
            items,
            tax_rate,
            paid_amount: 0.0,
            credit_override_reason: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            version: 0,
        };
        Self::finish_create(invoice, client, ovr, true)
    }

    /// Bill order lines that have no delivery note. Deducts stock (the
    /// invoice is the document that moves goods here) and accrues the
    /// order's invoiced quantities through the paired
    /// `so.record_invoice(invoice_lines())`.
    pub fn from_sales_order(
        so: &SalesOrder,
        client: &Client,
        ovr: &CreditOverride,
        id: DocumentId,
        invoice_date: DateTime<Utc>,
        lines: &[(SalesOrderItemId, i64)],
        tax_rate: f64,
    ) -> DomainResult<Transition<Self>> {
        if !so.is_fulfillable() {
            return Err(DomainError::invalid_transition(format!(
                "cannot invoice {:?} sales order",
                so.status()
            )));
        }
        let mut items = Vec::with_capacity(lines.len());
        for (item_id, qty) in lines {
            let so_item = so.item(*item_id).ok_or_else(|| {
                DomainError::not_found(format!("sales order item {item_id}"))
            })?;
            let remaining = so_item.remaining_invoicable();
            if *qty > remaining {
                return Err(DomainError::over_invoice(format!(
                    "cannot invoice {qty} of {}: only {remaining} remaining on order",
                    so_item.product_id
                )));
            }
            items.push(SalesInvoiceItem {
                id: SalesInvoiceItemId::new(),
                so_item_id: Some(*item_id),
                product_id: so_item.product_id,
                variant_id: so_item.variant_id,
                qty: *qty,
                unit_price: so_item.unit_price,
                discount: so_item.discount,
                batch_no: None,
            });
        }
        Self::validate_items(&items, tax_rate)?;

        let invoice = Self {
            id,
            client_id: so.client_id(),
            warehouse_id: so.warehouse_id(),
            sales_order_id: Some(so.id()),
            delivery_note_id: None,
            invoice_date,
            payment_type: so.payment_type(),
            status: SalesInvoiceStatus::Pending,
            items,
            tax_rate,
            paid_amount: 0.0,
            credit_override_reason: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            version: 0,
        };
        Self::finish_create(invoice, client, ovr, true)
    }

    /// Bill a dispatched delivery note. Stock already moved at dispatch, so
    /// no stock effect here; only the order accrual (via the caller) and,
    /// for CREDIT, the balance charge.
    pub fn from_delivery_note(
        dn: &DeliveryNote,
        so: &SalesOrder,
        client: &Client,
        ovr: &CreditOverride,
        id: DocumentId,
        invoice_date: DateTime<Utc>,
        tax_rate: f64,
    ) -> DomainResult<Transition<Self>> {
        if dn.sales_order_id() != Some(so.id()) {
            return Err(DomainError::validation(
                "delivery note does not belong to this sales order",
            ));
        }
        if dn.dispatched_at().is_none() {
            return Err(DomainError::invalid_transition(
                "delivery note has not been dispatched yet",
            ));
        }

        let mut items = Vec::with_capacity(dn.items().len());
        for line in dn.items() {
            let so_item_id = line.so_item_id.ok_or_else(|| {
                DomainError::validation("delivery note line is not linked to an order line")
            })?;
            let so_item = so.item(so_item_id).ok_or_else(|| {
                DomainError::not_found(format!("sales order item {so_item_id}"))
            })?;
            let remaining = so_item.remaining_invoicable();
            if line.qty > remaining {
                return Err(DomainError::over_invoice(format!(
                    "cannot invoice {} of {}: only {remaining} remaining on order",
                    line.qty, so_item.product_id
                )));
            }
            items.push(SalesInvoiceItem {
                id: SalesInvoiceItemId::new(),
                so_item_id: Some(so_item_id),
                product_id: line.product_id,
                variant_id: line.variant_id,
                qty: line.qty,
                unit_price: so_item.unit_price,
                discount: so_item.discount,
                batch_no: line.batch_no.clone(),
            });
        }
        Self::validate_items(&items, tax_rate)?;

        let invoice = Self {
            id,
            client_id: so.client_id(),
            warehouse_id: dn.warehouse_id(),
            sales_order_id: Some(so.id()),
            delivery_note_id: Some(dn.id()),
            invoice_date,
            payment_type: so.payment_type(),
            status: SalesInvoiceStatus::Pending,
            items,
            tax_rate,
            paid_amount: 0.0,
            credit_override_reason: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            version: 0,
        };
        Self::finish_create(invoice, client, ovr, false)
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn sales_order_id(&self) -> Option<DocumentId> {
        self.sales_order_id
    }

    pub fn delivery_note_id(&self) -> Option<DocumentId> {
        self.delivery_note_id
    }

    pub fn invoice_date(&self) -> DateTime<Utc> {
        self.invoice_date
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn status(&self) -> SalesInvoiceStatus {
        self.status
    }

    pub fn items(&self) -> &[SalesInvoiceItem] {
        &self.items
    }

    pub fn item(&self, item_id: SalesInvoiceItemId) -> Option<&SalesInvoiceItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn tax_rate(&self) -> f64 {
        self.tax_rate
    }

    pub fn paid_amount(&self) -> f64 {
        self.paid_amount
    }

    pub fn credit_override_reason(&self) -> Option<&str> {
        self.credit_override_reason.as_deref()
    }

    pub fn voided_at(&self) -> Option<DateTime<Utc>> {
        self.voided_at
    }

    pub fn voided_by(&self) -> Option<UserId> {
        self.voided_by
    }

    pub fn void_reason(&self) -> Option<&str> {
        self.void_reason.as_deref()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(SalesInvoiceItem::line_total).sum()
    }

    pub fn tax_amount(&self) -> f64 {
        self.subtotal() * self.tax_rate / 100.0
    }

    pub fn total(&self) -> f64 {
        self.subtotal() + self.tax_amount()
    }

    pub fn outstanding(&self) -> f64 {
        self.total() - self.paid_amount
    }

    /// Due date from the client's payment terms at invoicing time.
    pub fn due_date(&self, payment_terms_days: u32) -> DateTime<Utc> {
        self.invoice_date + chrono::Duration::days(i64::from(payment_terms_days))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>, payment_terms_days: u32) -> bool {
        matches!(
            self.status,
            SalesInvoiceStatus::Pending | SalesInvoiceStatus::Partial
        ) && now > self.due_date(payment_terms_days)
    }

    /// Quantities per SO line, for the paired order accrual (negated by the
    /// engine on void).
    pub fn invoice_lines(&self) -> Vec<(SalesOrderItemId, i64)> {
        self.items
            .iter()
            .filter_map(|i| i.so_item_id.map(|id| (id, i.qty)))
            .collect()
    }

    pub fn record_payment(&self, amount: f64) -> DomainResult<Transition<Self>> {
        if !matches!(
            self.status,
            SalesInvoiceStatus::Pending | SalesInvoiceStatus::Partial
        ) {
            return Err(DomainError::invalid_transition(format!(
                "cannot record payment on {:?} sales invoice",
                self.status
            )));
        }
        if amount <= 0.0 {
            return Err(DomainError::validation(format!(
                "payment amount must be positive (got {amount})"
            )));
        }
        let outstanding = self.outstanding();
        if amount > outstanding + f64::EPSILON {
            return Err(DomainError::validation(format!(
                "payment {amount:.4} exceeds outstanding amount {outstanding:.4}"
            )));
        }

        let mut next = self.clone();
        next.paid_amount += amount;
        next.status = if next.outstanding() <= f64::EPSILON {
            SalesInvoiceStatus::Paid
        } else {
            SalesInvoiceStatus::Partial
        };
        Ok(Transition::pure(next))
    }

    /// Void the invoice: restore every line's stock and release the CREDIT
    /// charge. Blocked by policy and by any applied credit note (the credit
    /// note already reversed part of this invoice; voiding both would
    /// double-return the goods).
    pub fn void(
        &self,
        policy: &VoidPolicy,
        has_applied_credit_note: bool,
        voided_by: UserId,
        voided_at: DateTime<Utc>,
        reason: &str,
    ) -> DomainResult<Transition<Self>> {
        if self.status == SalesInvoiceStatus::Voided {
            return Err(DomainError::invalid_transition(
                "sales invoice is already voided",
            ));
        }
        if !policy.allows(self.status) {
            return Err(DomainError::invalid_transition(format!(
                "void not permitted for {:?} sales invoices",
                self.status
            )));
        }
        if has_applied_credit_note {
            return Err(DomainError::invalid_transition(
                "invoice has an applied credit note; void the credit note first",
            ));
        }
        let reason = require_reason(reason, "sales invoice void")?;

        let mut effects: Vec<Effect> = self
            .items
            .iter()
            .map(|item| Effect::StockRestore {
                key: StockKey::new(item.product_id, self.warehouse_id)
                    .with_variant(item.variant_id)
                    .with_batch(item.batch_no.clone()),
                qty: item.qty,
            })
            .collect();
        if self.payment_type == PaymentType::Credit {
            effects.push(Effect::BalanceRelease {
                client_id: self.client_id,
                amount: self.total(),
            });
        }

        let mut next = self.clone();
        next.status = SalesInvoiceStatus::Voided;
        next.voided_at = Some(voided_at);
        next.voided_by = Some(voided_by);
        next.void_reason = Some(reason);
        Ok(Transition::with_effects(next, effects))
    }
}

impl Document for SalesInvoice {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SalesInvoice
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SalesInvoiceStatus::Paid | SalesInvoiceStatus::Voided
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(balance: f64, limit: f64) -> Client {
        let mut c = Client::new(ClientId::new(), "Acme Traders", limit, 30).unwrap();
        c.apply_charge(balance);
        c
    }

    fn direct_invoice(
        client: &Client,
        payment_type: PaymentType,
        qty: i64,
        price: f64,
        tax: f64,
    ) -> DomainResult<Transition<SalesInvoice>> {
        SalesInvoice::direct(
            DocumentId::new(),
            client,
            &CreditOverride::none(),
            WarehouseId::new(),
            Utc::now(),
            payment_type,
            vec![NewInvoiceItem {
                product_id: ProductId::new(),
                variant_id: None,
                qty,
                unit_price: price,
                discount: 0.0,
                batch_no: None,
            }],
            tax,
        )
    }

    #[test]
    fn direct_invoice_deducts_stock_at_creation() {
        let c = client(0.0, 0.0);
        let t = direct_invoice(&c, PaymentType::Cash, 5, 100.0, 0.0).unwrap();
        assert_eq!(t.document.status(), SalesInvoiceStatus::Pending);
        assert_eq!(t.effects.len(), 1);
        assert!(matches!(t.effects[0], Effect::StockDeduct { qty: 5, .. }));
    }

    #[test]
    fn credit_invoice_charges_balance_and_gates_limit() {
        let c = client(80_000.0, 100_000.0);
        // 25 * 1000 = 25,000 pending → 105% utilization
        let err = direct_invoice(&c, PaymentType::Credit, 25, 1_000.0, 0.0).unwrap_err();
        assert!(matches!(err, DomainError::CreditLimitExceeded(_)));

        let c = client(0.0, 100_000.0);
        let t = direct_invoice(&c, PaymentType::Credit, 25, 1_000.0, 0.0).unwrap();
        assert!(t.effects.iter().any(|e| matches!(
            e,
            Effect::BalanceCharge { amount, .. } if (amount - 25_000.0).abs() < 1e-9
        )));
    }

    #[test]
    fn totals_apply_discount_then_tax() {
        let c = client(0.0, 0.0);
        let t = SalesInvoice::direct(
            DocumentId::new(),
            &c,
            &CreditOverride::none(),
            WarehouseId::new(),
            Utc::now(),
            PaymentType::Cash,
            vec![NewInvoiceItem {
                product_id: ProductId::new(),
                variant_id: None,
                qty: 10,
                unit_price: 100.0,
                discount: 10.0,
                batch_no: None,
            }],
            15.0,
        )
        .unwrap();
        let inv = t.document;
        assert!((inv.subtotal() - 900.0).abs() < 1e-9);
        assert!((inv.tax_amount() - 135.0).abs() < 1e-9);
        assert!((inv.total() - 1035.0).abs() < 1e-9);
    }

    #[test]
    fn payments_walk_pending_partial_paid() {
        let c = client(0.0, 0.0);
        let inv = direct_invoice(&c, PaymentType::Cash, 10, 100.0, 0.0)
            .unwrap()
            .document;
        let inv = inv.record_payment(400.0).unwrap().document;
        assert_eq!(inv.status(), SalesInvoiceStatus::Partial);
        let inv = inv.record_payment(600.0).unwrap().document;
        assert_eq!(inv.status(), SalesInvoiceStatus::Paid);
        assert!(inv.is_terminal());
    }

    #[test]
    fn void_restores_stock_and_releases_credit() {
        let c = client(0.0, 100_000.0);
        let inv = direct_invoice(&c, PaymentType::Credit, 10, 1_500.0, 0.0)
            .unwrap()
            .document;

        let t = inv
            .void(
                &VoidPolicy::default(),
                false,
                UserId::new(),
                Utc::now(),
                "billing error",
            )
            .unwrap();
        assert_eq!(t.document.status(), SalesInvoiceStatus::Voided);
        assert_eq!(t.document.void_reason(), Some("billing error"));
        assert!(t.document.voided_at().is_some());
        assert!(t.effects.iter().any(|e| matches!(e, Effect::StockRestore { qty: 10, .. })));
        assert!(t.effects.iter().any(|e| matches!(
            e,
            Effect::BalanceRelease { amount, .. } if (amount - 15_000.0).abs() < 1e-9
        )));
    }

    #[test]
    fn default_policy_blocks_voiding_paid_invoices() {
        let c = client(0.0, 0.0);
        let inv = direct_invoice(&c, PaymentType::Cash, 1, 50.0, 0.0)
            .unwrap()
            .document;
        let inv = inv.record_payment(50.0).unwrap().document;

        let err = inv
            .void(&VoidPolicy::default(), false, UserId::new(), Utc::now(), "x")
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let widened = VoidPolicy::allowing([
            SalesInvoiceStatus::Pending,
            SalesInvoiceStatus::Partial,
            SalesInvoiceStatus::Paid,
        ]);
        assert!(inv
            .void(&widened, false, UserId::new(), Utc::now(), "audit reversal")
            .is_ok());
    }

    #[test]
    fn applied_credit_note_blocks_void() {
        let c = client(0.0, 0.0);
        let inv = direct_invoice(&c, PaymentType::Cash, 10, 100.0, 0.0)
            .unwrap()
            .document;
        let err = inv
            .void(&VoidPolicy::default(), true, UserId::new(), Utc::now(), "dup")
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn overdue_follows_payment_terms() {
        let c = client(0.0, 0.0);
        let inv = direct_invoice(&c, PaymentType::Cash, 1, 10.0, 0.0)
            .unwrap()
            .document;
        let within = inv.invoice_date() + chrono::Duration::days(29);
        let past = inv.invoice_date() + chrono::Duration::days(31);
        assert!(!inv.is_overdue(within, 30));
        assert!(inv.is_overdue(past, 30));

        let paid = inv.record_payment(10.0).unwrap().document;
        assert!(!paid.is_overdue(past, 30));
    }
}
