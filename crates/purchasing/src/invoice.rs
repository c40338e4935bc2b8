use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    Document, DocumentId, DomainError, DomainResult, EntityKind, ProductId, SupplierId,
    Transition, VariantId, require_reason,
};

/// Supplier invoice status, derived from cumulative payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseInvoiceStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

/// Invoiced line. Quantities and costs are the supplier's claim; the
/// three-way match compares them against the PO and the GRNs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseInvoiceItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    pub unit_cost: f64,
}

impl PurchaseInvoiceItem {
    pub fn line_total(&self) -> f64 {
        self.qty as f64 * self.unit_cost
    }
}

/// Supplier invoice. Weakly linked to the order and/or receipt it bills;
/// either link alone is enough for the three-way match to find its
/// counterpart documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseInvoice {
    id: DocumentId,
    supplier_id: SupplierId,
    purchase_order_id: Option<DocumentId>,
    grn_id: Option<DocumentId>,
    invoice_date: DateTime<Utc>,
    status: PurchaseInvoiceStatus,
    items: Vec<PurchaseInvoiceItem>,
    tax_rate: f64,
    paid_amount: f64,
    cancel_reason: Option<String>,
    version: u64,
}

impl PurchaseInvoice {
    pub fn create(
        id: DocumentId,
        supplier_id: SupplierId,
        purchase_order_id: Option<DocumentId>,
        grn_id: Option<DocumentId>,
        invoice_date: DateTime<Utc>,
        items: Vec<PurchaseInvoiceItem>,
        tax_rate: f64,
    ) -> DomainResult<Self> {
        if items.is_empty() {
            return Err(DomainError::validation(
                "purchase invoice must have at least one item",
            ));
        }
        for item in &items {
            if item.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "invoiced quantity must be positive (got {})",
                    item.qty
                )));
            }
            if item.unit_cost < 0.0 {
                return Err(DomainError::validation(format!(
                    "unit cost cannot be negative (got {})",
                    item.unit_cost
                )));
            }
        }
        if !(0.0..=100.0).contains(&tax_rate) {
            return Err(DomainError::validation(format!(
                "tax rate must be between 0 and 100 (got {tax_rate})"
            )));
        }

        Ok(Self {
            id,
            supplier_id,
            purchase_order_id,
            grn_id,
            invoice_date,
            status: PurchaseInvoiceStatus::Pending,
            items,
            tax_rate,
            paid_amount: 0.0,
            cancel_reason: None,
            version: 0,
        })
    }

    pub fn supplier_id(&self) -> SupplierId {
        self.supplier_id
    }

    pub fn purchase_order_id(&self) -> Option<DocumentId> {
        self.purchase_order_id
    }

    pub fn grn_id(&self) -> Option<DocumentId> {
        self.grn_id
    }

    pub fn invoice_date(&self) -> DateTime<Utc> {
        self.invoice_date
    }

    pub fn status(&self) -> PurchaseInvoiceStatus {
        self.status
    }

    pub fn items(&self) -> &[PurchaseInvoiceItem] {
        &self.items
    }

    pub fn tax_rate(&self) -> f64 {
        self.tax_rate
    }

    pub fn paid_amount(&self) -> f64 {
        self.paid_amount
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(PurchaseInvoiceItem::line_total).sum()
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

    /// Record a payment against the invoice. Status follows the cumulative
    /// paid amount: PAID when it covers the total, PARTIAL otherwise.
    pub fn record_payment(&self, amount: f64) -> DomainResult<Transition<Self>> {
        if !matches!(
            self.status,
            PurchaseInvoiceStatus::Pending | PurchaseInvoiceStatus::Partial
        ) {
            return Err(DomainError::invalid_transition(format!(
                "cannot record payment on {:?} purchase invoice",
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
            PurchaseInvoiceStatus::Paid
        } else {
            PurchaseInvoiceStatus::Partial
        };
        Ok(Transition::pure(next))
    }

    /// Cancel an unpaid invoice. Once any payment lands the invoice is a
    /// financial record and must stand.
    pub fn cancel(&self, reason: &str) -> DomainResult<Transition<Self>> {
        if self.status != PurchaseInvoiceStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "only PENDING purchase invoices can be cancelled (status: {:?})",
                self.status
            )));
        }
        let reason = require_reason(reason, "purchase invoice cancellation")?;
        let mut next = self.clone();
        next.status = PurchaseInvoiceStatus::Cancelled;
        next.cancel_reason = Some(reason);
        Ok(Transition::pure(next))
    }
}

impl Document for PurchaseInvoice {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::PurchaseInvoice
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            PurchaseInvoiceStatus::Paid | PurchaseInvoiceStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(qty: i64, unit_cost: f64, tax_rate: f64) -> PurchaseInvoice {
        PurchaseInvoice::create(
            DocumentId::new(),
            SupplierId::new(),
            None,
            None,
            Utc::now(),
            vec![PurchaseInvoiceItem {
                product_id: ProductId::new(),
                variant_id: None,
                qty,
                unit_cost,
            }],
            tax_rate,
        )
        .unwrap()
    }

    #[test]
    fn totals_include_tax() {
        let pi = invoice(100, 10.0, 15.0);
        assert!((pi.subtotal() - 1000.0).abs() < 1e-9);
        assert!((pi.tax_amount() - 150.0).abs() < 1e-9);
        assert!((pi.total() - 1150.0).abs() < 1e-9);
    }

    #[test]
    fn payments_walk_pending_partial_paid() {
        let pi = invoice(100, 10.0, 0.0);
        assert_eq!(pi.status(), PurchaseInvoiceStatus::Pending);

        let pi = pi.record_payment(400.0).unwrap().document;
        assert_eq!(pi.status(), PurchaseInvoiceStatus::Partial);
        assert!((pi.outstanding() - 600.0).abs() < 1e-9);

        let pi = pi.record_payment(600.0).unwrap().document;
        assert_eq!(pi.status(), PurchaseInvoiceStatus::Paid);
        assert!(pi.is_terminal());
    }

    #[test]
    fn overpayment_is_rejected() {
        let pi = invoice(10, 10.0, 0.0);
        let err = pi.record_payment(150.0).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancel_only_while_pending() {
        let pi = invoice(10, 10.0, 0.0);
        let partially_paid = pi.record_payment(50.0).unwrap().document;
        let err = partially_paid.cancel("duplicate").unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let cancelled = pi.cancel("duplicate entry").unwrap().document;
        assert_eq!(cancelled.status(), PurchaseInvoiceStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason(), Some("duplicate entry"));
    }

    #[test]
    fn cancel_requires_reason() {
        let pi = invoice(10, 10.0, 0.0);
        let err = pi.cancel("").unwrap_err();
        assert!(matches!(err, DomainError::MissingReason(_)));
    }
}
