use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    BatchNo, ClientId, Document, DocumentId, DomainError, DomainResult, Effect, EntityKind,
    ProductId, StockKey, Transition, VariantId, WarehouseId, require_reason,
};
use tradeflow_sales::order::PaymentType;

use crate::invoice::{SalesInvoice, SalesInvoiceItemId};

/// DRAFT (keyed in, nothing moved) → APPLIED (stock returned, balance
/// released) → VOIDED (application reversed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditNoteStatus {
    Draft,
    Applied,
    Voided,
}

/// Returned line, bound to the invoice line it reverses. Price and discount
/// are snapshotted from the invoice so later price changes cannot skew the
/// refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNoteLine {
    pub invoice_item_id: SalesInvoiceItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    pub unit_price: f64,
    pub discount: f64,
    /// Batch the goods come back into. Returns without a known batch land
    /// batchless.
    pub batch_no: Option<BatchNo>,
}

impl CreditNoteLine {
    pub fn line_refund(&self) -> f64 {
        self.qty as f64 * self.unit_price * (1.0 - self.discount / 100.0)
    }
}

/// Input line for `CreditNote::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCreditLine {
    pub invoice_item_id: SalesInvoiceItemId,
    pub qty: i64,
    pub batch_no: Option<BatchNo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNote {
    id: DocumentId,
    invoice_id: DocumentId,
    client_id: ClientId,
    warehouse_id: WarehouseId,
    payment_type: PaymentType,
    tax_rate: f64,
    status: CreditNoteStatus,
    lines: Vec<CreditNoteLine>,
    reason: String,
    created_at: DateTime<Utc>,
    applied_at: Option<DateTime<Utc>>,
    void_reason: Option<String>,
    version: u64,
}

impl CreditNote {
    /// Draft a return against an invoice. Each line is capped at the
    /// invoiced quantity minus what earlier non-voided credit notes already
    /// returned; `prior` must hold every other credit note raised against
    /// the same invoice.
    pub fn create(
        invoice: &SalesInvoice,
        prior: &[CreditNote],
        id: DocumentId,
        created_at: DateTime<Utc>,
        lines: Vec<NewCreditLine>,
        reason: &str,
    ) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "credit note must have at least one line",
            ));
        }
        let reason = require_reason(reason, "credit note")?;

        let mut out = Vec::with_capacity(lines.len());
        for line in lines {
            if line.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "return quantity must be positive (got {})",
                    line.qty
                )));
            }
            let item = invoice.item(line.invoice_item_id).ok_or_else(|| {
                DomainError::not_found(format!("invoice item {}", line.invoice_item_id))
            })?;

            let already_credited: i64 = prior
                .iter()
                .filter(|cn| {
                    cn.invoice_id == invoice.id() && cn.status != CreditNoteStatus::Voided
                })
                .flat_map(|cn| cn.lines.iter())
                .filter(|l| l.invoice_item_id == line.invoice_item_id)
                .map(|l| l.qty)
                .sum();
            let max_returnable = item.qty - already_credited;
            if line.qty > max_returnable {
                return Err(DomainError::over_return(format!(
                    "cannot return {} of {}: maximum returnable is {max_returnable}",
                    line.qty, item.product_id
                )));
            }

            out.push(CreditNoteLine {
                invoice_item_id: line.invoice_item_id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                qty: line.qty,
                unit_price: item.unit_price,
                discount: item.discount,
                batch_no: line.batch_no.or_else(|| item.batch_no.clone()),
            });
        }

        Ok(Self {
            id,
            invoice_id: invoice.id(),
            client_id: invoice.client_id(),
            warehouse_id: invoice.warehouse_id(),
            payment_type: invoice.payment_type(),
            tax_rate: invoice.tax_rate(),
            status: CreditNoteStatus::Draft,
            lines: out,
            reason,
            created_at,
            applied_at: None,
            void_reason: None,
            version: 0,
        })
    }

    pub fn invoice_id(&self) -> DocumentId {
        self.invoice_id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn status(&self) -> CreditNoteStatus {
        self.status
    }

    pub fn lines(&self) -> &[CreditNoteLine] {
        &self.lines
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn applied_at(&self) -> Option<DateTime<Utc>> {
        self.applied_at
    }

    pub fn void_reason(&self) -> Option<&str> {
        self.void_reason.as_deref()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Refund before tax.
    pub fn refund_subtotal(&self) -> f64 {
        self.lines.iter().map(CreditNoteLine::line_refund).sum()
    }

    /// Full refund, taxed at the invoice's rate.
    pub fn refund_total(&self) -> f64 {
        self.refund_subtotal() * (1.0 + self.tax_rate / 100.0)
    }

    fn stock_key(&self, line: &CreditNoteLine) -> StockKey {
        StockKey::new(line.product_id, self.warehouse_id)
            .with_variant(line.variant_id)
            .with_batch(line.batch_no.clone())
    }

    /// DRAFT → APPLIED. Returns the goods to stock and, on CREDIT invoices,
    /// releases the refund from the client's balance.
    pub fn apply(&self, applied_at: DateTime<Utc>) -> DomainResult<Transition<Self>> {
        if self.status != CreditNoteStatus::Draft {
            return Err(DomainError::invalid_transition(format!(
                "only DRAFT credit notes can be applied (status: {:?})",
                self.status
            )));
        }

        let mut effects: Vec<Effect> = self
            .lines
            .iter()
            .map(|line| Effect::StockRestore {
                key: self.stock_key(line),
                qty: line.qty,
            })
            .collect();
        if self.payment_type == PaymentType::Credit {
            effects.push(Effect::BalanceRelease {
                client_id: self.client_id,
                amount: self.refund_total(),
            });
        }

        let mut next = self.clone();
        next.status = CreditNoteStatus::Applied;
        next.applied_at = Some(applied_at);
        Ok(Transition::with_effects(next, effects))
    }

    /// APPLIED → VOIDED. Reverses the application: goods leave again and
    /// the CREDIT balance is re-charged.
    pub fn void(&self, reason: &str) -> DomainResult<Transition<Self>> {
        if self.status != CreditNoteStatus::Applied {
            return Err(DomainError::invalid_transition(format!(
                "only APPLIED credit notes can be voided (status: {:?})",
                self.status
            )));
        }
        let reason = require_reason(reason, "credit note void")?;

        let mut effects: Vec<Effect> = self
            .lines
            .iter()
            .map(|line| Effect::StockDeduct {
                key: self.stock_key(line),
                qty: line.qty,
            })
            .collect();
        if self.payment_type == PaymentType::Credit {
            effects.push(Effect::BalanceCharge {
                client_id: self.client_id,
                amount: self.refund_total(),
            });
        }

        let mut next = self.clone();
        next.status = CreditNoteStatus::Voided;
        next.void_reason = Some(reason);
        Ok(Transition::with_effects(next, effects))
    }
}

impl Document for CreditNote {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::CreditNote
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_terminal(&self) -> bool {
        self.status == CreditNoteStatus::Voided
    }
}
