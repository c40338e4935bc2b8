use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradeflow_core::{
    ClientId, Document, DocumentId, DomainError, DomainResult, EntityKind, ProductId,
    Transition, VariantId, WarehouseId, require_reason,
};
use tradeflow_parties::client::Client;
use tradeflow_parties::credit::{authorize, CreditCheck, CreditOverride, DEFAULT_WARNING_THRESHOLD};

/// Sales order line identifier, referenced by delivery and invoice lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderItemId(Uuid);

impl SalesOrderItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SalesOrderItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SalesOrderItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Cash,
    Credit,
}

/// Fulfilment status, derived from per-line delivered/invoiced accruals.
/// Invoicing outranks delivery once any line is invoiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    Draft,
    Confirmed,
    PartiallyDelivered,
    Delivered,
    PartiallyInvoiced,
    Invoiced,
    Cancelled,
    Closed,
}

/// Order line with cumulative fulfilment counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoItem {
    pub id: SalesOrderItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub ordered_qty: i64,
    pub unit_price: f64,
    /// Percentage discount on the line (0..=100).
    pub discount: f64,
    pub delivered_qty: i64,
    pub invoiced_qty: i64,
}

impl SoItem {
    pub fn line_total(&self) -> f64 {
        self.ordered_qty as f64 * self.unit_price * (1.0 - self.discount / 100.0)
    }

    pub fn remaining_deliverable(&self) -> i64 {
        self.ordered_qty - self.delivered_qty
    }

    pub fn remaining_invoicable(&self) -> i64 {
        self.ordered_qty - self.invoiced_qty
    }
}

/// Input line for `SalesOrder::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSoItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub ordered_qty: i64,
    pub unit_price: f64,
    pub discount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrder {
    id: DocumentId,
    client_id: ClientId,
    warehouse_id: WarehouseId,
    order_date: DateTime<Utc>,
    payment_type: PaymentType,
    status: SalesOrderStatus,
    items: Vec<SoItem>,
    credit_override_reason: Option<String>,
    cancel_reason: Option<String>,
    version: u64,
}

impl SalesOrder {
    pub fn create(
        id: DocumentId,
        client_id: ClientId,
        warehouse_id: WarehouseId,
        order_date: DateTime<Utc>,
        payment_type: PaymentType,
        items: Vec<NewSoItem>,
    ) -> DomainResult<Self> {
        for item in &items {
            if item.ordered_qty <= 0 {
                return Err(DomainError::validation(format!(
                    "ordered quantity must be positive (got {})",
                    item.ordered_qty
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

        Ok(Self {
            id,
            client_id,
            warehouse_id,
            order_date,
            payment_type,
            status: SalesOrderStatus::Draft,
            items: items
                .into_iter()
                .map(|i| SoItem {
                    id: SalesOrderItemId::new(),
                    product_id: i.product_id,
                    variant_id: i.variant_id,
                    ordered_qty: i.ordered_qty,
                    unit_price: i.unit_price,
                    discount: i.discount,
                    delivered_qty: 0,
                    invoiced_qty: 0,
                })
                .collect(),
            credit_override_reason: None,
            cancel_reason: None,
            version: 0,
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[SoItem] {
        &self.items
    }

    pub fn item(&self, item_id: SalesOrderItemId) -> Option<&SoItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn credit_override_reason(&self) -> Option<&str> {
        self.credit_override_reason.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(SoItem::line_total).sum()
    }

    /// True while deliveries/invoices may still be raised against the order.
    pub fn is_fulfillable(&self) -> bool {
        !matches!(
            self.status,
            SalesOrderStatus::Draft | SalesOrderStatus::Cancelled | SalesOrderStatus::Closed
        )
    }

    fn derived_status(&self) -> SalesOrderStatus {
        let all_invoiced = self.items.iter().all(|i| i.invoiced_qty >= i.ordered_qty);
        let some_invoiced = self.items.iter().any(|i| i.invoiced_qty > 0);
        let all_delivered = self.items.iter().all(|i| i.delivered_qty >= i.ordered_qty);
        let some_delivered = self.items.iter().any(|i| i.delivered_qty > 0);

        if !self.items.is_empty() && all_invoiced {
            SalesOrderStatus::Invoiced
        } else if some_invoiced {
            SalesOrderStatus::PartiallyInvoiced
        } else if !self.items.is_empty() && all_delivered {
            SalesOrderStatus::Delivered
        } else if some_delivered {
            SalesOrderStatus::PartiallyDelivered
        } else {
            SalesOrderStatus::Confirmed
        }
    }

    /// DRAFT → CONFIRMED. A CREDIT order is gated on the client's exposure:
    /// the order total counts as pending against the limit, and an EXCEEDED
    /// check requires an admin override whose reason is recorded here.
    pub fn confirm(&self, client: &Client, ovr: &CreditOverride) -> DomainResult<Transition<Self>> {
        if self.status != SalesOrderStatus::Draft {
            return Err(DomainError::invalid_transition(format!(
                "only DRAFT sales orders can be confirmed (status: {:?})",
                self.status
            )));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation(
                "cannot confirm a sales order with no lines",
            ));
        }
        if client.id() != self.client_id {
            return Err(DomainError::validation(
                "credit check client does not match order client",
            ));
        }

        let mut next = self.clone();
        if self.payment_type == PaymentType::Credit {
            let check = CreditCheck::evaluate(client, self.total(), DEFAULT_WARNING_THRESHOLD);
            next.credit_override_reason = authorize(&check, ovr)?;
        }
        next.status = SalesOrderStatus::Confirmed;
        Ok(Transition::pure(next))
    }

    /// Cancel before any fulfilment. Once goods have moved or invoices
    /// exist, cancel those documents instead.
    pub fn cancel(&self, reason: &str) -> DomainResult<Transition<Self>> {
        if !matches!(
            self.status,
            SalesOrderStatus::Draft | SalesOrderStatus::Confirmed
        ) {
            return Err(DomainError::invalid_transition(format!(
                "only DRAFT or CONFIRMED sales orders can be cancelled (status: {:?})",
                self.status
            )));
        }
        let reason = require_reason(reason, "sales order cancellation")?;
        let mut next = self.clone();
        next.status = SalesOrderStatus::Cancelled;
        next.cancel_reason = Some(reason);
        Ok(Transition::pure(next))
    }

    /// INVOICED → CLOSED. Administrative end of life.
    pub fn close(&self) -> DomainResult<Transition<Self>> {
        if self.status != SalesOrderStatus::Invoiced {
            return Err(DomainError::invalid_transition(format!(
                "only fully INVOICED sales orders can be closed (status: {:?})",
                self.status
            )));
        }
        let mut next = self.clone();
        next.status = SalesOrderStatus::Closed;
        Ok(Transition::pure(next))
    }

    /// Accrue delivered quantities (delivery note dispatch). Negative
    /// quantities reverse a cancelled dispatch.
    pub fn record_delivery(
        &self,
        lines: &[(SalesOrderItemId, i64)],
    ) -> DomainResult<Transition<Self>> {
        if !self.is_fulfillable() {
            return Err(DomainError::invalid_transition(format!(
                "cannot record deliveries on {:?} sales order",
                self.status
            )));
        }
        let mut next = self.clone();
        for (item_id, qty) in lines {
            let item = next
                .items
                .iter_mut()
                .find(|i| i.id == *item_id)
                .ok_or_else(|| DomainError::not_found(format!("sales order item {item_id}")))?;
            let new_qty = item.delivered_qty + qty;
            if new_qty < 0 || new_qty > item.ordered_qty {
                return Err(DomainError::validation(format!(
                    "delivered quantity for {} would become {new_qty} (ordered {})",
                    item.product_id, item.ordered_qty
                )));
            }
            item.delivered_qty = new_qty;
        }
        next.status = next.derived_status();
        Ok(Transition::pure(next))
    }

    /// Accrue invoiced quantities (sales invoice creation). Negative
    /// quantities reverse a voided invoice.
    pub fn record_invoice(
        &self,
        lines: &[(SalesOrderItemId, i64)],
    ) -> DomainResult<Transition<Self>> {
        if !self.is_fulfillable() {
            return Err(DomainError::invalid_transition(format!(
                "cannot record invoices on {:?} sales order",
                self.status
            )));
        }
        let mut next = self.clone();
        for (item_id, qty) in lines {
            let item = next
                .items
                .iter_mut()
                .find(|i| i.id == *item_id)
                .ok_or_else(|| DomainError::not_found(format!("sales order item {item_id}")))?;
            let new_qty = item.invoiced_qty + qty;
            if new_qty < 0 || new_qty > item.ordered_qty {
                return Err(DomainError::over_invoice(format!(
                    "invoiced quantity for {} would become {new_qty} (ordered {})",
                    item.product_id, item.ordered_qty
                )));
            }
            item.invoiced_qty = new_qty;
        }
        next.status = next.derived_status();
        Ok(Transition::pure(next))
    }
}

impl Document for SalesOrder {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SalesOrder
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SalesOrderStatus::Cancelled | SalesOrderStatus::Closed
        )
    }
}
