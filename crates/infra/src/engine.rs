//! The transactional engine.
//!
//! Single mutation pipeline for every operation:
//!
//! ```text
//! lock state (bounded wait)
//!   -> load + clone documents
//!   -> pure transition(s) on the domain types
//!   -> ledger.apply_all(effects)        all-or-nothing stock check
//!   -> apply balance effects
//!   -> record stock movements
//!   -> commit documents + history snapshots
//! ```
//!
//! Nothing is written until every validation has passed, so a rejected
//! transition leaves the state exactly as it was.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use tradeflow_core::{
    ClientId, Document, DocumentId, DomainError, DomainResult, Effect, EntityKind, StockKey,
    Transition, UserId, WarehouseId,
};
use tradeflow_history::{self as history, Blocker, ChangeHistoryEntry, EntityRef};
use tradeflow_inventory::{MovementType, StockMovement};
use tradeflow_invoicing::{
    CreditNote, CreditNoteStatus, NewCreditLine, NewInvoiceItem, SalesInvoice, VoidPolicy,
};
use tradeflow_parties::client::Client;
use tradeflow_parties::credit::{CreditCheck, CreditOverride, DEFAULT_WARNING_THRESHOLD};
use tradeflow_purchasing::{
    AdditionalCost, GoodsReceiptNote, ImportMetadata, LandedCost, MatchReport, NewGrnLine,
    NewPoItem, PurchaseInvoice, PurchaseInvoiceItem, PurchaseOrder, three_way_match,
};
use tradeflow_sales::{
    DeliveryNote, NewDnLine, NewSoItem, NewStandaloneDnLine, PaymentType, SalesOrder,
    SalesOrderItemId,
};

use crate::state::EngineState;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a caller waits for the engine lock before giving up with a
    /// retryable `ConcurrencyConflict`.
    pub lock_wait: Duration,
    /// Which invoice statuses may be voided.
    pub void_policy: VoidPolicy,
    /// Credit utilization percentage that flags a WARNING.
    pub credit_warning_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(250),
            void_policy: VoidPolicy::default(),
            credit_warning_threshold: DEFAULT_WARNING_THRESHOLD,
        }
    }
}

/// The document lifecycle engine. Cheap to share behind an `Arc`; all
/// interior state sits behind one lock.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    state: Mutex<EngineState>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState::new()),
        }
    }

    fn lock(&self) -> DomainResult<MutexGuard<'_, EngineState>> {
        let deadline = Instant::now() + self.config.lock_wait;
        loop {
            match self.state.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        warn!("engine lock wait deadline exceeded");
                        return Err(DomainError::concurrency_conflict(
                            "engine busy, retry the operation",
                        ));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(DomainError::concurrency_conflict("engine lock poisoned"));
                }
            }
        }
    }

    fn snapshot_of<T: Serialize>(value: &T) -> DomainResult<serde_json::Value> {
        serde_json::to_value(value)
            .map_err(|e| DomainError::validation(format!("snapshot serialization: {e}")))
    }

    fn record_history<D: Document + Serialize>(
        state: &EngineState,
        document: &D,
        actor: UserId,
        reason: Option<String>,
    ) -> DomainResult<u64> {
        state.history.record(
            EntityRef::new(document.kind(), document.id()),
            Self::snapshot_of(document)?,
            actor,
            Utc::now(),
            reason,
        )
    }

    fn record_movements(
        state: &mut EngineState,
        effects: &[Effect],
        movement_type: MovementType,
        reference_kind: EntityKind,
        reference_id: DocumentId,
        actor: UserId,
        moved_at: DateTime<Utc>,
        notes: Option<&str>,
    ) {
        for effect in effects {
            let (key, quantity) = match effect {
                Effect::StockReceive { key, qty, .. } => (key.clone(), *qty),
                Effect::StockRestore { key, qty } => (key.clone(), *qty),
                Effect::StockDeduct { key, qty } => (key.clone(), -qty),
                Effect::BalanceCharge { .. } | Effect::BalanceRelease { .. } => continue,
            };
            state.movements.record(StockMovement {
                key,
                movement_type,
                quantity,
                reference_kind,
                reference_id,
                actor,
                moved_at,
                notes: notes.map(str::to_string),
            });
        }
    }

    // ---- master data ----------------------------------------------------

    /// Register a client record. The engine owns the client's balance from
    /// here on.
    pub fn register_client(&self, actor: UserId, client: Client) -> DomainResult<()> {
        let mut state = self.lock()?;
        let id = client.id();
        if state.clients.contains_key(&id) {
            return Err(DomainError::validation(format!(
                "client {id} is already registered"
            )));
        }
        state.history.record(
            EntityRef::new(EntityKind::Client, id),
            Self::snapshot_of(&client)?,
            actor,
            Utc::now(),
            None,
        )?;
        state.clients.insert(id, client);
        info!(client_id = %id, "client registered");
        Ok(())
    }

    pub fn client(&self, id: ClientId) -> DomainResult<Client> {
        Ok(self.lock()?.client(id)?.clone())
    }

    /// Evaluate a client's credit position for a prospective amount without
    /// committing anything.
    pub fn check_credit(&self, client_id: ClientId, pending_total: f64) -> DomainResult<CreditCheck> {
        let state = self.lock()?;
        let client = state.client(client_id)?;
        Ok(CreditCheck::evaluate(
            client,
            pending_total,
            self.config.credit_warning_threshold,
        ))
    }

    // ---- purchasing ------------------------------------------------------

    pub fn create_purchase_order(
        &self,
        actor: UserId,
        supplier_id: tradeflow_core::SupplierId,
        order_date: DateTime<Utc>,
        items: Vec<NewPoItem>,
        import: ImportMetadata,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        let id = DocumentId::new();
        let mut po = PurchaseOrder::create(id, supplier_id, order_date, items, import)?;
        po.bump_version();
        Self::record_history(&state, &po, actor, None)?;
        state.purchase_orders.insert(id, po);
        info!(po_id = %id, "purchase order created");
        Ok(id)
    }

    pub fn purchase_order(&self, id: DocumentId) -> DomainResult<PurchaseOrder> {
        Ok(self.lock()?.purchase_order(id)?.clone())
    }

    pub fn mark_po_in_transit(
        &self,
        actor: UserId,
        po_id: DocumentId,
        ship_date: Option<DateTime<Utc>>,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.purchase_order(po_id)?.mark_in_transit(ship_date)?;
        Self::commit_po(&mut state, t, actor, None)
    }

    pub fn cancel_purchase_order(
        &self,
        actor: UserId,
        po_id: DocumentId,
        reason: &str,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.purchase_order(po_id)?.cancel(reason)?;
        let reason = t.document.cancel_reason().map(str::to_string);
        Self::commit_po(&mut state, t, actor, reason)
    }

    pub fn add_po_cost(
        &self,
        actor: UserId,
        po_id: DocumentId,
        cost: AdditionalCost,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.purchase_order(po_id)?.add_cost(cost)?;
        Self::commit_po(&mut state, t, actor, None)
    }

    fn commit_po(
        state: &mut EngineState,
        t: Transition<PurchaseOrder>,
        actor: UserId,
        reason: Option<String>,
    ) -> DomainResult<()> {
        let mut po = t.document;
        po.bump_version();
        Self::record_history(state, &po, actor, reason)?;
        info!(po_id = %po.id(), status = ?po.status(), "purchase order updated");
        state.purchase_orders.insert(po.id(), po);
        Ok(())
    }

    /// Post a goods receipt: stock in, PO received quantities up, both
    /// documents and the movement trail committed together.
    pub fn receive_goods(
        &self,
        actor: UserId,
        po_id: DocumentId,
        warehouse_id: WarehouseId,
        received_date: DateTime<Utc>,
        lines: Vec<NewGrnLine>,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        let po = state.purchase_order(po_id)?.clone();

        let grn_id = DocumentId::new();
        let grn_t =
            GoodsReceiptNote::create(&po, grn_id, warehouse_id, received_date, actor, lines)?;
        let po_t = po.record_receipt(&grn_t.document.receipt_lines())?;

        state.ledger.apply_all(&grn_t.effects)?;
        Self::record_movements(
            &mut state,
            &grn_t.effects,
            MovementType::Receipt,
            EntityKind::GoodsReceiptNote,
            grn_id,
            actor,
            received_date,
            None,
        );

        let mut grn = grn_t.document;
        grn.bump_version();
        Self::record_history(&state, &grn, actor, None)?;
        state.receipts.insert(grn_id, grn);
        Self::commit_po(&mut state, po_t, actor, None)?;
        info!(grn_id = %grn_id, po_id = %po_id, "goods receipt posted");
        Ok(grn_id)
    }

    pub fn goods_receipt(&self, id: DocumentId) -> DomainResult<GoodsReceiptNote> {
        Ok(self.lock()?.receipt(id)?.clone())
    }

    /// Cancel a receipt: stock back out (fails if already shipped), PO
    /// received quantities walked back.
    pub fn cancel_goods_receipt(
        &self,
        actor: UserId,
        grn_id: DocumentId,
        reason: &str,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let grn = state.receipt(grn_id)?.clone();
        let po = state.purchase_order(grn.purchase_order_id())?.clone();

        let grn_t = grn.cancel(&po, reason)?;
        let po_t = po.revert_receipt(&grn.receipt_lines())?;

        state.ledger.apply_all(&grn_t.effects)?;
        Self::record_movements(
            &mut state,
            &grn_t.effects,
            MovementType::Adjustment,
            EntityKind::GoodsReceiptNote,
            grn_id,
            actor,
            Utc::now(),
            Some("goods receipt cancelled"),
        );

        let mut cancelled = grn_t.document;
        cancelled.bump_version();
        let reason = cancelled.cancel_reason().map(str::to_string);
        Self::record_history(&state, &cancelled, actor, reason)?;
        state.receipts.insert(grn_id, cancelled);
        Self::commit_po(&mut state, po_t, actor, None)?;
        info!(grn_id = %grn_id, "goods receipt cancelled");
        Ok(())
    }

    pub fn add_grn_cost(
        &self,
        actor: UserId,
        grn_id: DocumentId,
        cost: AdditionalCost,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.receipt(grn_id)?.add_cost(cost)?;
        let mut grn = t.document;
        grn.bump_version();
        Self::record_history(&state, &grn, actor, None)?;
        state.receipts.insert(grn_id, grn);
        Ok(())
    }

    pub fn create_purchase_invoice(
        &self,
        actor: UserId,
        supplier_id: tradeflow_core::SupplierId,
        purchase_order_id: Option<DocumentId>,
        grn_id: Option<DocumentId>,
        invoice_date: DateTime<Utc>,
        items: Vec<PurchaseInvoiceItem>,
        tax_rate: f64,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        if let Some(po_id) = purchase_order_id {
            state.purchase_order(po_id)?;
        }
        if let Some(grn_id) = grn_id {
            let grn = state.receipt(grn_id)?;
            if let Some(po_id) = purchase_order_id {
                if grn.purchase_order_id() != po_id {
                    return Err(DomainError::validation(format!(
                        "goods receipt {grn_id} belongs to purchase order {}, not {po_id}",
                        grn.purchase_order_id()
                    )));
                }
            }
        }
        let id = DocumentId::new();
        let mut pi = PurchaseInvoice::create(
            id,
            supplier_id,
            purchase_order_id,
            grn_id,
            invoice_date,
            items,
            tax_rate,
        )?;
        pi.bump_version();
        Self::record_history(&state, &pi, actor, None)?;
        state.purchase_invoices.insert(id, pi);
        info!(pi_id = %id, "purchase invoice created");
        Ok(id)
    }

    pub fn purchase_invoice(&self, id: DocumentId) -> DomainResult<PurchaseInvoice> {
        Ok(self.lock()?.purchase_invoice(id)?.clone())
    }

    pub fn record_purchase_invoice_payment(
        &self,
        actor: UserId,
        pi_id: DocumentId,
        amount: f64,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.purchase_invoice(pi_id)?.record_payment(amount)?;
        let mut pi = t.document;
        pi.bump_version();
        Self::record_history(&state, &pi, actor, None)?;
        info!(pi_id = %pi_id, status = ?pi.status(), "purchase invoice payment recorded");
        state.purchase_invoices.insert(pi_id, pi);
        Ok(())
    }

    pub fn cancel_purchase_invoice(
        &self,
        actor: UserId,
        pi_id: DocumentId,
        reason: &str,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.purchase_invoice(pi_id)?.cancel(reason)?;
        let mut pi = t.document;
        pi.bump_version();
        let reason = pi.cancel_reason().map(str::to_string);
        Self::record_history(&state, &pi, actor, reason)?;
        state.purchase_invoices.insert(pi_id, pi);
        Ok(())
    }

    /// Landed-cost breakdown for an order, folding in its completed
    /// receipts' costs.
    pub fn landed_cost_for_purchase_order(&self, po_id: DocumentId) -> DomainResult<LandedCost> {
        let state = self.lock()?;
        let po = state.purchase_order(po_id)?;
        let receipts: Vec<GoodsReceiptNote> = state
            .receipts
            .values()
            .filter(|g| g.purchase_order_id() == po_id)
            .cloned()
            .collect();
        LandedCost::for_purchase_order(po, &receipts)
    }

    pub fn landed_cost_for_receipt(&self, grn_id: DocumentId) -> DomainResult<LandedCost> {
        let state = self.lock()?;
        let grn = state.receipt(grn_id)?;
        let po = state.purchase_order(grn.purchase_order_id())?;
        LandedCost::for_receipt(grn, po)
    }

    /// Three-way match for a supplier invoice. An invoice linked to a
    /// receipt matches against that receipt alone (and its order); one
    /// linked only to an order matches against all of the order's receipts.
    pub fn match_purchase_invoice(&self, pi_id: DocumentId) -> DomainResult<MatchReport> {
        let state = self.lock()?;
        let pi = state.purchase_invoice(pi_id)?;
        if let Some(grn_id) = pi.grn_id() {
            let grn = state.receipt(grn_id)?;
            let po = state.purchase_order(grn.purchase_order_id())?;
            return Ok(three_way_match(po, std::slice::from_ref(grn), pi));
        }
        let po_id = pi.purchase_order_id().ok_or_else(|| {
            DomainError::validation(
                "purchase invoice is linked to neither a purchase order nor a goods receipt",
            )
        })?;
        let po = state.purchase_order(po_id)?;
        let receipts: Vec<GoodsReceiptNote> = state
            .receipts
            .values()
            .filter(|g| g.purchase_order_id() == po_id)
            .cloned()
            .collect();
        Ok(three_way_match(po, &receipts, pi))
    }

    // ---- sales -----------------------------------------------------------

    pub fn create_sales_order(
        &self,
        actor: UserId,
        client_id: ClientId,
        warehouse_id: WarehouseId,
        order_date: DateTime<Utc>,
        payment_type: PaymentType,
        items: Vec<NewSoItem>,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        state.client(client_id)?;
        let id = DocumentId::new();
        let mut so =
            SalesOrder::create(id, client_id, warehouse_id, order_date, payment_type, items)?;
        so.bump_version();
        Self::record_history(&state, &so, actor, None)?;
        state.sales_orders.insert(id, so);
        info!(so_id = %id, "sales order created");
        Ok(id)
    }

    pub fn sales_order(&self, id: DocumentId) -> DomainResult<SalesOrder> {
        Ok(self.lock()?.sales_order(id)?.clone())
    }

    pub fn confirm_sales_order(
        &self,
        actor: UserId,
        so_id: DocumentId,
        ovr: &CreditOverride,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let so = state.sales_order(so_id)?.clone();
        let client = state.client(so.client_id())?.clone();
        let t = so.confirm(&client, ovr)?;
        let reason = t.document.credit_override_reason().map(str::to_string);
        Self::commit_so(&mut state, t, actor, reason)
    }

    pub fn cancel_sales_order(
        &self,
        actor: UserId,
        so_id: DocumentId,
        reason: &str,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.sales_order(so_id)?.cancel(reason)?;
        let reason = t.document.cancel_reason().map(str::to_string);
        Self::commit_so(&mut state, t, actor, reason)
    }

    pub fn close_sales_order(&self, actor: UserId, so_id: DocumentId) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.sales_order(so_id)?.close()?;
        Self::commit_so(&mut state, t, actor, None)
    }

    fn commit_so(
        state: &mut EngineState,
        t: Transition<SalesOrder>,
        actor: UserId,
        reason: Option<String>,
    ) -> DomainResult<()> {
        let mut so = t.document;
        so.bump_version();
        Self::record_history(state, &so, actor, reason)?;
        info!(so_id = %so.id(), status = ?so.status(), "sales order updated");
        state.sales_orders.insert(so.id(), so);
        Ok(())
    }

    pub fn create_delivery_note(
        &self,
        actor: UserId,
        so_id: DocumentId,
        lines: Vec<NewDnLine>,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        let so = state.sales_order(so_id)?.clone();
        let id = DocumentId::new();
        let mut dn = DeliveryNote::create(&so, id, Utc::now(), lines)?;
        dn.bump_version();
        Self::record_history(&state, &dn, actor, None)?;
        state.delivery_notes.insert(id, dn);
        info!(dn_id = %id, so_id = %so_id, "delivery note created");
        Ok(id)
    }

    pub fn delivery_note(&self, id: DocumentId) -> DomainResult<DeliveryNote> {
        Ok(self.lock()?.delivery_note(id)?.clone())
    }

    /// Ship goods without an order: a standalone note for the client,
    /// dispatched through the same lifecycle but with nothing to accrue.
    pub fn create_standalone_delivery_note(
        &self,
        actor: UserId,
        client_id: ClientId,
        warehouse_id: WarehouseId,
        lines: Vec<NewStandaloneDnLine>,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        state.client(client_id)?;
        let id = DocumentId::new();
        let mut dn =
            DeliveryNote::create_standalone(id, client_id, warehouse_id, Utc::now(), lines)?;
        dn.bump_version();
        Self::record_history(&state, &dn, actor, None)?;
        state.delivery_notes.insert(id, dn);
        info!(dn_id = %id, client_id = %client_id, "standalone delivery note created");
        Ok(id)
    }

    /// Dispatch: the stock-moving step. All lines deduct or none do, and
    /// a parent order's delivered quantities accrue in the same commit.
    pub fn dispatch_delivery_note(&self, actor: UserId, dn_id: DocumentId) -> DomainResult<()> {
        let mut state = self.lock()?;
        let dn = state.delivery_note(dn_id)?.clone();

        let dispatched_at = Utc::now();
        let dn_t = dn.dispatch(actor, dispatched_at)?;
        let so_t = match dn.sales_order_id() {
            Some(so_id) => {
                let so = state.sales_order(so_id)?.clone();
                Some(so.record_delivery(&dn_t.document.delivery_lines())?)
            }
            None => None,
        };

        state.ledger.apply_all(&dn_t.effects)?;
        Self::record_movements(
            &mut state,
            &dn_t.effects,
            MovementType::Delivery,
            EntityKind::DeliveryNote,
            dn_id,
            actor,
            dispatched_at,
            None,
        );

        let mut dispatched = dn_t.document;
        dispatched.bump_version();
        Self::record_history(&state, &dispatched, actor, None)?;
        state.delivery_notes.insert(dn_id, dispatched);
        if let Some(so_t) = so_t {
            Self::commit_so(&mut state, so_t, actor, None)?;
        }
        info!(dn_id = %dn_id, "delivery note dispatched");
        Ok(())
    }

    pub fn mark_delivered(&self, actor: UserId, dn_id: DocumentId) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.delivery_note(dn_id)?.deliver(Utc::now())?;
        let mut dn = t.document;
        dn.bump_version();
        Self::record_history(&state, &dn, actor, None)?;
        state.delivery_notes.insert(dn_id, dn);
        Ok(())
    }

    pub fn cancel_delivery_note(
        &self,
        actor: UserId,
        dn_id: DocumentId,
        reason: &str,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.delivery_note(dn_id)?.cancel(reason)?;
        let mut dn = t.document;
        dn.bump_version();
        let reason = dn.cancel_reason().map(str::to_string);
        Self::record_history(&state, &dn, actor, reason)?;
        state.delivery_notes.insert(dn_id, dn);
        Ok(())
    }

    // ---- invoicing -------------------------------------------------------

    pub fn create_direct_invoice(
        &self,
        actor: UserId,
        client_id: ClientId,
        warehouse_id: WarehouseId,
        invoice_date: DateTime<Utc>,
        payment_type: PaymentType,
        items: Vec<NewInvoiceItem>,
        tax_rate: f64,
        ovr: &CreditOverride,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        let client = state.client(client_id)?.clone();
        let id = DocumentId::new();
        let t = SalesInvoice::direct(
            id,
            &client,
            ovr,
            warehouse_id,
            invoice_date,
            payment_type,
            items,
            tax_rate,
        )?;
        Self::commit_new_invoice(&mut state, t, actor, invoice_date)?;
        info!(invoice_id = %id, "direct sales invoice created");
        Ok(id)
    }

    pub fn invoice_sales_order(
        &self,
        actor: UserId,
        so_id: DocumentId,
        lines: &[(SalesOrderItemId, i64)],
        tax_rate: f64,
        ovr: &CreditOverride,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        let so = state.sales_order(so_id)?.clone();
        let client = state.client(so.client_id())?.clone();

        let id = DocumentId::new();
        let invoice_date = Utc::now();
        let t =
            SalesInvoice::from_sales_order(&so, &client, ovr, id, invoice_date, lines, tax_rate)?;
        let so_t = so.record_invoice(&t.document.invoice_lines())?;

        Self::commit_new_invoice(&mut state, t, actor, invoice_date)?;
        Self::commit_so(&mut state, so_t, actor, None)?;
        info!(invoice_id = %id, so_id = %so_id, "sales order invoiced");
        Ok(id)
    }

    pub fn invoice_delivery_note(
        &self,
        actor: UserId,
        dn_id: DocumentId,
        tax_rate: f64,
        ovr: &CreditOverride,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        let dn = state.delivery_note(dn_id)?.clone();
        let so_id = dn.sales_order_id().ok_or_else(|| {
            DomainError::validation(
                "delivery note has no sales order; bill the client with a direct invoice",
            )
        })?;
        let so = state.sales_order(so_id)?.clone();
        let client = state.client(so.client_id())?.clone();

        let id = DocumentId::new();
        let invoice_date = Utc::now();
        let t = SalesInvoice::from_delivery_note(
            &dn,
            &so,
            &client,
            ovr,
            id,
            invoice_date,
            tax_rate,
        )?;
        let so_t = so.record_invoice(&t.document.invoice_lines())?;

        Self::commit_new_invoice(&mut state, t, actor, invoice_date)?;
        Self::commit_so(&mut state, so_t, actor, None)?;
        info!(invoice_id = %id, dn_id = %dn_id, "delivery note invoiced");
        Ok(id)
    }

    fn commit_new_invoice(
        state: &mut EngineState,
        t: Transition<SalesInvoice>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        state.ledger.apply_all(&t.effects)?;
        state.apply_balance_effects(&t.effects)?;
        let id = t.document.id();
        Self::record_movements(
            state,
            &t.effects,
            MovementType::Sale,
            EntityKind::SalesInvoice,
            id,
            actor,
            at,
            None,
        );
        let reason = t.document.credit_override_reason().map(str::to_string);
        let mut invoice = t.document;
        invoice.bump_version();
        Self::record_history(state, &invoice, actor, reason)?;
        state.sales_invoices.insert(id, invoice);
        Ok(())
    }

    pub fn sales_invoice(&self, id: DocumentId) -> DomainResult<SalesInvoice> {
        Ok(self.lock()?.sales_invoice(id)?.clone())
    }

    pub fn record_invoice_payment(
        &self,
        actor: UserId,
        invoice_id: DocumentId,
        amount: f64,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.sales_invoice(invoice_id)?.record_payment(amount)?;
        let mut invoice = t.document;
        invoice.bump_version();
        Self::record_history(&state, &invoice, actor, None)?;
        info!(invoice_id = %invoice_id, status = ?invoice.status(), "invoice payment recorded");
        state.sales_invoices.insert(invoice_id, invoice);
        Ok(())
    }

    /// Void an invoice: stock restored, CREDIT balance released, and any
    /// linked order's invoiced quantities walked back.
    pub fn void_sales_invoice(
        &self,
        actor: UserId,
        invoice_id: DocumentId,
        reason: &str,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let invoice = state.sales_invoice(invoice_id)?.clone();

        let has_applied_credit_note = state
            .credit_notes
            .values()
            .any(|cn| cn.invoice_id() == invoice_id && cn.status() == CreditNoteStatus::Applied);

        let voided_at = Utc::now();
        let t = invoice.void(
            &self.config.void_policy,
            has_applied_credit_note,
            actor,
            voided_at,
            reason,
        )?;

        let so_t = match invoice.sales_order_id() {
            Some(so_id) => {
                let so = state.sales_order(so_id)?.clone();
                let reversal: Vec<(SalesOrderItemId, i64)> = invoice
                    .invoice_lines()
                    .into_iter()
                    .map(|(item_id, qty)| (item_id, -qty))
                    .collect();
                Some(so.record_invoice(&reversal)?)
            }
            None => None,
        };

        state.ledger.apply_all(&t.effects)?;
        state.apply_balance_effects(&t.effects)?;
        Self::record_movements(
            &mut state,
            &t.effects,
            MovementType::SalesReturn,
            EntityKind::SalesInvoice,
            invoice_id,
            actor,
            voided_at,
            Some("invoice voided"),
        );

        let reason = t.document.void_reason().map(str::to_string);
        let mut voided = t.document;
        voided.bump_version();
        Self::record_history(&state, &voided, actor, reason)?;
        state.sales_invoices.insert(invoice_id, voided);
        if let Some(so_t) = so_t {
            Self::commit_so(&mut state, so_t, actor, None)?;
        }
        info!(invoice_id = %invoice_id, "sales invoice voided");
        Ok(())
    }

    pub fn create_credit_note(
        &self,
        actor: UserId,
        invoice_id: DocumentId,
        lines: Vec<NewCreditLine>,
        reason: &str,
    ) -> DomainResult<DocumentId> {
        let mut state = self.lock()?;
        let invoice = state.sales_invoice(invoice_id)?.clone();
        let prior: Vec<CreditNote> = state
            .credit_notes
            .values()
            .filter(|cn| cn.invoice_id() == invoice_id)
            .cloned()
            .collect();

        let id = DocumentId::new();
        let mut cn = CreditNote::create(&invoice, &prior, id, Utc::now(), lines, reason)?;
        cn.bump_version();
        Self::record_history(&state, &cn, actor, Some(cn.reason().to_string()))?;
        state.credit_notes.insert(id, cn);
        info!(cn_id = %id, invoice_id = %invoice_id, "credit note drafted");
        Ok(id)
    }

    pub fn credit_note(&self, id: DocumentId) -> DomainResult<CreditNote> {
        Ok(self.lock()?.credit_note(id)?.clone())
    }

    pub fn apply_credit_note(&self, actor: UserId, cn_id: DocumentId) -> DomainResult<()> {
        let mut state = self.lock()?;
        let applied_at = Utc::now();
        let t = state.credit_note(cn_id)?.apply(applied_at)?;

        state.ledger.apply_all(&t.effects)?;
        state.apply_balance_effects(&t.effects)?;
        Self::record_movements(
            &mut state,
            &t.effects,
            MovementType::SalesReturn,
            EntityKind::CreditNote,
            cn_id,
            actor,
            applied_at,
            None,
        );

        let mut cn = t.document;
        cn.bump_version();
        Self::record_history(&state, &cn, actor, None)?;
        state.credit_notes.insert(cn_id, cn);
        info!(cn_id = %cn_id, "credit note applied");
        Ok(())
    }

    pub fn void_credit_note(
        &self,
        actor: UserId,
        cn_id: DocumentId,
        reason: &str,
    ) -> DomainResult<()> {
        let mut state = self.lock()?;
        let t = state.credit_note(cn_id)?.void(reason)?;

        state.ledger.apply_all(&t.effects)?;
        state.apply_balance_effects(&t.effects)?;
        Self::record_movements(
            &mut state,
            &t.effects,
            MovementType::Adjustment,
            EntityKind::CreditNote,
            cn_id,
            actor,
            Utc::now(),
            Some("credit note voided"),
        );

        let reason = t.document.void_reason().map(str::to_string);
        let mut cn = t.document;
        cn.bump_version();
        Self::record_history(&state, &cn, actor, reason)?;
        state.credit_notes.insert(cn_id, cn);
        Ok(())
    }

    // ---- inventory / history queries ------------------------------------

    pub fn available_stock(&self, key: &StockKey) -> DomainResult<i64> {
        Ok(self.lock()?.ledger.available(key))
    }

    pub fn movements_for(&self, reference_id: DocumentId) -> DomainResult<Vec<StockMovement>> {
        Ok(self
            .lock()?
            .movements
            .for_reference(reference_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn history_entries(&self, entity: EntityRef) -> DomainResult<Vec<ChangeHistoryEntry>> {
        self.lock()?.history.entries(entity)
    }

    /// Read-only rollback check: would restoring this version succeed, and
    /// if not, which live documents block it.
    pub fn can_rollback(
        &self,
        entity: EntityRef,
        target_version: u64,
    ) -> DomainResult<(bool, Vec<Blocker>)> {
        let state = self.lock()?;
        history::can_rollback(&state.history, &*state, entity, target_version)
    }

    /// Restore an entity to a prior version. The restored snapshot is
    /// appended as the new latest history entry and rehydrated into the
    /// store.
    pub fn rollback(
        &self,
        actor: UserId,
        entity: EntityRef,
        target_version: u64,
        reason: &str,
    ) -> DomainResult<u64> {
        let mut state = self.lock()?;
        let entry = history::rollback_to_version(
            &state.history,
            &*state,
            entity,
            target_version,
            actor,
            Utc::now(),
            reason,
        )?;

        let rehydrate = |msg: serde_json::Error| {
            DomainError::validation(format!("snapshot rehydration: {msg}"))
        };
        match entity.kind {
            EntityKind::PurchaseOrder => {
                let doc: PurchaseOrder =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.purchase_orders.insert(doc.id(), doc);
            }
            EntityKind::GoodsReceiptNote => {
                let doc: GoodsReceiptNote =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.receipts.insert(doc.id(), doc);
            }
            EntityKind::PurchaseInvoice => {
                let doc: PurchaseInvoice =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.purchase_invoices.insert(doc.id(), doc);
            }
            EntityKind::SalesOrder => {
                let doc: SalesOrder =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.sales_orders.insert(doc.id(), doc);
            }
            EntityKind::DeliveryNote => {
                let doc: DeliveryNote =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.delivery_notes.insert(doc.id(), doc);
            }
            EntityKind::SalesInvoice => {
                let doc: SalesInvoice =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.sales_invoices.insert(doc.id(), doc);
            }
            EntityKind::CreditNote => {
                let doc: CreditNote =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.credit_notes.insert(doc.id(), doc);
            }
            EntityKind::Client => {
                let client: Client =
                    serde_json::from_value(entry.snapshot.clone()).map_err(rehydrate)?;
                state.clients.insert(client.id(), client);
            }
        }
        info!(entity = %entity, version = entry.version, "entity rolled back");
        Ok(entry.version)
    }
}
