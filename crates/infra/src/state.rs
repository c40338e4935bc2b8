//! Mutable engine state: document stores, ledger, movement trail, history.

use std::collections::HashMap;

use tradeflow_core::{ClientId, DocumentId, DomainError, DomainResult, Effect, EntityKind};
use tradeflow_history::{Blocker, ChangeLog, DependencyProbe, EntityRef};
use tradeflow_inventory::{InventoryLedger, MovementLog};
use tradeflow_invoicing::{CreditNote, CreditNoteStatus, SalesInvoice, SalesInvoiceStatus};
use tradeflow_parties::client::Client;
use tradeflow_purchasing::{GoodsReceiptNote, GrnStatus, PurchaseInvoice, PurchaseInvoiceStatus, PurchaseOrder};
use tradeflow_sales::{DeliveryNote, SalesOrder};

/// Everything the engine guards behind its lock. In-memory stores keyed by
/// id, in the shape a persistence layer would mirror table-per-type.
#[derive(Debug, Default)]
pub struct EngineState {
    pub(crate) clients: HashMap<ClientId, Client>,
    pub(crate) purchase_orders: HashMap<DocumentId, PurchaseOrder>,
    pub(crate) receipts: HashMap<DocumentId, GoodsReceiptNote>,
    pub(crate) purchase_invoices: HashMap<DocumentId, PurchaseInvoice>,
    pub(crate) sales_orders: HashMap<DocumentId, SalesOrder>,
    pub(crate) delivery_notes: HashMap<DocumentId, DeliveryNote>,
    pub(crate) sales_invoices: HashMap<DocumentId, SalesInvoice>,
    pub(crate) credit_notes: HashMap<DocumentId, CreditNote>,
    pub(crate) ledger: InventoryLedger,
    pub(crate) movements: MovementLog,
    pub(crate) history: ChangeLog,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn client(&self, id: ClientId) -> DomainResult<&Client> {
        self.clients
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("client {id}")))
    }

    pub(crate) fn purchase_order(&self, id: DocumentId) -> DomainResult<&PurchaseOrder> {
        self.purchase_orders
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("purchase order {id}")))
    }

    pub(crate) fn receipt(&self, id: DocumentId) -> DomainResult<&GoodsReceiptNote> {
        self.receipts
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("goods receipt {id}")))
    }

    pub(crate) fn purchase_invoice(&self, id: DocumentId) -> DomainResult<&PurchaseInvoice> {
        self.purchase_invoices
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("purchase invoice {id}")))
    }

    pub(crate) fn sales_order(&self, id: DocumentId) -> DomainResult<&SalesOrder> {
        self.sales_orders
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("sales order {id}")))
    }

    pub(crate) fn delivery_note(&self, id: DocumentId) -> DomainResult<&DeliveryNote> {
        self.delivery_notes
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("delivery note {id}")))
    }

    pub(crate) fn sales_invoice(&self, id: DocumentId) -> DomainResult<&SalesInvoice> {
        self.sales_invoices
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("sales invoice {id}")))
    }

    pub(crate) fn credit_note(&self, id: DocumentId) -> DomainResult<&CreditNote> {
        self.credit_notes
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("credit note {id}")))
    }

    /// Apply the balance effects of a transition. Validates every referenced
    /// client before mutating any, so a bad batch changes nothing.
    pub(crate) fn apply_balance_effects(&mut self, effects: &[Effect]) -> DomainResult<()> {
        for effect in effects {
            if let Effect::BalanceCharge { client_id, .. } | Effect::BalanceRelease { client_id, .. } =
                effect
            {
                self.client(*client_id)?;
            }
        }
        for effect in effects {
            match effect {
                Effect::BalanceCharge { client_id, amount } => {
                    let client = self.clients.get_mut(client_id).ok_or_else(|| {
                        DomainError::not_found(format!("client {client_id}"))
                    })?;
                    client.apply_charge(*amount);
                    client.bump_version();
                }
                Effect::BalanceRelease { client_id, amount } => {
                    let client = self.clients.get_mut(client_id).ok_or_else(|| {
                        DomainError::not_found(format!("client {client_id}"))
                    })?;
                    client.apply_release(*amount);
                    client.bump_version();
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl DependencyProbe for EngineState {
    fn active_dependents(&self, entity: EntityRef) -> Vec<Blocker> {
        let mut blockers = Vec::new();
        match entity.kind {
            EntityKind::PurchaseOrder => {
                let id = DocumentId::from_uuid(entity.id);
                for (grn_id, grn) in &self.receipts {
                    if grn.purchase_order_id() == id && grn.status() == GrnStatus::Completed {
                        blockers.push(Blocker {
                            entity: EntityRef::new(EntityKind::GoodsReceiptNote, *grn_id),
                            description: "COMPLETED goods receipt".to_string(),
                        });
                    }
                }
                for (pi_id, pi) in &self.purchase_invoices {
                    if pi.purchase_order_id() == Some(id)
                        && pi.status() != PurchaseInvoiceStatus::Cancelled
                    {
                        blockers.push(Blocker {
                            entity: EntityRef::new(EntityKind::PurchaseInvoice, *pi_id),
                            description: format!("{:?} purchase invoice", pi.status()),
                        });
                    }
                }
            }
            EntityKind::SalesOrder => {
                let id = DocumentId::from_uuid(entity.id);
                for (dn_id, dn) in &self.delivery_notes {
                    if dn.sales_order_id() == Some(id)
                        && dn.status() != tradeflow_sales::DeliveryNoteStatus::Cancelled
                    {
                        blockers.push(Blocker {
                            entity: EntityRef::new(EntityKind::DeliveryNote, *dn_id),
                            description: format!("{:?} delivery note", dn.status()),
                        });
                    }
                }
                for (inv_id, inv) in &self.sales_invoices {
                    if inv.sales_order_id() == Some(id)
                        && inv.status() != SalesInvoiceStatus::Voided
                    {
                        blockers.push(Blocker {
                            entity: EntityRef::new(EntityKind::SalesInvoice, *inv_id),
                            description: format!("{:?} sales invoice", inv.status()),
                        });
                    }
                }
            }
            EntityKind::SalesInvoice => {
                let id = DocumentId::from_uuid(entity.id);
                for (cn_id, cn) in &self.credit_notes {
                    if cn.invoice_id() == id && cn.status() == CreditNoteStatus::Applied {
                        blockers.push(Blocker {
                            entity: EntityRef::new(EntityKind::CreditNote, *cn_id),
                            description: "APPLIED credit note".to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
        blockers
    }
}
