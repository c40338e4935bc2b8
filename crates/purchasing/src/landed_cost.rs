//! Landed-cost allocation: spread additional costs (shipping, customs, tax)
//! across lines in proportion to each line's share of the goods value.
//!
//! Computed on demand from the order, its receipts, and their attached
//! costs. Never cached on a document.

use serde::{Deserialize, Serialize};

use tradeflow_core::{Document, DocumentId, DomainError, DomainResult, ProductId, VariantId};

use crate::cost::AdditionalCost;
use crate::order::PurchaseOrder;
use crate::receipt::{GoodsReceiptNote, GrnStatus};

/// Where an allocated cost entry was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostSource {
    PurchaseOrder,
    GoodsReceipt,
}

/// A cost with its origin document, flattened into the allocation input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub source: CostSource,
    pub source_id: DocumentId,
    pub cost: AdditionalCost,
}

/// One allocated line of the landed-cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandedCostLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    pub unit_cost: f64,
    /// qty * unit_cost.
    pub base_value: f64,
    /// This line's proportional share of the total additional costs.
    pub allocated_cost: f64,
    /// (base_value + allocated_cost) / qty.
    pub landed_unit_cost: f64,
}

/// Input line for the allocator.
#[derive(Debug, Clone, PartialEq)]
pub struct CostableLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub qty: i64,
    pub unit_cost: f64,
}

/// Full landed-cost breakdown for an order or a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandedCost {
    pub lines: Vec<LandedCostLine>,
    pub base_total: f64,
    pub cost_total: f64,
    pub grand_total: f64,
}

impl LandedCost {
    /// Allocate `costs` across `lines` in proportion to base value. A zero
    /// base total allocates nothing (all lines free of charge); a zero
    /// quantity yields a zero landed unit cost rather than dividing by it.
    pub fn allocate(lines: &[CostableLine], costs: &[CostEntry]) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "landed cost requires at least one line",
            ));
        }

        let cost_total: f64 = costs.iter().map(|c| c.cost.amount).sum();
        let base_total: f64 = lines
            .iter()
            .map(|l| l.qty as f64 * l.unit_cost)
            .sum();

        let out_lines = lines
            .iter()
            .map(|l| {
                let base_value = l.qty as f64 * l.unit_cost;
                let allocated_cost = if base_total > 0.0 {
                    cost_total * base_value / base_total
                } else {
                    0.0
                };
                let landed_unit_cost = if l.qty > 0 {
                    (base_value + allocated_cost) / l.qty as f64
                } else {
                    0.0
                };
                LandedCostLine {
                    product_id: l.product_id,
                    variant_id: l.variant_id,
                    qty: l.qty,
                    unit_cost: l.unit_cost,
                    base_value,
                    allocated_cost,
                    landed_unit_cost,
                }
            })
            .collect();

        Ok(Self {
            lines: out_lines,
            base_total,
            cost_total,
            grand_total: base_total + cost_total,
        })
    }

    /// Order-level view: ordered quantities at PO unit cost, with the PO's
    /// own costs plus every cost attached to its COMPLETED receipts.
    pub fn for_purchase_order(
        po: &PurchaseOrder,
        receipts: &[GoodsReceiptNote],
    ) -> DomainResult<Self> {
        let lines: Vec<CostableLine> = po
            .items()
            .iter()
            .map(|i| CostableLine {
                product_id: i.product_id,
                variant_id: i.variant_id,
                qty: i.ordered_qty,
                unit_cost: i.unit_cost,
            })
            .collect();

        let mut costs: Vec<CostEntry> = po
            .costs()
            .iter()
            .cloned()
            .map(|cost| CostEntry {
                source: CostSource::PurchaseOrder,
                source_id: po.id(),
                cost,
            })
            .collect();
        for grn in receipts {
            if grn.purchase_order_id() != po.id() || grn.status() != GrnStatus::Completed {
                continue;
            }
            costs.extend(grn.costs().iter().cloned().map(|cost| CostEntry {
                source: CostSource::GoodsReceipt,
                source_id: grn.id(),
                cost,
            }));
        }

        Self::allocate(&lines, &costs)
    }

    /// Receipt-level view: received quantities valued at the PO's unit
    /// costs, with only the receipt's own costs.
    pub fn for_receipt(grn: &GoodsReceiptNote, po: &PurchaseOrder) -> DomainResult<Self> {
        let mut lines = Vec::with_capacity(grn.items().len());
        for item in grn.items() {
            let po_item = po
                .item(item.po_item_id)
                .ok_or_else(|| DomainError::not_found(format!("PO item {}", item.po_item_id)))?;
            lines.push(CostableLine {
                product_id: po_item.product_id,
                variant_id: po_item.variant_id,
                qty: item.received_qty,
                unit_cost: po_item.unit_cost,
            });
        }

        let costs: Vec<CostEntry> = grn
            .costs()
            .iter()
            .cloned()
            .map(|cost| CostEntry {
                source: CostSource::GoodsReceipt,
                source_id: grn.id(),
                cost,
            })
            .collect();

        Self::allocate(&lines, &costs)
    }
}
