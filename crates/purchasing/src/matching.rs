//! Three-way match: purchase order vs. goods receipts vs. supplier invoice.
//!
//! A diagnostic read model. It never blocks a transition; payment approval
//! policy lives with the caller.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tradeflow_core::{ProductId, VariantId};

use crate::invoice::PurchaseInvoice;
use crate::order::PurchaseOrder;
use crate::receipt::{GoodsReceiptNote, GrnStatus};

/// Absolute unit-cost tolerance. Differences at or below this are rounding
/// noise, not variances.
pub const COST_TOLERANCE: f64 = 1e-4;

/// Per-line comparison across the three documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRow {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub ordered_qty: Option<i64>,
    pub received_qty: Option<i64>,
    pub invoiced_qty: i64,
    pub po_unit_cost: Option<f64>,
    pub invoiced_unit_cost: f64,
    pub qty_match: bool,
    pub cost_match: bool,
}

impl MatchRow {
    pub fn is_clean(&self) -> bool {
        self.qty_match && self.cost_match
    }
}

/// Match outcome for one supplier invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub rows: Vec<MatchRow>,
    pub variance_count: usize,
}

impl MatchReport {
    pub fn is_clean(&self) -> bool {
        self.variance_count == 0
    }
}

/// Compare an invoice's lines against the order and its COMPLETED receipts.
///
/// Quantity matches against received goods when any receipt exists for the
/// line, falling back to the ordered quantity otherwise. Cost matches the
/// PO's agreed unit cost within [`COST_TOLERANCE`]; a line absent from the
/// PO has nothing to disagree with and passes on cost.
pub fn three_way_match(
    po: &PurchaseOrder,
    receipts: &[GoodsReceiptNote],
    invoice: &PurchaseInvoice,
) -> MatchReport {
    type LineKey = (ProductId, Option<VariantId>);

    let mut ordered: HashMap<LineKey, (i64, f64)> = HashMap::new();
    for item in po.items() {
        let entry = ordered
            .entry((item.product_id, item.variant_id))
            .or_insert((0, item.unit_cost));
        entry.0 += item.ordered_qty;
    }

    let mut received: HashMap<LineKey, i64> = HashMap::new();
    for grn in receipts {
        if grn.status() != GrnStatus::Completed {
            continue;
        }
        for line in grn.items() {
            if let Some(po_item) = po.item(line.po_item_id) {
                *received
                    .entry((po_item.product_id, po_item.variant_id))
                    .or_insert(0) += line.received_qty;
            }
        }
    }

    let rows: Vec<MatchRow> = invoice
        .items()
        .iter()
        .map(|item| {
            let key = (item.product_id, item.variant_id);
            let po_line = ordered.get(&key).copied();
            let received_qty = received.get(&key).copied();

            let qty_match = match (received_qty, po_line) {
                (Some(grn_qty), _) => item.qty == grn_qty,
                (None, Some((po_qty, _))) => item.qty == po_qty,
                (None, None) => false,
            };
            let cost_match = match po_line {
                Some((_, po_cost)) => (item.unit_cost - po_cost).abs() <= COST_TOLERANCE,
                None => true,
            };

            MatchRow {
                product_id: item.product_id,
                variant_id: item.variant_id,
                ordered_qty: po_line.map(|(q, _)| q),
                received_qty,
                invoiced_qty: item.qty,
                po_unit_cost: po_line.map(|(_, c)| c),
                invoiced_unit_cost: item.unit_cost,
                qty_match,
                cost_match,
            }
        })
        .collect();

    let variance_count = rows.iter().filter(|r| !r.is_clean()).count();
    MatchReport {
        rows,
        variance_count,
    }
}
