use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tradeflow_core::{DomainError, DomainResult, Effect, StockKey};

/// Quantity held against one ledger key, plus the bin recorded at receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity: i64,
    pub bin_location: Option<String>,
}

/// Per-warehouse, per-product(+variant+batch) quantity store.
///
/// Invariant: every record's quantity stays ≥ 0 after any sequence of
/// operations. Deductions that would break it are rejected whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryLedger {
    records: HashMap<StockKey, StockLevel>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity available for the key. A key without a batch sums across all
    /// batches of the same product/variant/warehouse line; a batch-specific
    /// key reads that record only.
    pub fn available(&self, key: &StockKey) -> i64 {
        if key.batch_no.is_some() {
            return self.records.get(key).map(|r| r.quantity).unwrap_or(0);
        }
        self.records
            .iter()
            .filter(|(k, _)| k.same_line(key))
            .map(|(_, r)| r.quantity)
            .sum()
    }

    /// Soft availability check (no mutation). Used for UI display only; the
    /// authoritative check happens inside `deduct`.
    pub fn reserve(&self, key: &StockKey, qty: i64) -> DomainResult<()> {
        let available = self.available(key);
        if available < qty {
            return Err(DomainError::insufficient_stock(format!(
                "available {available}, requested {qty} for {key}"
            )));
        }
        Ok(())
    }

    /// Add newly received stock, creating the batch record if absent.
    pub fn receive(&mut self, key: &StockKey, qty: i64, bin_location: Option<String>) {
        let record = self.records.entry(key.clone()).or_insert(StockLevel {
            quantity: 0,
            bin_location: bin_location.clone(),
        });
        record.quantity += qty;
        if record.bin_location.is_none() {
            record.bin_location = bin_location;
        }
    }

    /// Remove stock. Batch-specific keys deduct that record only; keys
    /// without a batch drain matching records in batch order (batchless
    /// first, then ascending batch number — deterministic, not
    /// expiry-inferred). Fails with `InsufficientStock` if the line lacks
    /// enough quantity, naming the shortfall; on failure nothing is applied.
    pub fn deduct(&mut self, key: &StockKey, qty: i64) -> DomainResult<i64> {
        let available = self.available(key);
        if available < qty {
            return Err(DomainError::insufficient_stock(format!(
                "available {available}, requested {qty} for {key}"
            )));
        }

        if key.batch_no.is_some() {
            let record = self
                .records
                .get_mut(key)
                .ok_or_else(|| DomainError::not_found(format!("inventory record {key}")))?;
            record.quantity -= qty;
            return Ok(qty);
        }

        let mut batches: Vec<StockKey> = self
            .records
            .iter()
            .filter(|(k, r)| k.same_line(key) && r.quantity > 0)
            .map(|(k, _)| k.clone())
            .collect();
        batches.sort_by(|a, b| a.batch_no.cmp(&b.batch_no));

        let mut remaining = qty;
        for batch_key in batches {
            if remaining == 0 {
                break;
            }
            if let Some(record) = self.records.get_mut(&batch_key) {
                let take = remaining.min(record.quantity);
                record.quantity -= take;
                remaining -= take;
            }
        }
        debug_assert_eq!(remaining, 0, "availability was checked up front");
        Ok(qty)
    }

    /// Return stock to the key (reversal path). Always succeeds; creates the
    /// record when the original batch no longer exists.
    pub fn restore(&mut self, key: &StockKey, qty: i64) {
        self.records
            .entry(key.clone())
            .or_insert(StockLevel {
                quantity: 0,
                bin_location: None,
            })
            .quantity += qty;
    }

    /// Apply one declarative stock effect. Balance effects are not ours.
    pub fn apply(&mut self, effect: &Effect) -> DomainResult<()> {
        match effect {
            Effect::StockDeduct { key, qty } => {
                self.deduct(key, *qty)?;
            }
            Effect::StockRestore { key, qty } => {
                self.restore(key, *qty);
            }
            Effect::StockReceive {
                key,
                qty,
                bin_location,
            } => {
                self.receive(key, *qty, bin_location.clone());
            }
            Effect::BalanceCharge { .. } | Effect::BalanceRelease { .. } => {}
        }
        Ok(())
    }

    /// Apply a batch of effects all-or-nothing: stage against a copy, commit
    /// only if every deduction validates. A multi-line dispatch either fully
    /// applies or leaves the ledger untouched.
    pub fn apply_all(&mut self, effects: &[Effect]) -> DomainResult<()> {
        let mut staged = self.clone();
        for effect in effects {
            staged.apply(effect)?;
        }
        *self = staged;
        Ok(())
    }

    /// Total quantity on hand across every record (diagnostics/tests).
    pub fn total_on_hand(&self) -> i64 {
        self.records.values().map(|r| r.quantity).sum()
    }

    /// Iterate records (read model export).
    pub fn records(&self) -> impl Iterator<Item = (&StockKey, &StockLevel)> {
        self.records.iter()
    }

    /// True if every record satisfies the non-negativity invariant.
    pub fn all_non_negative(&self) -> bool {
        self.records.values().all(|r| r.quantity >= 0)
    }
}
