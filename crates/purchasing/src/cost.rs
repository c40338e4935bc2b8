use serde::{Deserialize, Serialize};

use tradeflow_core::{DomainError, DomainResult};

/// Category of an additional (landed) cost entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostType {
    Shipping,
    Customs,
    Tax,
    Other,
}

/// Additional cost recorded against a purchase order or a goods receipt,
/// allocated proportionally across received lines by the landed-cost
/// allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalCost {
    pub cost_type: CostType,
    pub amount: f64,
    pub description: Option<String>,
}

impl AdditionalCost {
    pub fn new(cost_type: CostType, amount: f64, description: Option<String>) -> DomainResult<Self> {
        if amount <= 0.0 {
            return Err(DomainError::validation(format!(
                "cost amount must be greater than 0 (got {amount})"
            )));
        }
        Ok(Self {
            cost_type,
            amount,
            description,
        })
    }
}
