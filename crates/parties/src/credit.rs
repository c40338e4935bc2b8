//! Credit control: exposure vs. limit, with an audited admin override.

use serde::{Deserialize, Serialize};

use tradeflow_core::{require_reason, DomainError, DomainResult};

use crate::client::Client;

/// Utilization percentage at which a decision is flagged WARNING.
pub const DEFAULT_WARNING_THRESHOLD: f64 = 80.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditStatus {
    Ok,
    Warning,
    Exceeded,
}

/// Result of evaluating a client's exposure against a pending amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCheck {
    pub status: CreditStatus,
    pub current_balance: f64,
    pub credit_limit: f64,
    pub pending_total: f64,
    pub new_balance: f64,
    pub utilization: f64,
    pub message: String,
}

impl CreditCheck {
    /// Evaluate `utilization = (balance + pending) / limit * 100`.
    ///
    /// A zero limit yields utilization 0 (unlimited terms, matching the
    /// source system's guard against division by zero).
    pub fn evaluate(client: &Client, pending_total: f64, warning_threshold: f64) -> Self {
        let current_balance = client.balance();
        let credit_limit = client.credit_limit();
        let new_balance = current_balance + pending_total;
        let utilization = if credit_limit > 0.0 {
            new_balance / credit_limit * 100.0
        } else {
            0.0
        };

        let (status, message) = if utilization > 100.0 {
            (
                CreditStatus::Exceeded,
                format!(
                    "credit limit exceeded: balance {current_balance:.4}, limit {credit_limit:.4}, new total {new_balance:.4}"
                ),
            )
        } else if utilization >= warning_threshold {
            (
                CreditStatus::Warning,
                format!("client approaching credit limit ({utilization:.0}% utilized)"),
            )
        } else {
            (CreditStatus::Ok, "credit limit ok".to_string())
        };

        Self {
            status,
            current_balance,
            credit_limit,
            pending_total,
            new_balance,
            utilization,
            message,
        }
    }
}

/// Escape hatch supplied by the caller when creating a CREDIT document for a
/// client over their limit. The reason is recorded on the document for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditOverride {
    pub admin_override: bool,
    pub reason: Option<String>,
}

impl CreditOverride {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            admin_override: true,
            reason: Some(reason.into()),
        }
    }
}

/// Gate a CREDIT document against the check result.
///
/// Returns the override reason to record on the document when an EXCEEDED
/// check was overridden, `None` when no override was needed. Rejects with
/// `CreditLimitExceeded` when over the limit without an override, and with
/// `MissingReason` when the override lacks reason text.
pub fn authorize(check: &CreditCheck, ovr: &CreditOverride) -> DomainResult<Option<String>> {
    match check.status {
        CreditStatus::Exceeded => {
            if !ovr.admin_override {
                return Err(DomainError::credit_limit_exceeded(format!(
                    "{} (admin override required)",
                    check.message
                )));
            }
            let reason = ovr.reason.as_deref().unwrap_or("");
            Ok(Some(require_reason(reason, "credit limit override")?))
        }
        CreditStatus::Warning | CreditStatus::Ok => Ok(None),
    }
}
