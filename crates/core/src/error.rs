//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures. Infrastructure
/// concerns (store unreachable, IO) belong elsewhere; everything here is safe
/// to surface to the caller as a rejected transition with the precondition
/// that failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed or missing input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested event is not legal from the document's current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A deduction exceeds the available quantity on a ledger key.
    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// A receipt line exceeds the remaining ordered quantity on a PO line.
    #[error("over-receipt: {0}")]
    OverReceipt(String),

    /// A return line exceeds the remaining returnable quantity on an invoice line.
    #[error("over-return: {0}")]
    OverReturn(String),

    /// A delivery/invoice line exceeds the remaining quantity on an order line.
    #[error("over-invoice: {0}")]
    OverInvoice(String),

    /// A CREDIT document would push the client past their credit limit.
    #[error("credit limit exceeded: {0}")]
    CreditLimitExceeded(String),

    /// A cancel/void/override was attempted without the required reason text.
    #[error("missing reason: {0}")]
    MissingReason(String),

    /// Dependent documents block restoring a prior version.
    #[error("rollback blocked: {0}")]
    RollbackBlocked(String),

    /// Lock/version contention. Safe to retry from scratch.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A requested entity was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn insufficient_stock(msg: impl Into<String>) -> Self {
        Self::InsufficientStock(msg.into())
    }

    pub fn over_receipt(msg: impl Into<String>) -> Self {
        Self::OverReceipt(msg.into())
    }

    pub fn over_return(msg: impl Into<String>) -> Self {
        Self::OverReturn(msg.into())
    }

    pub fn over_invoice(msg: impl Into<String>) -> Self {
        Self::OverInvoice(msg.into())
    }

    pub fn credit_limit_exceeded(msg: impl Into<String>) -> Self {
        Self::CreditLimitExceeded(msg.into())
    }

    pub fn missing_reason(msg: impl Into<String>) -> Self {
        Self::MissingReason(msg.into())
    }

    pub fn rollback_blocked(msg: impl Into<String>) -> Self {
        Self::RollbackBlocked(msg.into())
    }

    pub fn concurrency_conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// True for contention failures the caller may retry verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

/// Require a non-empty reason for destructive transitions (cancel, void,
/// credit-limit override).
pub fn require_reason(reason: &str, context: &str) -> DomainResult<String> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(DomainError::missing_reason(format!(
            "{context} requires a reason"
        )));
    }
    Ok(trimmed.to_string())
}
