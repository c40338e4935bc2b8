use serde::{Deserialize, Serialize};

use tradeflow_core::{ClientId, DomainError, DomainResult};

/// Client (credit-side counterparty).
///
/// `balance` is the outstanding CREDIT exposure, mutated only by
/// SalesInvoice/CreditNote transitions through the engine. Everything else is
/// read-only master data from the excluded CRUD layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    id: ClientId,
    name: String,
    balance: f64,
    credit_limit: f64,
    payment_terms_days: i64,
    version: u64,
}

impl Client {
    pub fn new(
        id: ClientId,
        name: impl Into<String>,
        credit_limit: f64,
        payment_terms_days: i64,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("client name cannot be empty"));
        }
        if credit_limit < 0.0 {
            return Err(DomainError::validation("credit limit cannot be negative"));
        }
        if payment_terms_days < 0 {
            return Err(DomainError::validation(
                "payment terms days cannot be negative",
            ));
        }
        Ok(Self {
            id,
            name,
            balance: 0.0,
            credit_limit,
            payment_terms_days,
            version: 0,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn credit_limit(&self) -> f64 {
        self.credit_limit
    }

    pub fn payment_terms_days(&self) -> i64 {
        self.payment_terms_days
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Increase outstanding balance (CREDIT invoice issued).
    pub fn apply_charge(&mut self, amount: f64) {
        self.balance += amount;
    }

    /// Reduce outstanding balance (void/return/payment), clamped at zero.
    pub fn apply_release(&mut self, amount: f64) {
        self.balance = (self.balance - amount).max(0.0);
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_clamps_at_zero() {
        let mut client = Client::new(ClientId::new(), "Acme", 1000.0, 30).unwrap();
        client.apply_charge(100.0);
        client.apply_release(150.0);
        assert_eq!(client.balance(), 0.0);
    }

    #[test]
    fn rejects_empty_name_and_negative_limit() {
        assert!(Client::new(ClientId::new(), "  ", 10.0, 30).is_err());
        assert!(Client::new(ClientId::new(), "Acme", -1.0, 30).is_err());
        assert!(Client::new(ClientId::new(), "Acme", 10.0, -1).is_err());
    }
}
