//! Customer domain model
//!
//! A customer is the billing root of the hierarchy. It owns projects, project
//! groups and clouds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StructureError, StructureResult};
use crate::quotas::QuotaSet;

/// Billing owner of projects and cloud accounts.
///
/// # Examples
///
/// ```
/// use conductor_structure::Customer;
///
/// let mut customer = Customer::new("Acme Corp").with_abbreviation("ACME");
/// let change = customer.credit_account(100.0).unwrap();
/// assert_eq!(change.balance, 100.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Unique customer ID
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Name in the native language
    #[serde(default)]
    pub native_name: String,

    /// Short name
    #[serde(default)]
    pub abbreviation: String,

    /// Free-form contact details
    #[serde(default)]
    pub contact_details: String,

    /// Company registration code
    #[serde(default)]
    pub registration_code: String,

    /// Account ID in the external billing backend
    pub billing_backend_id: Option<String>,

    /// Prepaid balance
    #[serde(default)]
    pub balance: f64,

    /// When the customer was created
    pub created_at: DateTime<Utc>,

    /// Customer-level quotas
    #[serde(default = "QuotaSet::customer_defaults")]
    pub quotas: QuotaSet,
}

impl Customer {
    /// Creates a new customer with unlimited quotas and zero balance.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            native_name: String::new(),
            abbreviation: String::new(),
            contact_details: String::new(),
            registration_code: String::new(),
            billing_backend_id: None,
            balance: 0.0,
            created_at: Utc::now(),
            quotas: QuotaSet::customer_defaults(),
        }
    }

    /// Set the abbreviation.
    pub fn with_abbreviation(mut self, abbreviation: impl Into<String>) -> Self {
        self.abbreviation = abbreviation.into();
        self
    }

    /// Set the native name.
    pub fn with_native_name(mut self, native_name: impl Into<String>) -> Self {
        self.native_name = native_name.into();
        self
    }

    /// Set contact details.
    pub fn with_contact_details(mut self, details: impl Into<String>) -> Self {
        self.contact_details = details.into();
        self
    }

    /// Link the customer to a billing backend account.
    pub fn with_billing_backend_id(mut self, id: impl Into<String>) -> Self {
        self.billing_backend_id = Some(id.into());
        self
    }

    /// Whether the customer has a non-empty billing backend account.
    pub fn has_billing_backend(&self) -> bool {
        self.billing_backend_id
            .as_deref()
            .map(|id| !id.is_empty())
            .unwrap_or(false)
    }

    /// Increase the balance.
    ///
    /// # Errors
    ///
    /// `StructureError::Validation` for a non-positive amount.
    pub fn credit_account(&mut self, amount: f64) -> StructureResult<BalanceChange> {
        self.change_balance(amount, BalanceChangeKind::Credit)
    }

    /// Decrease the balance. The balance may become negative.
    ///
    /// # Errors
    ///
    /// `StructureError::Validation` for a non-positive amount.
    pub fn debit_account(&mut self, amount: f64) -> StructureResult<BalanceChange> {
        self.change_balance(amount, BalanceChangeKind::Debit)
    }

    fn change_balance(
        &mut self,
        amount: f64,
        kind: BalanceChangeKind,
    ) -> StructureResult<BalanceChange> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(StructureError::validation(
                "amount",
                "Amount has to be a positive number.",
            ));
        }
        match kind {
            BalanceChangeKind::Credit => self.balance += amount,
            BalanceChangeKind::Debit => self.balance -= amount,
        }
        Ok(BalanceChange {
            customer_id: self.id,
            kind,
            amount,
            balance: self.balance,
        })
    }
}

/// Direction of a balance change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceChangeKind {
    /// Money added to the account
    Credit,
    /// Money withdrawn from the account
    Debit,
}

/// Result of crediting or debiting a customer account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BalanceChange {
    /// Affected customer
    pub customer_id: Uuid,
    /// Credit or debit
    pub kind: BalanceChangeKind,
    /// Changed amount, always positive
    pub amount: f64,
    /// Balance after the change
    pub balance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_and_debit() {
        let mut customer = Customer::new("Acme");
        let credit = customer.credit_account(10.0).unwrap();
        assert_eq!(credit.kind, BalanceChangeKind::Credit);
        assert_eq!(customer.balance, 10.0);

        let debit = customer.debit_account(25.0).unwrap();
        assert_eq!(debit.amount, 25.0);
        assert_eq!(debit.balance, -15.0);
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let mut customer = Customer::new("Acme");
        assert!(customer.credit_account(0.0).is_err());
        assert!(customer.debit_account(-1.0).is_err());
        assert!(customer.credit_account(f64::NAN).is_err());
        assert_eq!(customer.balance, 0.0);
    }

    #[test]
    fn test_billing_backend() {
        assert!(!Customer::new("A").has_billing_backend());
        assert!(!Customer::new("A").with_billing_backend_id("").has_billing_backend());
        assert!(Customer::new("A").with_billing_backend_id("acc-1").has_billing_backend());
    }
}
