//! Cost tracking strategies
//!
//! A strategy computes the monthly cost of customers. The IaaS strategy asks
//! the external billing backend for the total of each customer's active
//! products.

use async_trait::async_trait;
use conductor_rbac::ResourceType;
use conductor_structure::Customer;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::CostResult;
use crate::estimate::{PriceEstimateBook, ScopeRef};
use crate::period::YearMonth;

/// External billing system holding customer accounts.
#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// Monthly total of the active products of a billing account.
    async fn total_cost_of_active_products(&self, billing_backend_id: &str) -> CostResult<f64>;
}

/// Source of customer cost estimates.
#[async_trait]
pub trait CostTrackingStrategy: Send + Sync {
    /// Monthly cost per customer, optionally for one customer only.
    async fn costs_estimates(&self, customers: &[Customer], customer: Option<Uuid>) -> Vec<(Uuid, f64)>;
}

/// Cost tracking backed by the customers' billing accounts.
#[derive(Debug, Clone)]
pub struct IaasCostTracking<B> {
    backend: B,
}

impl<B: BillingBackend> IaasCostTracking<B> {
    /// Create the strategy.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: BillingBackend> CostTrackingStrategy for IaasCostTracking<B> {
    async fn costs_estimates(&self, customers: &[Customer], customer: Option<Uuid>) -> Vec<(Uuid, f64)> {
        let mut estimates = Vec::new();
        for c in customers
            .iter()
            .filter(|c| c.has_billing_backend())
            .filter(|c| customer.map_or(true, |id| c.id == id))
        {
            let Some(account) = c.billing_backend_id.as_deref() else {
                continue;
            };
            match self.backend.total_cost_of_active_products(account).await {
                Ok(monthly_cost) => estimates.push((c.id, monthly_cost)),
                Err(e) => error!(
                    customer_id = %c.id,
                    error = %e,
                    "Failed to get price estimate for customer {} with existing billing backend id. Stale customer?",
                    c.name
                ),
            }
        }
        estimates
    }
}

/// Write the strategy's estimates as automatic customer estimates.
///
/// # Returns
///
/// The number of customers estimated
pub async fn record_customer_estimates(
    strategy: &dyn CostTrackingStrategy,
    customers: &[Customer],
    book: &mut PriceEstimateBook,
    period: YearMonth,
) -> usize {
    let estimates = strategy.costs_estimates(customers, None).await;
    for (customer_id, total) in &estimates {
        book.upsert_automatic(
            ScopeRef::new(ResourceType::Customer, *customer_id),
            period,
            *total,
            json!({ "source": "billing_backend" }),
        );
    }
    info!(period = %period, customers = estimates.len(), "Customer estimates recorded");
    estimates.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CostError;
    use crate::estimate::EstimateFilter;
    use std::collections::HashMap;

    struct FakeBackend {
        totals: HashMap<String, f64>,
    }

    #[async_trait]
    impl BillingBackend for FakeBackend {
        async fn total_cost_of_active_products(&self, billing_backend_id: &str) -> CostResult<f64> {
            self.totals
                .get(billing_backend_id)
                .copied()
                .ok_or_else(|| CostError::Billing(format!("unknown account {}", billing_backend_id)))
        }
    }

    fn strategy() -> IaasCostTracking<FakeBackend> {
        let mut totals = HashMap::new();
        totals.insert("acc-1".to_string(), 120.0);
        totals.insert("acc-2".to_string(), 80.5);
        IaasCostTracking::new(FakeBackend { totals })
    }

    fn customers() -> Vec<Customer> {
        vec![
            Customer::new("Acme").with_billing_backend_id("acc-1"),
            Customer::new("Globex").with_billing_backend_id("acc-2"),
            Customer::new("Stale").with_billing_backend_id("acc-gone"),
            Customer::new("Empty").with_billing_backend_id(""),
            Customer::new("Unbilled"),
        ]
    }

    #[tokio::test]
    async fn test_costs_skip_unbilled_and_stale_customers() {
        let customers = customers();
        let estimates = strategy().costs_estimates(&customers, None).await;
        assert_eq!(estimates, vec![(customers[0].id, 120.0), (customers[1].id, 80.5)]);
    }

    #[tokio::test]
    async fn test_costs_for_one_customer() {
        let customers = customers();
        let estimates = strategy().costs_estimates(&customers, Some(customers[1].id)).await;
        assert_eq!(estimates, vec![(customers[1].id, 80.5)]);

        let stale = strategy().costs_estimates(&customers, Some(customers[2].id)).await;
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_record_customer_estimates() {
        let customers = customers();
        let mut book = PriceEstimateBook::new();
        let period = YearMonth::new(2015, 6).unwrap();

        let recorded = record_customer_estimates(&strategy(), &customers, &mut book, period).await;
        assert_eq!(recorded, 2);

        let scope = ScopeRef::new(ResourceType::Customer, customers[0].id);
        let estimates = book.filter(&EstimateFilter::new().with_scopes(vec![scope]));
        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0].total, 120.0);
        assert!(!estimates[0].is_manually_input);
    }
}
