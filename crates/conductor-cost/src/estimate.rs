//! Monthly price estimates
//!
//! An estimate is attached to any estimated scope: an instance, a cloud
//! project membership, a cloud, a project or a customer. Automatic estimates
//! are recomputed by the cost tracker; manual ones are entered by staff for
//! resources and memberships and hide the automatic estimate of the same
//! month while they exist.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use conductor_rbac::ResourceType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CostError, CostResult};
use crate::period::{YearMonth, YearMonthRange};

/// Generic reference to the entity an estimate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeRef {
    /// Entity type
    pub resource_type: ResourceType,
    /// Entity ID
    pub id: Uuid,
}

impl ScopeRef {
    /// Create a scope reference.
    pub fn new(resource_type: ResourceType, id: Uuid) -> Self {
        Self { resource_type, id }
    }
}

/// Cost estimate of a scope for one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEstimate {
    /// Unique estimate ID
    #[serde(rename = "uuid")]
    pub id: Uuid,
    /// Estimated entity
    pub scope: ScopeRef,
    /// Total cost
    pub total: f64,
    /// Cost breakdown
    pub details: Value,
    /// Month, 1..=12
    pub month: u32,
    /// Year
    pub year: i32,
    /// Entered by hand rather than computed
    pub is_manually_input: bool,
    /// Shown in listings
    pub is_visible: bool,
    /// When the estimate was last written
    pub updated_at: DateTime<Utc>,
}

impl PriceEstimate {
    fn new(scope: ScopeRef, period: YearMonth, total: f64, details: Value, manual: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            scope,
            total,
            details,
            month: period.month,
            year: period.year,
            is_manually_input: manual,
            is_visible: true,
            updated_at: Utc::now(),
        }
    }

    /// Month of the estimate.
    pub fn period(&self) -> YearMonth {
        YearMonth {
            year: self.year,
            month: self.month,
        }
    }
}

/// Filter for estimate listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EstimateFilter {
    /// Only these scopes
    pub scopes: Option<Vec<ScopeRef>>,
    /// Only these months
    pub date_list: Option<Vec<YearMonth>>,
    /// Only months within the range
    pub range: Option<YearMonthRange>,
}

impl EstimateFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to scopes.
    pub fn with_scopes(mut self, scopes: Vec<ScopeRef>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Restrict to months.
    pub fn with_dates(mut self, dates: Vec<YearMonth>) -> Self {
        self.date_list = Some(dates);
        self
    }

    /// Restrict to a month range.
    pub fn with_range(mut self, range: YearMonthRange) -> Self {
        self.range = Some(range);
        self
    }

    fn matches(&self, estimate: &PriceEstimate) -> bool {
        let period = estimate.period();
        self.scopes
            .as_ref()
            .map_or(true, |scopes| scopes.contains(&estimate.scope))
            && self
                .date_list
                .as_ref()
                .map_or(true, |dates| dates.contains(&period))
            && self.range.map_or(true, |range| range.contains(period))
    }
}

/// Store of price estimates.
#[derive(Debug, Default)]
pub struct PriceEstimateBook {
    estimates: BTreeMap<Uuid, PriceEstimate>,
}

impl PriceEstimateBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope types that carry estimates.
    pub fn estimated_types() -> &'static [ResourceType] {
        &[
            ResourceType::Instance,
            ResourceType::CloudProjectMembership,
            ResourceType::Cloud,
            ResourceType::Project,
            ResourceType::Customer,
        ]
    }

    /// Scope types whose estimates may be entered by hand.
    pub fn editable_types() -> &'static [ResourceType] {
        &[ResourceType::Instance, ResourceType::CloudProjectMembership]
    }

    fn find(&self, scope: ScopeRef, period: YearMonth, manual: bool) -> Option<Uuid> {
        self.estimates
            .values()
            .find(|e| e.scope == scope && e.period() == period && e.is_manually_input == manual)
            .map(|e| e.id)
    }

    fn set_automatic_visibility(&mut self, scope: ScopeRef, period: YearMonth, visible: bool) {
        if let Some(id) = self.find(scope, period, false) {
            if let Some(estimate) = self.estimates.get_mut(&id) {
                estimate.is_visible = visible;
            }
        }
    }

    /// Enter an estimate by hand.
    ///
    /// # Errors
    ///
    /// - `NotEditable` when the scope type does not accept manual estimates
    /// - `EstimateExists` when a manual estimate for the month already exists
    pub fn create_manual(
        &mut self,
        scope: ScopeRef,
        period: YearMonth,
        total: f64,
        details: Value,
    ) -> CostResult<PriceEstimate> {
        if !Self::editable_types().contains(&scope.resource_type) {
            return Err(CostError::NotEditable(scope.resource_type.as_str().to_string()));
        }
        if self.find(scope, period, true).is_some() {
            return Err(CostError::EstimateExists);
        }

        let estimate = PriceEstimate::new(scope, period, total, details, true);
        self.set_automatic_visibility(scope, period, false);
        info!(
            estimate_id = %estimate.id,
            scope_type = %scope.resource_type,
            scope_id = %scope.id,
            period = %period,
            "Manual price estimate created"
        );
        self.estimates.insert(estimate.id, estimate.clone());
        Ok(estimate)
    }

    /// Change the total and details of an estimate.
    pub fn update(&mut self, id: Uuid, total: f64, details: Option<Value>) -> CostResult<PriceEstimate> {
        let estimate = self
            .estimates
            .get_mut(&id)
            .ok_or_else(|| CostError::not_found("price_estimate", id))?;
        estimate.total = total;
        if let Some(details) = details {
            estimate.details = details;
        }
        estimate.updated_at = Utc::now();
        Ok(estimate.clone())
    }

    /// Write the computed estimate of a scope for a month.
    pub fn upsert_automatic(
        &mut self,
        scope: ScopeRef,
        period: YearMonth,
        total: f64,
        details: Value,
    ) -> PriceEstimate {
        let hidden = self.find(scope, period, true).is_some();
        let id = self.find(scope, period, false).unwrap_or_else(Uuid::now_v7);
        let estimate = self.estimates.entry(id).or_insert_with(|| PriceEstimate {
            id,
            ..PriceEstimate::new(scope, period, total, Value::Null, false)
        });
        estimate.total = total;
        estimate.details = details;
        estimate.is_visible = !hidden;
        estimate.updated_at = Utc::now();
        debug!(scope_id = %scope.id, period = %period, total, "Automatic price estimate written");
        estimate.clone()
    }

    /// Get an estimate.
    pub fn get(&self, id: Uuid) -> Option<&PriceEstimate> {
        self.estimates.get(&id)
    }

    /// Delete one estimate. Removing a manual estimate shows the automatic one
    /// again.
    pub fn delete(&mut self, id: Uuid) -> CostResult<PriceEstimate> {
        let estimate = self
            .estimates
            .remove(&id)
            .ok_or_else(|| CostError::not_found("price_estimate", id))?;
        if estimate.is_manually_input {
            self.set_automatic_visibility(estimate.scope, estimate.period(), true);
        }
        Ok(estimate)
    }

    /// Visible estimates matching the filter, newest period first.
    pub fn filter(&self, filter: &EstimateFilter) -> Vec<&PriceEstimate> {
        let mut estimates: Vec<&PriceEstimate> = self
            .estimates
            .values()
            .filter(|e| e.is_visible && filter.matches(e))
            .collect();
        estimates.sort_by(|a, b| b.period().cmp(&a.period()));
        estimates
    }

    /// Remove every estimate of a scope. Returns how many were removed.
    pub fn delete_for_scope(&mut self, scope: ScopeRef) -> usize {
        let before = self.estimates.len();
        self.estimates.retain(|_, e| e.scope != scope);
        let removed = before - self.estimates.len();
        if removed > 0 {
            info!(scope_type = %scope.resource_type, scope_id = %scope.id, removed, "Price estimates deleted");
        }
        removed
    }

    /// Number of stored estimates, hidden ones included.
    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    /// Whether the book is empty.
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn period(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    #[test]
    fn test_create_manual_once_per_month() {
        let mut book = PriceEstimateBook::new();
        let scope = ScopeRef::new(ResourceType::Instance, Uuid::now_v7());

        let estimate = book
            .create_manual(scope, period("2015.05"), 120.5, json!({"ram": 20}))
            .unwrap();
        assert!(estimate.is_manually_input);

        let err = book
            .create_manual(scope, period("2015.05"), 99.0, json!({}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Estimate for given month already exists. Use PATCH request to update it."
        );

        // Another month is fine.
        assert!(book.create_manual(scope, period("2015.06"), 99.0, json!({})).is_ok());
    }

    #[test]
    fn test_manual_only_for_editable_types() {
        let mut book = PriceEstimateBook::new();
        let scope = ScopeRef::new(ResourceType::Customer, Uuid::now_v7());
        let err = book.create_manual(scope, period("2015.05"), 1.0, json!({})).unwrap_err();
        assert!(matches!(err, CostError::NotEditable(_)));
        assert!(PriceEstimateBook::estimated_types().contains(&ResourceType::Customer));
    }

    #[test]
    fn test_manual_hides_automatic() {
        let mut book = PriceEstimateBook::new();
        let scope = ScopeRef::new(ResourceType::CloudProjectMembership, Uuid::now_v7());
        let may = period("2015.05");

        let automatic = book.upsert_automatic(scope, may, 10.0, json!({}));
        let manual = book.create_manual(scope, may, 12.0, json!({})).unwrap();
        let visible = book.filter(&EstimateFilter::new());
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, manual.id);

        // Recomputing keeps the automatic estimate hidden.
        let recomputed = book.upsert_automatic(scope, may, 11.0, json!({}));
        assert_eq!(recomputed.id, automatic.id);
        assert!(!recomputed.is_visible);

        book.delete(manual.id).unwrap();
        let visible = book.filter(&EstimateFilter::new());
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].total, 11.0);
    }

    #[test]
    fn test_filter() {
        let mut book = PriceEstimateBook::new();
        let vm = ScopeRef::new(ResourceType::Instance, Uuid::now_v7());
        let project = ScopeRef::new(ResourceType::Project, Uuid::now_v7());
        for month in ["2015.01", "2015.02", "2015.03"] {
            book.upsert_automatic(vm, period(month), 1.0, json!({}));
            book.upsert_automatic(project, period(month), 3.0, json!({}));
        }

        let by_scope = book.filter(&EstimateFilter::new().with_scopes(vec![vm]));
        assert_eq!(by_scope.len(), 3);
        assert_eq!(by_scope[0].period(), period("2015.03"));

        let by_date = book.filter(&EstimateFilter::new().with_dates(vec![period("2015.02")]));
        assert_eq!(by_date.len(), 2);

        let range = YearMonthRange::parse(Some("2015.02"), None).unwrap();
        let by_range = book.filter(&EstimateFilter::new().with_scopes(vec![project]).with_range(range));
        assert_eq!(by_range.len(), 2);
    }

    #[test]
    fn test_update_and_delete_for_scope() {
        let mut book = PriceEstimateBook::new();
        let vm = ScopeRef::new(ResourceType::Instance, Uuid::now_v7());
        let estimate = book.create_manual(vm, period("2015.01"), 1.0, json!({})).unwrap();
        book.upsert_automatic(vm, period("2015.02"), 2.0, json!({}));

        let updated = book.update(estimate.id, 5.0, None).unwrap();
        assert_eq!(updated.total, 5.0);
        assert!(matches!(
            book.update(Uuid::now_v7(), 1.0, None),
            Err(CostError::NotFound { .. })
        ));

        assert_eq!(book.delete_for_scope(vm), 2);
        assert!(book.is_empty());
    }
}
