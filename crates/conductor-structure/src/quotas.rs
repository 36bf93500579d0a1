//! Quotas and usage limits
//!
//! Customers and projects carry a set of named quotas. A quota with a
//! negative limit is unlimited.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StructureError, StructureResult};

/// Name of a tracked quota.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuotaName {
    /// Projects owned by a customer
    NcProjectCount,
    /// Distinct users holding a role within a customer
    NcUserCount,
    /// Resources provisioned under a customer
    NcResourceCount,
    /// Service connections of a customer
    NcServiceCount,
    /// Virtual CPUs allocated to a project
    Vcpu,
    /// RAM in MB allocated to a project
    Ram,
    /// Storage in MB allocated to a project
    Storage,
    /// Instances running in a project
    MaxInstances,
}

impl QuotaName {
    /// Quotas tracked on every customer.
    pub const CUSTOMER: [QuotaName; 4] = [
        QuotaName::NcProjectCount,
        QuotaName::NcUserCount,
        QuotaName::NcResourceCount,
        QuotaName::NcServiceCount,
    ];

    /// Quotas tracked on every project.
    pub const PROJECT: [QuotaName; 4] = [
        QuotaName::Vcpu,
        QuotaName::Ram,
        QuotaName::Storage,
        QuotaName::MaxInstances,
    ];

    /// Parse quota name from its snake_case form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nc_project_count" => Some(Self::NcProjectCount),
            "nc_user_count" => Some(Self::NcUserCount),
            "nc_resource_count" => Some(Self::NcResourceCount),
            "nc_service_count" => Some(Self::NcServiceCount),
            "vcpu" => Some(Self::Vcpu),
            "ram" => Some(Self::Ram),
            "storage" => Some(Self::Storage),
            "max_instances" => Some(Self::MaxInstances),
            _ => None,
        }
    }

    /// Get string representation of the quota name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NcProjectCount => "nc_project_count",
            Self::NcUserCount => "nc_user_count",
            Self::NcResourceCount => "nc_resource_count",
            Self::NcServiceCount => "nc_service_count",
            Self::Vcpu => "vcpu",
            Self::Ram => "ram",
            Self::Storage => "storage",
            Self::MaxInstances => "max_instances",
        }
    }
}

impl fmt::Display for QuotaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single quota: a limit and the current usage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quota {
    /// Quota name
    pub name: QuotaName,

    /// Maximum usage; negative means unlimited
    pub limit: f64,

    /// Current usage
    pub usage: f64,
}

impl Quota {
    /// Creates an unlimited quota with zero usage.
    pub fn unlimited(name: QuotaName) -> Self {
        Self {
            name,
            limit: -1.0,
            usage: 0.0,
        }
    }

    /// Check whether the quota has no limit.
    pub fn is_unlimited(&self) -> bool {
        self.limit < 0.0
    }

    /// Check whether applying `delta` would overflow the limit.
    pub fn is_exceeded_by(&self, delta: f64) -> bool {
        !self.is_unlimited() && self.usage + delta > self.limit
    }
}

/// Named quotas of one scope.
///
/// # Examples
///
/// ```
/// use conductor_structure::{QuotaName, QuotaSet};
///
/// let mut quotas = QuotaSet::customer_defaults();
/// quotas.set_limit(QuotaName::NcProjectCount, 1.0);
/// assert!(quotas.validate_quota_change(&[(QuotaName::NcProjectCount, 1.0)]).is_ok());
///
/// quotas.add_usage(QuotaName::NcProjectCount, 1.0);
/// assert!(quotas.validate_quota_change(&[(QuotaName::NcProjectCount, 1.0)]).is_err());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuotaSet {
    quotas: BTreeMap<QuotaName, Quota>,
}

impl QuotaSet {
    /// Creates a set holding unlimited quotas for the given names.
    pub fn with_names(names: &[QuotaName]) -> Self {
        Self {
            quotas: names.iter().map(|n| (*n, Quota::unlimited(*n))).collect(),
        }
    }

    /// Default quotas of a customer.
    pub fn customer_defaults() -> Self {
        Self::with_names(&QuotaName::CUSTOMER)
    }

    /// Default quotas of a project.
    pub fn project_defaults() -> Self {
        Self::with_names(&QuotaName::PROJECT)
    }

    /// Get a quota by name.
    pub fn get(&self, name: QuotaName) -> Option<&Quota> {
        self.quotas.get(&name)
    }

    /// Current usage, zero for untracked quotas.
    pub fn usage(&self, name: QuotaName) -> f64 {
        self.quotas.get(&name).map(|q| q.usage).unwrap_or(0.0)
    }

    /// Current limit, `-1.0` for untracked quotas.
    pub fn limit(&self, name: QuotaName) -> f64 {
        self.quotas.get(&name).map(|q| q.limit).unwrap_or(-1.0)
    }

    /// Set the limit, creating the quota if needed.
    pub fn set_limit(&mut self, name: QuotaName, limit: f64) {
        self.quotas
            .entry(name)
            .or_insert_with(|| Quota::unlimited(name))
            .limit = limit;
    }

    /// Overwrite usage, creating the quota if needed.
    pub fn set_usage(&mut self, name: QuotaName, usage: f64) {
        self.quotas
            .entry(name)
            .or_insert_with(|| Quota::unlimited(name))
            .usage = usage.max(0.0);
    }

    /// Add `delta` to the usage. Usage never drops below zero.
    pub fn add_usage(&mut self, name: QuotaName, delta: f64) {
        let quota = self
            .quotas
            .entry(name)
            .or_insert_with(|| Quota::unlimited(name));
        quota.usage = (quota.usage + delta).max(0.0);
    }

    /// Check that every change fits into its quota.
    ///
    /// # Arguments
    ///
    /// * `changes` - Pairs of quota name and usage delta
    ///
    /// # Returns
    ///
    /// `StructureError::QuotaExceeded` for the first change that does not fit
    pub fn validate_quota_change(&self, changes: &[(QuotaName, f64)]) -> StructureResult<()> {
        for (name, delta) in changes {
            if let Some(quota) = self.quotas.get(name) {
                if quota.is_exceeded_by(*delta) {
                    return Err(StructureError::QuotaExceeded {
                        name: *name,
                        limit: quota.limit,
                        requested: quota.usage + delta,
                    });
                }
            }
        }
        Ok(())
    }

    /// Iterate over all quotas.
    pub fn iter(&self) -> impl Iterator<Item = &Quota> {
        self.quotas.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_by_default() {
        let quotas = QuotaSet::project_defaults();
        assert!(quotas.get(QuotaName::Vcpu).unwrap().is_unlimited());
        assert!(quotas
            .validate_quota_change(&[(QuotaName::Vcpu, 1_000_000.0)])
            .is_ok());
    }

    #[test]
    fn test_validate_quota_change() {
        let mut quotas = QuotaSet::project_defaults();
        quotas.set_limit(QuotaName::Ram, 2048.0);
        quotas.add_usage(QuotaName::Ram, 1024.0);

        assert!(quotas.validate_quota_change(&[(QuotaName::Ram, 1024.0)]).is_ok());
        let err = quotas
            .validate_quota_change(&[(QuotaName::Vcpu, 1.0), (QuotaName::Ram, 1025.0)])
            .unwrap_err();
        assert!(matches!(
            err,
            StructureError::QuotaExceeded { name: QuotaName::Ram, .. }
        ));
    }

    #[test]
    fn test_usage_never_negative() {
        let mut quotas = QuotaSet::customer_defaults();
        quotas.add_usage(QuotaName::NcUserCount, -3.0);
        assert_eq!(quotas.usage(QuotaName::NcUserCount), 0.0);
    }

    #[test]
    fn test_quota_name_parse() {
        for name in QuotaName::CUSTOMER.iter().chain(QuotaName::PROJECT.iter()) {
            assert_eq!(QuotaName::parse(name.as_str()), Some(*name));
        }
    }
}
