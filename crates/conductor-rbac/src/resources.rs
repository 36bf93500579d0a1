//! # Resource Types
//!
//! All resource types of the platform, grouped by the module that owns them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Subsystem that owns a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Customers, projects, project groups and role grants
    Structure,
    /// User accounts, SSH keys and invitations
    Users,
    /// Cloud accounts and their project links
    Cloud,
    /// Virtual machines and networking
    Iaas,
    /// Price estimates and price lists
    CostTracking,
    /// Invoices and orders
    Billing,
    /// Audit events and alerts
    Logging,
}

impl Module {
    /// Get the string representation of the module.
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Structure => "structure",
            Module::Users => "users",
            Module::Cloud => "cloud",
            Module::Iaas => "iaas",
            Module::CostTracking => "cost_tracking",
            Module::Billing => "billing",
            Module::Logging => "logging",
        }
    }

    /// Parse module from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "structure" => Some(Module::Structure),
            "users" => Some(Module::Users),
            "cloud" => Some(Module::Cloud),
            "iaas" => Some(Module::Iaas),
            "cost_tracking" | "costtracking" => Some(Module::CostTracking),
            "billing" => Some(Module::Billing),
            "logging" => Some(Module::Logging),
            _ => None,
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource types that can have permissions assigned and scopes derived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    // Structure
    /// Billing root
    Customer,
    /// Resource-grouping unit under a customer
    Project,
    /// Named collection of projects
    ProjectGroup,
    /// Role grant on a customer
    CustomerPermission,
    /// Role grant on a project
    ProjectPermission,
    /// Role grant on a project group
    ProjectGroupPermission,

    // Users
    /// User account
    User,
    /// SSH public key
    SshKey,
    /// Pending role offer
    Invitation,

    // Cloud
    /// Cloud account of a customer
    Cloud,
    /// Link between a cloud and a project
    CloudProjectMembership,
    /// VM size offered by a cloud
    Flavor,

    // IaaS
    /// Virtual machine
    Instance,
    /// Firewall rule set of a membership
    SecurityGroup,
    /// Public to private IP mapping of a project
    IpMapping,

    // Cost tracking
    /// Monthly cost estimate of a scope
    PriceEstimate,
    /// Price list of a service
    PriceList,
    /// Hourly price of a service item
    PriceListItem,

    // Billing
    /// Monthly customer invoice
    Invoice,
    /// Billing order of a resource
    Order,

    // Logging
    /// Audit event
    Event,
    /// Alert raised on a scope
    Alert,
}

impl ResourceType {
    /// Get the string representation of the resource type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Customer => "customer",
            ResourceType::Project => "project",
            ResourceType::ProjectGroup => "project_group",
            ResourceType::CustomerPermission => "customer_permission",
            ResourceType::ProjectPermission => "project_permission",
            ResourceType::ProjectGroupPermission => "project_group_permission",
            ResourceType::User => "user",
            ResourceType::SshKey => "ssh_key",
            ResourceType::Invitation => "invitation",
            ResourceType::Cloud => "cloud",
            ResourceType::CloudProjectMembership => "cloud_project_membership",
            ResourceType::Flavor => "flavor",
            ResourceType::Instance => "instance",
            ResourceType::SecurityGroup => "security_group",
            ResourceType::IpMapping => "ip_mapping",
            ResourceType::PriceEstimate => "price_estimate",
            ResourceType::PriceList => "price_list",
            ResourceType::PriceListItem => "price_list_item",
            ResourceType::Invoice => "invoice",
            ResourceType::Order => "order",
            ResourceType::Event => "event",
            ResourceType::Alert => "alert",
        }
    }

    /// Get the module that owns this resource type.
    ///
    /// # Example
    ///
    /// ```
    /// use conductor_rbac::{Module, ResourceType};
    ///
    /// assert_eq!(ResourceType::Instance.module(), Module::Iaas);
    /// assert_eq!(ResourceType::Flavor.module(), Module::Cloud);
    /// ```
    pub fn module(&self) -> Module {
        match self {
            ResourceType::Customer
            | ResourceType::Project
            | ResourceType::ProjectGroup
            | ResourceType::CustomerPermission
            | ResourceType::ProjectPermission
            | ResourceType::ProjectGroupPermission => Module::Structure,
            ResourceType::User | ResourceType::SshKey | ResourceType::Invitation => Module::Users,
            ResourceType::Cloud | ResourceType::CloudProjectMembership | ResourceType::Flavor => {
                Module::Cloud
            }
            ResourceType::Instance | ResourceType::SecurityGroup | ResourceType::IpMapping => {
                Module::Iaas
            }
            ResourceType::PriceEstimate | ResourceType::PriceList | ResourceType::PriceListItem => {
                Module::CostTracking
            }
            ResourceType::Invoice | ResourceType::Order => Module::Billing,
            ResourceType::Event | ResourceType::Alert => Module::Logging,
        }
    }

    /// Parse resource type from string representation.
    ///
    /// # Arguments
    ///
    /// * `s` - String to parse (case-insensitive, supports plural forms)
    ///
    /// # Example
    ///
    /// ```
    /// use conductor_rbac::ResourceType;
    ///
    /// assert_eq!(ResourceType::parse("instances"), Some(ResourceType::Instance));
    /// assert_eq!(ResourceType::parse("cloud_project_membership"), Some(ResourceType::CloudProjectMembership));
    /// assert_eq!(ResourceType::parse("invalid"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        Self::all()
            .into_iter()
            .find(|r| r.as_str() == lower || r.as_str() == singular)
    }

    /// Get all resource types.
    pub fn all() -> Vec<Self> {
        vec![
            ResourceType::Customer,
            ResourceType::Project,
            ResourceType::ProjectGroup,
            ResourceType::CustomerPermission,
            ResourceType::ProjectPermission,
            ResourceType::ProjectGroupPermission,
            ResourceType::User,
            ResourceType::SshKey,
            ResourceType::Invitation,
            ResourceType::Cloud,
            ResourceType::CloudProjectMembership,
            ResourceType::Flavor,
            ResourceType::Instance,
            ResourceType::SecurityGroup,
            ResourceType::IpMapping,
            ResourceType::PriceEstimate,
            ResourceType::PriceList,
            ResourceType::PriceListItem,
            ResourceType::Invoice,
            ResourceType::Order,
            ResourceType::Event,
            ResourceType::Alert,
        ]
    }

    /// Get all resource types owned by a module.
    pub fn for_module(module: Module) -> Vec<Self> {
        Self::all()
            .into_iter()
            .filter(|r| r.module() == module)
            .collect()
    }

    /// Resources whose lifecycle is driven by a backend (provisioned, synced, imported).
    pub fn is_backend_resource(&self) -> bool {
        matches!(
            self,
            ResourceType::Instance | ResourceType::SecurityGroup | ResourceType::CloudProjectMembership
        )
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
