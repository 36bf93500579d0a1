//! # Permissions
//!
//! Core permission types and sets. A permission combines a resource type with
//! an action, optionally narrowed to one resource instance. Every structure
//! role maps to a default permission set.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use conductor_structure::{CustomerRole, ProjectGroupRole, ProjectRole, RoleType};

use crate::actions::Action;
use crate::resources::ResourceType;

/// A permission is a combination of resource type and action.
///
/// # Example
///
/// ```
/// use conductor_rbac::{Action, Permission, ResourceType};
///
/// let perm = Permission::new(ResourceType::Instance, Action::Start);
/// assert_eq!(perm.to_string(), "instance:start");
///
/// let perm = Permission::for_resource(ResourceType::Instance, Action::Start, "vm-1");
/// assert_eq!(perm.to_string(), "instance:start:vm-1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Permission {
    /// The resource type this permission applies to.
    pub resource: ResourceType,
    /// The action allowed on the resource.
    pub action: Action,
    /// Specific resource ID; `None` applies to every resource of the type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl Permission {
    /// Create a new global permission.
    pub fn new(resource: ResourceType, action: Action) -> Self {
        Self {
            resource,
            action,
            resource_id: None,
        }
    }

    /// Create a permission for a specific resource instance.
    pub fn for_resource(
        resource: ResourceType,
        action: Action,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            action,
            resource_id: Some(resource_id.into()),
        }
    }

    /// Parse from string (e.g., "instance:read" or "instance:read:uuid").
    ///
    /// # Returns
    ///
    /// `Some(Permission)` if valid, `None` otherwise
    pub fn from_string(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 {
            return None;
        }

        let resource = ResourceType::parse(parts[0])?;
        let action = Action::parse(parts[1])?;
        let resource_id = if parts.len() > 2 {
            Some(parts[2..].join(":"))
        } else {
            None
        };

        Some(Self {
            resource,
            action,
            resource_id,
        })
    }

    /// Check if this permission matches another (considering wildcards).
    ///
    /// A permission matches if the resource types match, the actions match
    /// or this action implies the other, and either side has no resource ID
    /// or both IDs are equal.
    pub fn matches(&self, other: &Permission) -> bool {
        if self.resource != other.resource {
            return false;
        }

        if self.action != other.action && !self.action.implies(other.action) {
            return false;
        }

        match (&self.resource_id, &other.resource_id) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a == b,
        }
    }

    /// Check if this is a global permission.
    pub fn is_global(&self) -> bool {
        self.resource_id.is_none()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(id) => write!(f, "{}:{}:{}", self.resource.as_str(), self.action.as_str(), id),
            None => write!(f, "{}:{}", self.resource.as_str(), self.action.as_str()),
        }
    }
}

/// A set of permissions assigned to a role.
///
/// # Example
///
/// ```
/// use conductor_rbac::{Action, Permission, PermissionSet, ResourceType};
///
/// let set = PermissionSet::from_strings(&["instance:manage", "cloud:read"]);
/// assert!(set.has(&Permission::new(ResourceType::Instance, Action::Stop)));
/// assert!(!set.has(&Permission::new(ResourceType::Cloud, Action::Delete)));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    permissions: HashSet<String>,
}

impl PermissionSet {
    /// Create a new empty permission set.
    pub fn new() -> Self {
        Self {
            permissions: HashSet::new(),
        }
    }

    /// Add a permission to the set.
    pub fn add(&mut self, permission: Permission) {
        self.permissions.insert(permission.to_string());
    }

    /// Remove a permission from the set.
    ///
    /// # Returns
    ///
    /// `true` if the permission was present
    pub fn remove(&mut self, permission: &Permission) -> bool {
        self.permissions.remove(&permission.to_string())
    }

    /// Check if the set grants a permission.
    ///
    /// This checks for:
    /// 1. Exact match
    /// 2. Wildcard match (permission without resource_id)
    /// 3. Implied match (e.g., Manage implies Start)
    pub fn has(&self, permission: &Permission) -> bool {
        if self.permissions.contains(&permission.to_string()) {
            return true;
        }

        if permission.resource_id.is_some() {
            let wildcard = Permission::new(permission.resource, permission.action);
            if self.permissions.contains(&wildcard.to_string()) {
                return true;
            }
        }

        Action::all()
            .into_iter()
            .filter(|action| action.implies(permission.action))
            .any(|action| {
                let global = Permission::new(permission.resource, action);
                if self.permissions.contains(&global.to_string()) {
                    return true;
                }
                match &permission.resource_id {
                    Some(id) => self.permissions.contains(
                        &Permission::for_resource(permission.resource, action, id.clone())
                            .to_string(),
                    ),
                    None => false,
                }
            })
    }

    /// Shorthand for a global permission check.
    pub fn allows(&self, resource: ResourceType, action: Action) -> bool {
        self.has(&Permission::new(resource, action))
    }

    /// Get all permissions in the set.
    pub fn all(&self) -> Vec<Permission> {
        self.permissions
            .iter()
            .filter_map(|s| Permission::from_string(s))
            .collect()
    }

    /// Merge another permission set into this one.
    pub fn merge(&mut self, other: &PermissionSet) {
        for perm in &other.permissions {
            self.permissions.insert(perm.clone());
        }
    }

    /// Create from a list of permission strings. Invalid strings are skipped.
    pub fn from_strings(perms: &[&str]) -> Self {
        perms
            .iter()
            .filter_map(|p| Permission::from_string(p))
            .collect()
    }

    /// Get the count of permissions.
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        let mut set = PermissionSet::new();
        for perm in iter {
            set.add(perm);
        }
        set
    }
}

const CUSTOMER_OWNER: &[&str] = &[
    "customer:update",
    "customer_permission:manage",
    "project:manage",
    "project_permission:manage",
    "project_group:manage",
    "project_group_permission:manage",
    "cloud:manage",
    "cloud_project_membership:manage",
    "flavor:read",
    "flavor:list",
    "instance:manage",
    "security_group:manage",
    "ip_mapping:manage",
    "price_estimate:manage",
    "price_list:manage",
    "price_list_item:manage",
    "invoice:read",
    "invoice:list",
    "order:read",
    "event:list",
    "alert:manage",
    "invitation:manage",
];

const PROJECT_MANAGER: &[&str] = &[
    "project:update",
    "project_permission:manage",
    "cloud:read",
    "cloud_project_membership:read",
    "flavor:list",
    "instance:read",
    "instance:list",
    "security_group:list",
    "ip_mapping:list",
    "price_estimate:read",
    "event:list",
    "alert:list",
    "invitation:create",
];

const PROJECT_ADMINISTRATOR: &[&str] = &[
    "project:read",
    "cloud:read",
    "cloud_project_membership:read",
    "flavor:list",
    "instance:manage",
    "security_group:list",
    "ip_mapping:list",
    "price_estimate:read",
    "event:list",
    "alert:list",
];

const PROJECT_GROUP_MANAGER: &[&str] = &[
    "project_group:read",
    "project:list",
    "instance:list",
    "event:list",
    "alert:list",
];

/// Default permission set of a role.
///
/// # Example
///
/// ```
/// use conductor_rbac::{role_permissions, Action, ResourceType};
/// use conductor_structure::{ProjectRole, RoleType};
///
/// let manager = role_permissions(RoleType::Project(ProjectRole::Manager));
/// assert!(!manager.allows(ResourceType::Instance, Action::Stop));
///
/// let admin = role_permissions(RoleType::Project(ProjectRole::Administrator));
/// assert!(admin.allows(ResourceType::Instance, Action::Stop));
/// ```
pub fn role_permissions(role: RoleType) -> PermissionSet {
    let strings = match role {
        RoleType::Customer(CustomerRole::Owner) => CUSTOMER_OWNER,
        RoleType::Project(ProjectRole::Manager) => PROJECT_MANAGER,
        RoleType::Project(ProjectRole::Administrator) => PROJECT_ADMINISTRATOR,
        RoleType::ProjectGroup(ProjectGroupRole::Manager) => PROJECT_GROUP_MANAGER,
    };
    PermissionSet::from_strings(strings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parsing() {
        let perm = Permission::from_string("security_group:update:sg-1").unwrap();
        assert_eq!(perm.resource, ResourceType::SecurityGroup);
        assert_eq!(perm.action, Action::Update);
        assert_eq!(perm.resource_id.as_deref(), Some("sg-1"));
        assert!(Permission::from_string("instance").is_none());
        assert!(Permission::from_string("widget:read").is_none());
    }

    #[test]
    fn test_permission_matches() {
        let manage = Permission::new(ResourceType::Cloud, Action::Manage);
        let read_one = Permission::for_resource(ResourceType::Cloud, Action::Read, "c-1");
        assert!(manage.matches(&read_one));
        assert!(!read_one.matches(&manage));

        let other = Permission::for_resource(ResourceType::Cloud, Action::Read, "c-2");
        assert!(!read_one.matches(&other));
    }

    #[test]
    fn test_permission_set_wildcards() {
        let set = PermissionSet::from_strings(&["instance:read", "cloud:manage:c-1"]);
        assert!(set.has(&Permission::for_resource(ResourceType::Instance, Action::Read, "vm-9")));
        assert!(set.has(&Permission::for_resource(ResourceType::Cloud, Action::Delete, "c-1")));
        assert!(!set.has(&Permission::for_resource(ResourceType::Cloud, Action::Delete, "c-2")));
    }

    #[test]
    fn test_permission_set_merge_and_remove() {
        let mut set = PermissionSet::from_strings(&["flavor:list"]);
        set.merge(&PermissionSet::from_strings(&["flavor:read", "flavor:list"]));
        assert_eq!(set.len(), 2);
        assert!(set.remove(&Permission::new(ResourceType::Flavor, Action::List)));
        assert!(!set.remove(&Permission::new(ResourceType::Flavor, Action::List)));
    }

    #[test]
    fn test_role_defaults() {
        let owner = role_permissions(RoleType::Customer(CustomerRole::Owner));
        assert!(owner.allows(ResourceType::Project, Action::Create));
        assert!(owner.allows(ResourceType::Instance, Action::Resize));
        assert!(!owner.allows(ResourceType::Invoice, Action::Delete));

        let manager = role_permissions(RoleType::Project(ProjectRole::Manager));
        assert!(manager.allows(ResourceType::Instance, Action::List));
        assert!(!manager.allows(ResourceType::Instance, Action::Resize));

        let group = role_permissions(RoleType::ProjectGroup(ProjectGroupRole::Manager));
        assert!(!group.allows(ResourceType::Project, Action::Update));
        assert_eq!(group.len(), PROJECT_GROUP_MANAGER.len());
    }
}
