//! Structure roles
//!
//! Roles are granted at one of three scope levels: customer, project or
//! project group. Each level has its own closed set of roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role held by a user on a customer.
///
/// # Examples
///
/// ```
/// use conductor_structure::CustomerRole;
///
/// assert_eq!(CustomerRole::parse("OWNER"), Some(CustomerRole::Owner));
/// assert_eq!(CustomerRole::Owner.display_name(), "Owner");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CustomerRole {
    /// Full control over the customer, its projects and billing
    Owner = 0,
}

impl CustomerRole {
    /// Parse role from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Get string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
        }
    }

    /// Get a human-readable display name for the role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Owner => "Owner",
        }
    }
}

impl Default for CustomerRole {
    fn default() -> Self {
        Self::Owner
    }
}

/// Role held by a user on a project.
///
/// The hierarchy is: Administrator < Manager. A manager may grant and revoke
/// the administrator role on their project.
///
/// # Examples
///
/// ```
/// use conductor_structure::ProjectRole;
///
/// assert!(ProjectRole::Manager > ProjectRole::Administrator);
/// assert_eq!(ProjectRole::parse("admin"), Some(ProjectRole::Administrator));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    /// Operates resources of the project
    Administrator = 1,

    /// Manages the project and its administrators
    Manager = 2,
}

impl ProjectRole {
    /// Check if this role can manage other project roles.
    pub fn can_manage(&self) -> bool {
        *self >= ProjectRole::Manager
    }

    /// Parse role from string representation.
    ///
    /// # Arguments
    ///
    /// * `s` - String to parse (case-insensitive, `admin` is accepted)
    ///
    /// # Returns
    ///
    /// `Some(ProjectRole)` if valid, `None` otherwise
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" | "administrator" => Some(Self::Administrator),
            "manager" => Some(Self::Manager),
            _ => None,
        }
    }

    /// Get string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Administrator => "admin",
            Self::Manager => "manager",
        }
    }

    /// Get a human-readable display name for the role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Administrator => "Administrator",
            Self::Manager => "Manager",
        }
    }
}

impl Default for ProjectRole {
    fn default() -> Self {
        Self::Administrator
    }
}

/// Role held by a user on a project group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectGroupRole {
    /// Manages every project of the group
    Manager = 0,
}

impl ProjectGroupRole {
    /// Parse role from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            _ => None,
        }
    }

    /// Get string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
        }
    }

    /// Get a human-readable display name for the role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Manager => "Manager",
        }
    }
}

impl Default for ProjectGroupRole {
    fn default() -> Self {
        Self::Manager
    }
}

/// Level of the hierarchy a role is granted on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Customer level
    Customer,
    /// Project level
    Project,
    /// Project group level
    ProjectGroup,
}

impl ScopeKind {
    /// Get string representation of the scope kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Project => "project",
            Self::ProjectGroup => "project_group",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any role together with the scope level it belongs to.
///
/// Role grants are unique per `(user, RoleType, scope)`.
///
/// # Examples
///
/// ```
/// use conductor_structure::{ProjectRole, RoleType, ScopeKind};
///
/// let role = RoleType::from(ProjectRole::Manager);
/// assert_eq!(role.scope_kind(), ScopeKind::Project);
/// assert_eq!(role.to_string(), "project:manager");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "scope", content = "role", rename_all = "snake_case")]
pub enum RoleType {
    /// Customer-level role
    Customer(CustomerRole),
    /// Project-level role
    Project(ProjectRole),
    /// Project-group-level role
    ProjectGroup(ProjectGroupRole),
}

impl RoleType {
    /// Every role that exists for a scope level.
    pub fn all_for(kind: ScopeKind) -> Vec<RoleType> {
        match kind {
            ScopeKind::Customer => vec![RoleType::Customer(CustomerRole::Owner)],
            ScopeKind::Project => vec![
                RoleType::Project(ProjectRole::Administrator),
                RoleType::Project(ProjectRole::Manager),
            ],
            ScopeKind::ProjectGroup => vec![RoleType::ProjectGroup(ProjectGroupRole::Manager)],
        }
    }

    /// Scope level this role is granted on.
    pub fn scope_kind(&self) -> ScopeKind {
        match self {
            RoleType::Customer(_) => ScopeKind::Customer,
            RoleType::Project(_) => ScopeKind::Project,
            RoleType::ProjectGroup(_) => ScopeKind::ProjectGroup,
        }
    }

    /// Role name without the scope prefix.
    pub fn role_str(&self) -> &'static str {
        match self {
            RoleType::Customer(r) => r.as_str(),
            RoleType::Project(r) => r.as_str(),
            RoleType::ProjectGroup(r) => r.as_str(),
        }
    }

    /// Human-readable role name.
    pub fn display_name(&self) -> &'static str {
        match self {
            RoleType::Customer(r) => r.display_name(),
            RoleType::Project(r) => r.display_name(),
            RoleType::ProjectGroup(r) => r.display_name(),
        }
    }

    /// Parse `"<scope>:<role>"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (scope, role) = s.split_once(':')?;
        match scope.to_lowercase().as_str() {
            "customer" => CustomerRole::parse(role).map(RoleType::Customer),
            "project" => ProjectRole::parse(role).map(RoleType::Project),
            "project_group" => ProjectGroupRole::parse(role).map(RoleType::ProjectGroup),
            _ => None,
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope_kind(), self.role_str())
    }
}

impl From<CustomerRole> for RoleType {
    fn from(role: CustomerRole) -> Self {
        RoleType::Customer(role)
    }
}

impl From<ProjectRole> for RoleType {
    fn from(role: ProjectRole) -> Self {
        RoleType::Project(role)
    }
}

impl From<ProjectGroupRole> for RoleType {
    fn from(role: ProjectGroupRole) -> Self {
        RoleType::ProjectGroup(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_role_hierarchy() {
        assert!(ProjectRole::Manager > ProjectRole::Administrator);
        assert!(ProjectRole::Manager.can_manage());
        assert!(!ProjectRole::Administrator.can_manage());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(CustomerRole::parse("Owner"), Some(CustomerRole::Owner));
        assert_eq!(ProjectRole::parse("ADMINISTRATOR"), Some(ProjectRole::Administrator));
        assert_eq!(ProjectGroupRole::parse("manager"), Some(ProjectGroupRole::Manager));
        assert_eq!(ProjectRole::parse("owner"), None);
    }

    #[test]
    fn test_role_type_round_trip() {
        for kind in [ScopeKind::Customer, ScopeKind::Project, ScopeKind::ProjectGroup] {
            for role in RoleType::all_for(kind) {
                assert_eq!(role.scope_kind(), kind);
                assert_eq!(RoleType::parse(&role.to_string()), Some(role));
            }
        }
    }

    #[test]
    fn test_role_type_serde_shape() {
        let json = serde_json::to_value(RoleType::Project(ProjectRole::Manager)).unwrap();
        assert_eq!(json, serde_json::json!({"scope": "project", "role": "manager"}));
    }
}
