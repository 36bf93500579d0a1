//! Project and project group domain models

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quotas::QuotaSet;

/// Resource-grouping unit under a customer.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use conductor_structure::Project;
///
/// let customer_id = Uuid::now_v7();
/// let project = Project::new(customer_id, "Web shop").with_description("Production");
/// assert_eq!(project.customer_id, customer_id);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project ID
    pub id: Uuid,

    /// Owning customer
    pub customer_id: Uuid,

    /// Display name
    pub name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// When the project was created
    pub created_at: DateTime<Utc>,

    /// Project-level resource quotas
    #[serde(default = "QuotaSet::project_defaults")]
    pub quotas: QuotaSet,
}

impl Project {
    /// Creates a new project with unlimited quotas.
    pub fn new(customer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            customer_id,
            name: name.into(),
            description: String::new(),
            created_at: Utc::now(),
            quotas: QuotaSet::project_defaults(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Named collection of projects of one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectGroup {
    /// Unique group ID
    pub id: Uuid,

    /// Owning customer
    pub customer_id: Uuid,

    /// Display name
    pub name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Member projects
    #[serde(default)]
    pub project_ids: BTreeSet<Uuid>,

    /// When the group was created
    pub created_at: DateTime<Utc>,
}

impl ProjectGroup {
    /// Creates an empty project group.
    pub fn new(customer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            customer_id,
            name: name.into(),
            description: String::new(),
            project_ids: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether the group contains the project.
    pub fn contains(&self, project_id: Uuid) -> bool {
        self.project_ids.contains(&project_id)
    }

    /// Whether the group has no projects.
    pub fn is_empty(&self) -> bool {
        self.project_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_defaults() {
        let project = Project::new(Uuid::now_v7(), "Web");
        assert!(project.description.is_empty());
        assert_eq!(project.quotas, QuotaSet::project_defaults());
    }

    #[test]
    fn test_group_membership() {
        let mut group = ProjectGroup::new(Uuid::now_v7(), "Ops");
        assert!(group.is_empty());

        let project_id = Uuid::now_v7();
        group.project_ids.insert(project_id);
        assert!(group.contains(project_id));
        assert!(!group.is_empty());
    }
}
