//! # Conductor RBAC
//!
//! Permission scoping for the Conductor hierarchy.
//!
//! ## Overview
//!
//! The conductor-rbac crate handles:
//! - **Resources**: Every resource type, grouped by owning module
//! - **Actions**: Operations, including VM runtime operations
//! - **Permissions**: Resource + Action combinations and role defaults
//! - **Scoping**: Filtering collections to what a user may see
//! - **Visibility**: Role-based field redaction when rendering entities
//!
//! ## Architecture
//!
//! ```text
//! Permission = Resource + Action [+ Resource ID]
//!
//! Entity ──Scoped──→ ScopePath { customers, projects, project_groups }
//!                         │
//! User ──UserScope────────┴──→ can_see / can(resource, action)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use conductor_rbac::{filter_for_user, Action, ResourceType, ScopeResolver, UserScope};
//! use conductor_structure::Structure;
//! # let structure = Structure::new();
//! # let user_id = uuid::Uuid::now_v7();
//! # let project_id = uuid::Uuid::now_v7();
//!
//! let scope = UserScope::for_user(&structure, user_id, Utc::now()).unwrap();
//! let visible = filter_for_user(structure.projects(), &structure, &scope);
//!
//! let path = structure.project_path(project_id);
//! if scope.can(&path, ResourceType::Instance, Action::Start) {
//!     // start the instance
//! }
//! ```
//!
//! ## Action Implications
//!
//! - `Manage` implies all actions
//! - `Create`, `Update`, `Delete` imply `Read` and `List`

pub mod actions;
pub mod permissions;
pub mod resources;
pub mod scope;
pub mod visibility;

pub use actions::Action;
pub use permissions::{role_permissions, Permission, PermissionSet};
pub use resources::{Module, ResourceType};
pub use scope::{
    filter_for_user, filter_projects, permitted_object_ids, visible_customer_permissions,
    visible_users, PermittedIds, ProjectFilter, ScopePath, ScopeResolver, Scoped, UserScope,
};
pub use visibility::{audience_for, field_rule, redact, render_for, Audience, FieldRule};
