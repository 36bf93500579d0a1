//! # Conductor Structure
//!
//! Organizational hierarchy of the Conductor cloud management platform.
//!
//! ## Overview
//!
//! The conductor-structure crate handles:
//! - **Users**: Accounts, SSH keys and organization claims
//! - **Customers**: Billing roots owning projects and clouds
//! - **Projects / Project groups**: Resource grouping under a customer
//! - **Roles**: Customer owner, project administrator/manager, group manager
//! - **Role grants**: Unique per (user, role, scope), with expiration and a revocation log
//! - **Quotas**: Usage limits on customers and projects
//! - **Invitations**: Time-limited role offers
//!
//! ## Architecture
//!
//! ```text
//! Customer ──owner──→ CustomerPermission
//!   ├─ Project ──administrator/manager──→ ProjectPermission
//!   │     └─ quotas (vcpu, ram, storage)
//!   ├─ ProjectGroup ──manager──→ ProjectGroupPermission
//!   │     └─ projects
//!   └─ quotas (nc_project_count, nc_user_count)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_structure::{Customer, CustomerRole, Project, Structure, User};
//!
//! let mut structure = Structure::new();
//! let staff = structure.add_user_account(User::new("root", "root@example.com").staff()).unwrap();
//! let owner = structure.add_user_account(User::new("owner", "owner@example.com")).unwrap();
//!
//! let customer = structure.create_customer(staff, Customer::new("Acme")).unwrap();
//! structure.grant_customer_role(staff, customer.id, owner, CustomerRole::Owner, None).unwrap();
//! let project = structure.create_project(owner, Project::new(customer.id, "Web")).unwrap();
//! ```

pub mod customer;
pub mod error;
pub mod invitation;
pub mod permission;
pub mod project;
pub mod quotas;
pub mod registry;
pub mod roles;
pub mod user;

// Re-export main types for convenience
pub use customer::{BalanceChange, BalanceChangeKind, Customer};
pub use error::{StructureError, StructureResult};
pub use invitation::{Invitation, InvitationState, InvitationTarget};
pub use permission::{
    CustomerPermission, Permission, ProjectGroupPermission, ProjectPermission, RoleTable,
};
pub use project::{Project, ProjectGroup};
pub use quotas::{Quota, QuotaName, QuotaSet};
pub use registry::Structure;
pub use roles::{CustomerRole, ProjectGroupRole, ProjectRole, RoleType, ScopeKind};
pub use user::{SshKeyRecord, SshPublicKey, User, UserRecord};
