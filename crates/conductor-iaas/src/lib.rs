//! # Conductor IaaS
//!
//! Cloud accounts and the virtual machines provisioned through them.
//!
//! ## Overview
//!
//! The conductor-iaas crate handles:
//! - **Clouds**: Customer cloud accounts, their project links and flavors
//! - **Security**: Security groups, rules and IP mappings
//! - **Instances**: VM lifecycle as an explicit state machine
//! - **Resize**: Flavor and disk resize validated against project quotas
//! - **Operations**: Visibility, role and state gating of runtime operations
//!
//! ## Architecture
//!
//! ```text
//! Customer ──owns──→ Cloud ──flavors──→ Flavor
//!                      │
//!          CloudProjectMembership ──→ SecurityGroup
//!                      │
//!                   Instance
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use conductor_iaas::{Cloud, CloudProjectMembership, Instance, Inventory, Transition};
//! use uuid::Uuid;
//!
//! let mut inventory = Inventory::new();
//! let (cloud, flavors) = inventory
//!     .add_cloud(Cloud::new(Uuid::now_v7(), "Private", "https://keystone.example.com"))
//!     .unwrap();
//! let (membership, _) = inventory
//!     .add_membership(CloudProjectMembership::new(cloud.id, Uuid::now_v7()))
//!     .unwrap();
//!
//! let vm = inventory
//!     .add_instance(Instance::new(membership.id, "web-1", &flavors[0]))
//!     .unwrap();
//! inventory.apply_transition(vm.id, Transition::BeginProvisioning, Utc::now()).unwrap();
//! ```

pub mod cloud;
pub mod error;
pub mod instance;
pub mod inventory;
pub mod operations;
pub mod resize;
pub mod security;

pub use cloud::{
    validate_auth_url, Cloud, CloudProjectMembership, Flavor, SharedCloudSettings, SyncState,
    DEFAULT_FLAVORS,
};
pub use error::{IaasError, IaasResult, INCORRECT_STATE_MESSAGE};
pub use instance::{Instance, InstanceState, StateChange, Transition};
pub use inventory::{Inventory, InventoryView};
pub use operations::{check_operation, OperationOutcome, RoleRequirement};
pub use resize::{resize, validate_resize, ResizePlan, ResizeRequest, ResizeTarget};
pub use security::{IpMapping, Protocol, SecurityGroup, SecurityGroupRule};
