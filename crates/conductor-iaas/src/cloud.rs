//! Cloud accounts, their project links and flavors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IaasError, IaasResult};

/// Synchronization state of an entity mirrored from a backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Never synchronized
    #[default]
    Unsynced,
    /// Synchronization requested
    SyncingScheduled,
    /// Synchronization in progress
    Syncing,
    /// Mirrors the backend
    InSync,
    /// Last synchronization failed
    Erred,
}

impl SyncState {
    /// Get the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "unsynced",
            SyncState::SyncingScheduled => "syncing_scheduled",
            SyncState::Syncing => "syncing",
            SyncState::InSync => "in_sync",
            SyncState::Erred => "erred",
        }
    }

    /// Request synchronization.
    pub fn schedule_syncing(&mut self) -> IaasResult<()> {
        self.advance(
            &[SyncState::Unsynced, SyncState::InSync, SyncState::Erred],
            SyncState::SyncingScheduled,
        )
    }

    /// Start a scheduled synchronization.
    pub fn begin_syncing(&mut self) -> IaasResult<()> {
        self.advance(&[SyncState::SyncingScheduled], SyncState::Syncing)
    }

    /// Finish a running synchronization.
    pub fn set_in_sync(&mut self) -> IaasResult<()> {
        self.advance(&[SyncState::Syncing], SyncState::InSync)
    }

    /// Mark the entity as failed. Allowed from any state.
    pub fn set_erred(&mut self) {
        *self = SyncState::Erred;
    }

    fn advance(&mut self, sources: &[SyncState], target: SyncState) -> IaasResult<()> {
        if !sources.contains(self) {
            return Err(IaasError::incorrect_state());
        }
        *self = target;
        Ok(())
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that a keystone endpoint is an absolute http(s) URL.
pub fn validate_auth_url(value: &str) -> IaasResult<()> {
    let parsed =
        url::Url::parse(value).map_err(|_| IaasError::Validation("Enter a valid URL.".to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(IaasError::Validation("Enter a valid URL.".to_string())),
    }
}

/// Connection parameters of one cloud account of a customer.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use conductor_iaas::Cloud;
///
/// let cloud = Cloud::new(Uuid::now_v7(), "Private cloud", "https://keystone.example.com:5000/v2.0");
/// assert!(!cloud.available_for_all);
///
/// let json = serde_json::to_value(&cloud).unwrap();
/// assert!(json.get("uuid").is_some());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cloud {
    /// Unique cloud ID
    #[serde(rename = "uuid")]
    pub id: Uuid,

    /// Owning customer
    pub customer_id: Uuid,

    /// Display name, unique per customer
    pub name: String,

    /// Keystone endpoint URL
    pub auth_url: String,

    /// Synchronization state
    #[serde(default)]
    pub state: SyncState,

    /// Link every project of the customer automatically
    #[serde(default)]
    pub available_for_all: bool,

    /// Shared settings this cloud was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_id: Option<Uuid>,

    /// When the cloud was registered
    pub created_at: DateTime<Utc>,
}

impl Cloud {
    /// Creates an unsynced cloud.
    pub fn new(customer_id: Uuid, name: impl Into<String>, auth_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            customer_id,
            name: name.into(),
            auth_url: auth_url.into(),
            state: SyncState::Unsynced,
            available_for_all: false,
            settings_id: None,
            created_at: Utc::now(),
        }
    }

    /// The cloud of a customer on shared settings, linked to all its projects.
    pub fn from_shared(customer_id: Uuid, settings: &SharedCloudSettings) -> Self {
        Self {
            settings_id: Some(settings.id),
            ..Self::new(customer_id, settings.name.clone(), settings.auth_url.clone()).available_for_all()
        }
    }

    /// Link the cloud to every project of its customer.
    pub fn available_for_all(mut self) -> Self {
        self.available_for_all = true;
        self
    }
}

/// Connection settings offered to every customer.
///
/// Each new customer gets its own cloud on these settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedCloudSettings {
    /// Unique settings ID
    #[serde(rename = "uuid")]
    pub id: Uuid,

    /// Name given to the customer clouds
    pub name: String,

    /// Keystone endpoint URL
    pub auth_url: String,

    /// When the settings were registered
    pub created_at: DateTime<Utc>,
}

impl SharedCloudSettings {
    /// Creates shared settings.
    pub fn new(name: impl Into<String>, auth_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            auth_url: auth_url.into(),
            created_at: Utc::now(),
        }
    }
}

/// Link between a cloud and a project, holding the tenant credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudProjectMembership {
    /// Unique membership ID
    pub id: Uuid,

    /// Linked cloud
    pub cloud_id: Uuid,

    /// Linked project
    pub project_id: Uuid,

    /// Tenant user name
    #[serde(default)]
    pub username: String,

    /// Tenant password; accepted on input, never rendered
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Backend tenant ID, unique per cloud when set
    #[serde(default)]
    pub tenant_id: String,

    /// Synchronization state
    #[serde(default)]
    pub state: SyncState,
}

impl fmt::Debug for CloudProjectMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudProjectMembership")
            .field("id", &self.id)
            .field("cloud_id", &self.cloud_id)
            .field("project_id", &self.project_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("state", &self.state)
            .finish()
    }
}

impl CloudProjectMembership {
    /// Creates an unsynced membership without credentials.
    pub fn new(cloud_id: Uuid, project_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            cloud_id,
            project_id,
            username: String::new(),
            password: String::new(),
            tenant_id: String::new(),
            state: SyncState::Unsynced,
        }
    }

    /// Set tenant credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the backend tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Set the synchronization state.
    pub fn with_state(mut self, state: SyncState) -> Self {
        self.state = state;
        self
    }
}

/// A preset of computing resources offered by a cloud.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flavor {
    /// Unique flavor ID
    #[serde(rename = "uuid")]
    pub id: Uuid,

    /// Offering cloud
    pub cloud_id: Uuid,

    /// Display name
    pub name: String,

    /// Number of cores in a VM
    pub cores: u32,

    /// Memory size in GB
    pub ram: f64,

    /// Root disk size in GB
    pub disk: f64,
}

/// Flavors created for every new cloud: name, cores, RAM (GB), disk (GB).
pub const DEFAULT_FLAVORS: [(&str, u32, f64, f64); 4] = [
    ("Weak & Small", 2, 2.0, 10.0),
    ("Powerful & Small", 16, 2.0, 10.0),
    ("Weak & Large", 2, 32.0, 100.0),
    ("Powerful & Large", 16, 32.0, 100.0),
];

impl Flavor {
    /// Creates a flavor.
    pub fn new(cloud_id: Uuid, name: impl Into<String>, cores: u32, ram: f64, disk: f64) -> Self {
        Self {
            id: Uuid::now_v7(),
            cloud_id,
            name: name.into(),
            cores,
            ram,
            disk,
        }
    }

    /// The default flavor set of a cloud.
    pub fn defaults(cloud_id: Uuid) -> Vec<Flavor> {
        DEFAULT_FLAVORS
            .iter()
            .map(|(name, cores, ram, disk)| Flavor::new(cloud_id, *name, *cores, *ram, *disk))
            .collect()
    }

    /// Memory size in MB.
    pub fn ram_mb(&self) -> u64 {
        (self.ram * 1024.0).round() as u64
    }

    /// Root disk size in MB.
    pub fn disk_mb(&self) -> u64 {
        (self.disk * 1024.0).round() as u64
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
