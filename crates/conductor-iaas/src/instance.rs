//! Virtual machine instances and their lifecycle
//!
//! Instances move through an explicit state machine. Runtime operations
//! (start, stop, restart, resize, delete) only schedule work: they move the
//! instance into a `*Scheduled` state and the backend picks it up from there.
//!
//! ```text
//! ProvisioningScheduled → Provisioning → Online ⇄ (Stopping…) ⇄ Offline
//!                                          │                      │
//!                                   Restarting…              Resizing… / Deleting…
//! ```

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use conductor_structure::QuotaName;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cloud::Flavor;
use crate::error::{IaasError, IaasResult};

/// Instance states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Waiting for the backend to provision
    #[default]
    ProvisioningScheduled,
    /// Being provisioned
    Provisioning,
    /// Running
    Online,
    /// Stopped
    Offline,
    /// Start requested
    StartingScheduled,
    /// Starting
    Starting,
    /// Stop requested
    StoppingScheduled,
    /// Stopping
    Stopping,
    /// Restart requested
    RestartingScheduled,
    /// Restarting
    Restarting,
    /// Resize requested
    ResizingScheduled,
    /// Resizing
    Resizing,
    /// Deletion requested
    DeletionScheduled,
    /// Being deleted
    Deleting,
    /// Backend failure
    Erred,
}

impl InstanceState {
    /// Every state.
    pub const ALL: [InstanceState; 15] = [
        InstanceState::ProvisioningScheduled,
        InstanceState::Provisioning,
        InstanceState::Online,
        InstanceState::Offline,
        InstanceState::StartingScheduled,
        InstanceState::Starting,
        InstanceState::StoppingScheduled,
        InstanceState::Stopping,
        InstanceState::RestartingScheduled,
        InstanceState::Restarting,
        InstanceState::ResizingScheduled,
        InstanceState::Resizing,
        InstanceState::DeletionScheduled,
        InstanceState::Deleting,
        InstanceState::Erred,
    ];

    /// Get the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::ProvisioningScheduled => "provisioning_scheduled",
            InstanceState::Provisioning => "provisioning",
            InstanceState::Online => "online",
            InstanceState::Offline => "offline",
            InstanceState::StartingScheduled => "starting_scheduled",
            InstanceState::Starting => "starting",
            InstanceState::StoppingScheduled => "stopping_scheduled",
            InstanceState::Stopping => "stopping",
            InstanceState::RestartingScheduled => "restarting_scheduled",
            InstanceState::Restarting => "restarting",
            InstanceState::ResizingScheduled => "resizing_scheduled",
            InstanceState::Resizing => "resizing",
            InstanceState::DeletionScheduled => "deletion_scheduled",
            InstanceState::Deleting => "deleting",
            InstanceState::Erred => "erred",
        }
    }

    /// Parse state from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// Whether the backend is expected to act on the instance.
    pub fn is_transitional(&self) -> bool {
        !matches!(
            self,
            InstanceState::Online | InstanceState::Offline | InstanceState::Erred
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named state transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Backend picked up provisioning
    BeginProvisioning,
    /// Instance is running
    SetOnline,
    /// Instance is stopped
    SetOffline,
    /// Request a start
    ScheduleStart,
    /// Backend picked up the start
    BeginStarting,
    /// Request a stop
    ScheduleStop,
    /// Backend picked up the stop
    BeginStopping,
    /// Request a restart
    ScheduleRestart,
    /// Backend picked up the restart
    BeginRestarting,
    /// Request a resize
    ScheduleResizing,
    /// Backend picked up the resize
    BeginResizing,
    /// Resize finished; the instance stays stopped
    SetResized,
    /// Request deletion
    ScheduleDeletion,
    /// Backend picked up the deletion
    BeginDeleting,
    /// Backend failure
    SetErred,
}

impl Transition {
    /// Every transition.
    pub const ALL: [Transition; 15] = [
        Transition::BeginProvisioning,
        Transition::SetOnline,
        Transition::SetOffline,
        Transition::ScheduleStart,
        Transition::BeginStarting,
        Transition::ScheduleStop,
        Transition::BeginStopping,
        Transition::ScheduleRestart,
        Transition::BeginRestarting,
        Transition::ScheduleResizing,
        Transition::BeginResizing,
        Transition::SetResized,
        Transition::ScheduleDeletion,
        Transition::BeginDeleting,
        Transition::SetErred,
    ];

    /// Get the string representation of the transition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::BeginProvisioning => "begin_provisioning",
            Transition::SetOnline => "set_online",
            Transition::SetOffline => "set_offline",
            Transition::ScheduleStart => "schedule_start",
            Transition::BeginStarting => "begin_starting",
            Transition::ScheduleStop => "schedule_stop",
            Transition::BeginStopping => "begin_stopping",
            Transition::ScheduleRestart => "schedule_restart",
            Transition::BeginRestarting => "begin_restarting",
            Transition::ScheduleResizing => "schedule_resizing",
            Transition::BeginResizing => "begin_resizing",
            Transition::SetResized => "set_resized",
            Transition::ScheduleDeletion => "schedule_deletion",
            Transition::BeginDeleting => "begin_deleting",
            Transition::SetErred => "set_erred",
        }
    }

    /// Parse a transition from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// States the transition may start from. Empty means any state.
    pub fn sources(&self) -> &'static [InstanceState] {
        use InstanceState::*;
        match self {
            Transition::BeginProvisioning => &[ProvisioningScheduled],
            Transition::SetOnline => &[Provisioning, Starting, Restarting, Resizing],
            Transition::SetOffline => &[Provisioning, Stopping, Resizing],
            Transition::ScheduleStart => &[Offline],
            Transition::BeginStarting => &[StartingScheduled],
            Transition::ScheduleStop => &[Online],
            Transition::BeginStopping => &[StoppingScheduled],
            Transition::ScheduleRestart => &[Online],
            Transition::BeginRestarting => &[RestartingScheduled],
            Transition::ScheduleResizing => &[Offline],
            Transition::BeginResizing => &[ResizingScheduled],
            Transition::SetResized => &[Resizing],
            Transition::ScheduleDeletion => &[Offline, Erred],
            Transition::BeginDeleting => &[DeletionScheduled],
            Transition::SetErred => &[],
        }
    }

    /// State reached by the transition.
    pub fn target(&self) -> InstanceState {
        use InstanceState::*;
        match self {
            Transition::BeginProvisioning => Provisioning,
            Transition::SetOnline => Online,
            Transition::SetOffline | Transition::SetResized => Offline,
            Transition::ScheduleStart => StartingScheduled,
            Transition::BeginStarting => Starting,
            Transition::ScheduleStop => StoppingScheduled,
            Transition::BeginStopping => Stopping,
            Transition::ScheduleRestart => RestartingScheduled,
            Transition::BeginRestarting => Restarting,
            Transition::ScheduleResizing => ResizingScheduled,
            Transition::BeginResizing => Resizing,
            Transition::ScheduleDeletion => DeletionScheduled,
            Transition::BeginDeleting => Deleting,
            Transition::SetErred => Erred,
        }
    }

    /// Whether the transition may start from `state`.
    pub fn allowed_from(&self, state: InstanceState) -> bool {
        let sources = self.sources();
        sources.is_empty() || sources.contains(&state)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// Instance
    pub instance_id: Uuid,
    /// Applied transition
    pub transition: Transition,
    /// State before
    pub from: InstanceState,
    /// State after
    pub to: InstanceState,
}

/// A virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance ID
    #[serde(rename = "uuid")]
    pub id: Uuid,

    /// Cloud-project membership the instance runs under
    pub membership_id: Uuid,

    /// Host name
    pub hostname: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Template the instance was created from
    #[serde(default)]
    pub template_name: String,

    /// Current flavor
    #[serde(default)]
    pub flavor_name: String,

    /// Number of cores
    pub cores: u32,

    /// Memory in MB
    pub ram: u64,

    /// System volume in MB
    pub system_volume_size: u64,

    /// Data volume in MB
    pub data_volume_size: u64,

    /// Lifecycle state
    pub state: InstanceState,

    /// When the instance last came online
    pub start_time: Option<DateTime<Utc>>,

    /// Public addresses
    #[serde(default)]
    pub external_ips: Vec<IpAddr>,

    /// SSH key name injected at provisioning
    #[serde(default)]
    pub key_name: String,

    /// SSH key fingerprint injected at provisioning
    #[serde(default)]
    pub key_fingerprint: String,

    /// Detected latitude
    pub latitude: Option<f64>,

    /// Detected longitude
    pub longitude: Option<f64>,

    /// When the instance was created
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Creates an instance sized by `flavor`, waiting for provisioning.
    pub fn new(membership_id: Uuid, hostname: impl Into<String>, flavor: &Flavor) -> Self {
        Self {
            id: Uuid::now_v7(),
            membership_id,
            hostname: hostname.into(),
            description: String::new(),
            template_name: String::new(),
            flavor_name: flavor.name.clone(),
            cores: flavor.cores,
            ram: flavor.ram_mb(),
            system_volume_size: flavor.disk_mb(),
            data_volume_size: 0,
            state: InstanceState::ProvisioningScheduled,
            start_time: None,
            external_ips: Vec::new(),
            key_name: String::new(),
            key_fingerprint: String::new(),
            latitude: None,
            longitude: None,
            created_at: Utc::now(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the template name.
    pub fn with_template(mut self, template_name: impl Into<String>) -> Self {
        self.template_name = template_name.into();
        self
    }

    /// Set the data volume size in MB.
    pub fn with_data_volume_size(mut self, size: u64) -> Self {
        self.data_volume_size = size;
        self
    }

    /// Add a public address.
    pub fn with_external_ip(mut self, ip: IpAddr) -> Self {
        self.external_ips.push(ip);
        self
    }

    /// Set the injected SSH key.
    pub fn with_key(mut self, name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        self.key_name = name.into();
        self.key_fingerprint = fingerprint.into();
        self
    }

    /// Set the state directly, e.g. for instances imported from a backend.
    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    /// Quota usage held by the instance.
    pub fn quota_usage(&self) -> [(QuotaName, f64); 4] {
        [
            (QuotaName::Vcpu, self.cores as f64),
            (QuotaName::Ram, self.ram as f64),
            (
                QuotaName::Storage,
                (self.system_volume_size + self.data_volume_size) as f64,
            ),
            (QuotaName::MaxInstances, 1.0),
        ]
    }

    /// Apply a transition.
    ///
    /// Entering `Online` records the start time, entering `Offline` clears it.
    ///
    /// # Errors
    ///
    /// `IncorrectState` when the transition is not allowed from the current
    /// state
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> IaasResult<StateChange> {
        if !transition.allowed_from(self.state) {
            return Err(IaasError::incorrect_state());
        }
        let from = self.state;
        let to = transition.target();
        self.state = to;
        match to {
            InstanceState::Online if from != InstanceState::Online => self.start_time = Some(now),
            InstanceState::Offline => self.start_time = None,
            _ => {}
        }
        Ok(StateChange {
            instance_id: self.id,
            transition,
            from,
            to,
        })
    }

    fn schedule(
        &mut self,
        operation: &str,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> IaasResult<StateChange> {
        if !transition.allowed_from(self.state) {
            return Err(IaasError::operation_not_allowed(operation));
        }
        self.apply(transition, now)
    }

    /// Schedule a start. Requires `Offline`.
    pub fn start(&mut self, now: DateTime<Utc>) -> IaasResult<StateChange> {
        self.schedule("start", Transition::ScheduleStart, now)
    }

    /// Schedule a stop. Requires `Online`.
    pub fn stop(&mut self, now: DateTime<Utc>) -> IaasResult<StateChange> {
        self.schedule("stop", Transition::ScheduleStop, now)
    }

    /// Schedule a restart. Requires `Online`.
    pub fn restart(&mut self, now: DateTime<Utc>) -> IaasResult<StateChange> {
        self.schedule("restart", Transition::ScheduleRestart, now)
    }

    /// Schedule deletion. Requires `Offline` or `Erred`.
    pub fn schedule_deletion(&mut self, now: DateTime<Utc>) -> IaasResult<StateChange> {
        self.schedule("destroy", Transition::ScheduleDeletion, now)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        let flavor = Flavor::new(Uuid::now_v7(), "Weak & Small", 2, 2.0, 10.0);
        Instance::new(Uuid::now_v7(), "web-1", &flavor)
    }

    #[test]
    fn test_sized_by_flavor() {
        let vm = instance().with_data_volume_size(20 * 1024);
        assert_eq!(vm.cores, 2);
        assert_eq!(vm.ram, 2048);
        assert_eq!(vm.system_volume_size, 10 * 1024);
        assert_eq!(vm.state, InstanceState::ProvisioningScheduled);

        let usage = vm.quota_usage();
        assert_eq!(usage[2], (QuotaName::Storage, 30.0 * 1024.0));
    }

    #[test]
    fn test_provisioning_sets_start_time() {
        let mut vm = instance();
        let now = Utc::now();
        vm.apply(Transition::BeginProvisioning, now).unwrap();
        let change = vm.apply(Transition::SetOnline, now).unwrap();

        assert_eq!(change.from, InstanceState::Provisioning);
        assert_eq!(change.to, InstanceState::Online);
        assert_eq!(vm.start_time, Some(now));

        vm.stop(now).unwrap();
        vm.apply(Transition::BeginStopping, now).unwrap();
        vm.apply(Transition::SetOffline, now).unwrap();
        assert_eq!(vm.start_time, None);
    }

    #[test]
    fn test_invalid_transition() {
        let mut vm = instance();
        let err = vm.apply(Transition::SetResized, Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Cannot modify an object in its current state.");
        assert_eq!(err.status_code(), 409);
        assert_eq!(vm.state, InstanceState::ProvisioningScheduled);
    }

    #[test]
    fn test_runtime_operations_require_state() {
        let now = Utc::now();
        let mut vm = instance().with_state(InstanceState::Offline);
        let err = vm.stop(now).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Performing stop operation is not allowed for resource in its current state."
        );
        assert!(vm.restart(now).is_err());

        let change = vm.start(now).unwrap();
        assert_eq!(change.to, InstanceState::StartingScheduled);

        let mut running = instance().with_state(InstanceState::Online);
        assert!(running.start(now).is_err());
        assert_eq!(running.restart(now).unwrap().to, InstanceState::RestartingScheduled);
    }

    #[test]
    fn test_erred_from_anywhere() {
        for state in InstanceState::ALL {
            let mut vm = instance().with_state(state);
            assert!(vm.apply(Transition::SetErred, Utc::now()).is_ok());
            assert_eq!(vm.state, InstanceState::Erred);
        }
        let mut vm = instance().with_state(InstanceState::Erred);
        assert!(vm.schedule_deletion(Utc::now()).is_ok());
    }

    #[test]
    fn test_state_names() {
        for state in InstanceState::ALL {
            assert_eq!(InstanceState::parse(state.as_str()), Some(state));
        }
        assert!(InstanceState::Resizing.is_transitional());
        assert!(!InstanceState::Offline.is_transitional());
        for transition in Transition::ALL {
            assert_eq!(Transition::parse(transition.as_str()), Some(transition));
        }
        assert_eq!(Transition::parse("explode"), None);
    }
}
