//! Instance resize
//!
//! A resize either switches the flavor or grows the data volume, never both.
//! Validation runs in a fixed order so callers get the same error for the
//! same request: request shape, instance state, flavor origin, then quotas.

use chrono::{DateTime, Utc};
use conductor_structure::{QuotaName, QuotaSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cloud::Flavor;
use crate::error::{IaasError, IaasResult};
use crate::instance::{Instance, InstanceState, StateChange, Transition};
use crate::inventory::Inventory;

/// Requested resize.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResizeRequest {
    /// New flavor
    pub flavor: Option<Uuid>,
    /// New data volume size in MB
    pub disk_size: Option<u64>,
}

impl ResizeRequest {
    /// Switch to another flavor.
    pub fn flavor(flavor_id: Uuid) -> Self {
        Self {
            flavor: Some(flavor_id),
            disk_size: None,
        }
    }

    /// Grow the data volume.
    pub fn disk_size(size: u64) -> Self {
        Self {
            flavor: None,
            disk_size: Some(size),
        }
    }
}

/// What a validated resize changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ResizeTarget {
    /// Cores and RAM come from the flavor
    Flavor(Flavor),
    /// Data volume grows to the size in MB
    Disk(u64),
}

/// A validated resize together with the project quota deltas it causes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizePlan {
    /// New sizing
    pub target: ResizeTarget,
    /// Quota usage deltas to apply to the project
    pub quota_changes: Vec<(QuotaName, f64)>,
}

/// Validate a resize request against the instance, its cloud and the
/// project quotas.
///
/// # Errors
///
/// - `Validation` for a malformed request, a flavor of another cloud or a
///   data volume that does not grow
/// - `IncorrectState` unless the instance is offline
/// - `QuotaExceeded` when the project quotas cannot absorb the change
pub fn validate_resize(
    instance: &Instance,
    request: &ResizeRequest,
    inventory: &Inventory,
    project_quotas: &QuotaSet,
) -> IaasResult<ResizePlan> {
    match (request.flavor, request.disk_size) {
        (Some(_), Some(_)) => Err(IaasError::Validation(
            "Cannot resize both disk size and flavor simultaneously".to_string(),
        )),
        (None, None) => Err(IaasError::Validation(
            "Either disk_size or flavor is required".to_string(),
        )),
        _ if instance.state != InstanceState::Offline => {
            Err(IaasError::operation_not_allowed("resize"))
        }
        (Some(flavor_id), None) => {
            let flavor = inventory.flavor(flavor_id).map_err(|_| {
                IaasError::Validation("Invalid flavor - object does not exist.".to_string())
            })?;
            let cloud_id = inventory.membership(instance.membership_id)?.cloud_id;
            if flavor.cloud_id != cloud_id {
                return Err(IaasError::Validation(
                    "New flavor is not within the same service settings".to_string(),
                ));
            }

            let quota_changes = vec![
                (QuotaName::Vcpu, flavor.cores as f64 - instance.cores as f64),
                (QuotaName::Ram, flavor.ram_mb() as f64 - instance.ram as f64),
            ];
            project_quotas.validate_quota_change(&quota_changes)?;
            Ok(ResizePlan {
                target: ResizeTarget::Flavor(flavor.clone()),
                quota_changes,
            })
        }
        (None, Some(disk_size)) => {
            if disk_size <= instance.data_volume_size {
                return Err(IaasError::Validation(
                    "Disk size must be strictly greater than the current one".to_string(),
                ));
            }
            let quota_changes = vec![(
                QuotaName::Storage,
                (disk_size - instance.data_volume_size) as f64,
            )];
            project_quotas.validate_quota_change(&quota_changes)?;
            Ok(ResizePlan {
                target: ResizeTarget::Disk(disk_size),
                quota_changes,
            })
        }
    }
}

/// Schedule a validated resize and apply the new sizing.
///
/// The system volume is left as is.
pub fn resize(instance: &mut Instance, plan: &ResizePlan, now: DateTime<Utc>) -> IaasResult<StateChange> {
    let change = instance.apply(Transition::ScheduleResizing, now)?;
    match &plan.target {
        ResizeTarget::Flavor(flavor) => {
            instance.flavor_name = flavor.name.clone();
            instance.cores = flavor.cores;
            instance.ram = flavor.ram_mb();
        }
        ResizeTarget::Disk(size) => instance.data_volume_size = *size,
    }
    Ok(change)
}

impl Inventory {
    /// Validate and schedule a resize of an instance.
    ///
    /// # Returns
    ///
    /// The state change and the project quota deltas to apply
    pub fn resize_instance(
        &mut self,
        id: Uuid,
        request: &ResizeRequest,
        project_quotas: &QuotaSet,
        now: DateTime<Utc>,
    ) -> IaasResult<(StateChange, Vec<(QuotaName, f64)>)> {
        let plan = validate_resize(self.instance(id)?, request, self, project_quotas)?;
        let change = resize(self.instance_mut(id)?, &plan, now)?;
        Ok((change, plan.quota_changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Cloud, CloudProjectMembership};

    struct Fixture {
        inventory: Inventory,
        instance: Uuid,
        cloud: Uuid,
        quotas: QuotaSet,
    }

    fn fixture() -> Fixture {
        let mut inventory = Inventory::new();
        let (cloud, flavors) = inventory
            .add_cloud(Cloud::new(Uuid::now_v7(), "Private", "https://keystone.example.com"))
            .unwrap();
        let (membership, _) = inventory
            .add_membership(CloudProjectMembership::new(cloud.id, Uuid::now_v7()))
            .unwrap();
        let instance = inventory
            .add_instance(
                Instance::new(membership.id, "web-1", &flavors[0])
                    .with_data_volume_size(1024)
                    .with_state(InstanceState::Offline),
            )
            .unwrap();
        Fixture {
            inventory,
            instance: instance.id,
            cloud: cloud.id,
            quotas: QuotaSet::project_defaults(),
        }
    }

    fn flavor_named(f: &Fixture, name: &str) -> Flavor {
        f.inventory
            .flavors_of_cloud(f.cloud)
            .into_iter()
            .find(|flavor| flavor.name == name)
            .cloned()
            .unwrap()
    }

    fn validate(f: &Fixture, request: &ResizeRequest) -> IaasResult<ResizePlan> {
        validate_resize(
            f.inventory.instance(f.instance).unwrap(),
            request,
            &f.inventory,
            &f.quotas,
        )
    }

    #[test]
    fn test_request_shape() {
        let f = fixture();
        let both = ResizeRequest {
            flavor: Some(Uuid::now_v7()),
            disk_size: Some(4096),
        };
        assert_eq!(
            validate(&f, &both).unwrap_err().to_string(),
            "Cannot resize both disk size and flavor simultaneously"
        );
        assert_eq!(
            validate(&f, &ResizeRequest::default()).unwrap_err().to_string(),
            "Either disk_size or flavor is required"
        );
    }

    #[test]
    fn test_requires_offline() {
        let mut f = fixture();
        f.inventory.instance_mut(f.instance).unwrap().state = InstanceState::Online;
        let err = validate(&f, &ResizeRequest::disk_size(4096)).unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_flavor_from_other_cloud() {
        let mut f = fixture();
        let (other, flavors) = f
            .inventory
            .add_cloud(Cloud::new(Uuid::now_v7(), "Public", "https://public.example.com"))
            .unwrap();
        assert_ne!(other.id, f.cloud);

        let err = validate(&f, &ResizeRequest::flavor(flavors[1].id)).unwrap_err();
        assert_eq!(err.to_string(), "New flavor is not within the same service settings");
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_flavor_quota() {
        let mut f = fixture();
        let powerful = flavor_named(&f, "Powerful & Small").id;
        f.quotas.set_limit(QuotaName::Vcpu, 4.0);
        f.quotas.set_usage(QuotaName::Vcpu, 2.0);

        let err = validate(&f, &ResizeRequest::flavor(powerful)).unwrap_err();
        assert!(matches!(err, IaasError::QuotaExceeded(_)));

        // Shrinking fits even when the quota is already full.
        f.quotas.set_limit(QuotaName::Vcpu, 2.0);
        let small = f
            .inventory
            .add_flavor(Flavor::new(f.cloud, "Tiny", 1, 1.0, 10.0))
            .unwrap();
        let plan = validate(&f, &ResizeRequest::flavor(small.id)).unwrap();
        assert_eq!(plan.quota_changes[0], (QuotaName::Vcpu, -1.0));
        assert_eq!(plan.quota_changes[1], (QuotaName::Ram, -1024.0));
    }

    #[test]
    fn test_disk_must_grow_within_quota() {
        let mut f = fixture();
        let err = validate(&f, &ResizeRequest::disk_size(1024)).unwrap_err();
        assert_eq!(err.status_code(), 400);

        f.quotas.set_limit(QuotaName::Storage, 2048.0);
        assert!(validate(&f, &ResizeRequest::disk_size(4096)).is_err());
        let plan = validate(&f, &ResizeRequest::disk_size(3072)).unwrap();
        assert_eq!(plan.quota_changes, vec![(QuotaName::Storage, 2048.0)]);
    }

    #[test]
    fn test_resize_instance_applies_flavor() {
        let mut f = fixture();
        let large = flavor_named(&f, "Powerful & Large");
        let system_volume = f.inventory.instance(f.instance).unwrap().system_volume_size;

        let (change, deltas) = f
            .inventory
            .resize_instance(f.instance, &ResizeRequest::flavor(large.id), &f.quotas, Utc::now())
            .unwrap();
        assert_eq!(change.to, InstanceState::ResizingScheduled);
        assert_eq!(deltas.len(), 2);

        let instance = f.inventory.instance(f.instance).unwrap();
        assert_eq!(instance.flavor_name, "Powerful & Large");
        assert_eq!(instance.cores, 16);
        assert_eq!(instance.ram, 32 * 1024);
        assert_eq!(instance.system_volume_size, system_volume);
    }
}
