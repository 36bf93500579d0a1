//! Instance lifecycle receivers

use std::sync::Arc;

use async_trait::async_trait;
use conductor_cost::ScopeRef;
use conductor_events::{
    ResourceEvent, ResourceRef, Signal, SignalHandler, SignalKind, SignalName, SignalResult,
};
use conductor_iaas::InstanceState;
use conductor_rbac::ResourceType;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{attributed, receiver_error, Route};
use crate::conductor::ConductorState;

const ESTIMATED: &[ResourceType] = &[
    ResourceType::Instance,
    ResourceType::CloudProjectMembership,
    ResourceType::Cloud,
    ResourceType::Project,
    ResourceType::Customer,
];

pub(super) fn routes() -> Vec<Route> {
    vec![
        Route::new(
            "resources.log_creation_scheduled",
            SignalName::PostSave,
            &[ResourceType::Instance],
            Arc::new(LogCreationScheduled),
        ),
        Route::new(
            "resources.log_deleted",
            SignalName::PreDelete,
            &[ResourceType::Instance],
            Arc::new(LogResourceDeleted),
        ),
        Route::new(
            "resources.log_imported",
            SignalName::ResourceImported,
            &[ResourceType::Instance],
            Arc::new(LogResourceImported),
        ),
        Route::new(
            "resources.log_action",
            SignalName::PostTransition,
            &[ResourceType::Instance],
            Arc::new(LogResourceAction),
        ),
        Route::new(
            "resources.detect_coordinates",
            SignalName::PostTransition,
            &[ResourceType::Instance],
            Arc::new(DetectCoordinates),
        ),
        Route::new(
            "resources.delete_price_estimates",
            SignalName::PostDelete,
            ESTIMATED,
            Arc::new(DeletePriceEstimates),
        ),
    ]
}

/// Hierarchy identity of an instance.
async fn instance_ref(ctx: &ConductorState, id: Uuid) -> SignalResult<ResourceRef> {
    let structure = ctx.structure.read().await;
    let inventory = ctx.inventory.read().await;
    let instance = inventory
        .instance(id)
        .map_err(|e| receiver_error("resources", e))?;
    let project_id = inventory
        .project_of_instance(id)
        .map_err(|e| receiver_error("resources", e))?;
    let customer_id = structure.project(project_id)?.customer_id;
    Ok(ResourceRef {
        resource_type: ResourceType::Instance,
        resource_id: id,
        resource_name: instance.hostname.clone(),
        project_id,
        customer_id,
    })
}

fn entered_online(signal: &Signal) -> bool {
    matches!(&signal.kind, SignalKind::PostTransition { to, .. } if to == InstanceState::Online.as_str())
}

/// Runtime action a transition schedules or completes.
fn action_of(transition: &str, from: &str) -> Option<(&'static str, bool)> {
    match (transition, from) {
        ("schedule_start", _) => Some(("start", false)),
        ("schedule_stop", _) => Some(("stop", false)),
        ("schedule_restart", _) => Some(("restart", false)),
        ("schedule_resizing", _) => Some(("resize", false)),
        ("set_online", "starting") => Some(("start", true)),
        ("set_online", "restarting") => Some(("restart", true)),
        ("set_offline", "stopping") => Some(("stop", true)),
        ("set_resized", _) => Some(("resize", true)),
        _ => None,
    }
}

struct LogCreationScheduled;

#[async_trait]
impl SignalHandler<ConductorState> for LogCreationScheduled {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        if !matches!(signal.kind, SignalKind::PostSave { created: true }) {
            return Ok(());
        }
        let resource = instance_ref(ctx, signal.instance_id).await?;
        let event = ResourceEvent::CreationScheduled { resource };
        ctx.emit(attributed(event.to_event(), signal)).await;
        Ok(())
    }
}

struct LogResourceDeleted;

#[async_trait]
impl SignalHandler<ConductorState> for LogResourceDeleted {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let resource = instance_ref(ctx, signal.instance_id).await?;
        let event = ResourceEvent::Deleted { resource };
        ctx.emit(attributed(event.to_event(), signal)).await;
        Ok(())
    }
}

struct LogResourceImported;

#[async_trait]
impl SignalHandler<ConductorState> for LogResourceImported {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let resource = instance_ref(ctx, signal.instance_id).await?;
        let event = ResourceEvent::Imported { resource };
        ctx.emit(attributed(event.to_event(), signal)).await;
        Ok(())
    }
}

struct LogResourceAction;

#[async_trait]
impl SignalHandler<ConductorState> for LogResourceAction {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let SignalKind::PostTransition { from, transition, .. } = &signal.kind else {
            return Ok(());
        };
        let Some((action, succeeded)) = action_of(transition, from) else {
            return Ok(());
        };
        let resource = instance_ref(ctx, signal.instance_id).await?;
        let action = action.to_string();
        let event = if succeeded {
            ResourceEvent::ActionSucceeded { resource, action }
        } else {
            ResourceEvent::ActionScheduled { resource, action }
        };
        ctx.emit(attributed(event.to_event(), signal)).await;
        Ok(())
    }
}

struct DetectCoordinates;

#[async_trait]
impl SignalHandler<ConductorState> for DetectCoordinates {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        if !entered_online(signal) {
            return Ok(());
        }
        let Some(geoip) = &ctx.geoip else {
            return Ok(());
        };
        let ip = {
            let inventory = ctx.inventory.read().await;
            let instance = inventory
                .instance(signal.instance_id)
                .map_err(|e| receiver_error("resources.detect_coordinates", e))?;
            match instance.external_ips.first() {
                Some(ip) => *ip,
                None => return Ok(()),
            }
        };

        match geoip.coordinates(ip).await {
            Ok(coordinates) => {
                let mut inventory = ctx.inventory.write().await;
                if let Ok(instance) = inventory.instance_mut(signal.instance_id) {
                    instance.latitude = Some(coordinates.latitude);
                    instance.longitude = Some(coordinates.longitude);
                    debug!(instance_id = %signal.instance_id, ip = %ip, "VM coordinates detected");
                }
            }
            Err(e) => warn!(
                "Unable to detect coordinates for VM {}: {}.",
                signal.instance_id.simple(),
                e
            ),
        }
        Ok(())
    }
}

struct DeletePriceEstimates;

#[async_trait]
impl SignalHandler<ConductorState> for DeletePriceEstimates {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let scope = ScopeRef::new(signal.sender, signal.instance_id);
        let removed = ctx.estimates.write().await.delete_for_scope(scope);
        if removed > 0 {
            debug!(scope = %signal.sender, scope_id = %signal.instance_id, removed, "Price estimates deleted");
        }
        Ok(())
    }
}
