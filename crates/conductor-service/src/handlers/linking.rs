//! Cloud to project linking

use std::sync::Arc;

use async_trait::async_trait;
use conductor_events::{Signal, SignalHandler, SignalKind, SignalName, SignalResult};
use conductor_rbac::ResourceType;
use tracing::debug;

use super::{receiver_error, Route};
use crate::conductor::ConductorState;

pub(super) fn routes() -> Vec<Route> {
    vec![
        Route::new(
            "linking.connect_customer_to_shared_clouds",
            SignalName::PostSave,
            &[ResourceType::Customer],
            Arc::new(ConnectCustomerToSharedClouds),
        ),
        Route::new(
            "linking.connect_project_to_clouds",
            SignalName::PostSave,
            &[ResourceType::Project],
            Arc::new(ConnectProjectToClouds),
        ),
        Route::new(
            "linking.connect_cloud_to_projects",
            SignalName::PostSave,
            &[ResourceType::Cloud],
            Arc::new(ConnectCloudToProjects),
        ),
        Route::new(
            "linking.remove_project_links",
            SignalName::PostDelete,
            &[ResourceType::Project],
            Arc::new(RemoveProjectLinks),
        ),
    ]
}

/// Give a new customer its own cloud on every shared settings entry.
struct ConnectCustomerToSharedClouds;

#[async_trait]
impl SignalHandler<ConductorState> for ConnectCustomerToSharedClouds {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        if !matches!(signal.kind, SignalKind::PostSave { created: true }) {
            return Ok(());
        }
        let clouds = ctx
            .inventory
            .write()
            .await
            .connect_customer_to_shared_settings(signal.instance_id)
            .map_err(|e| receiver_error("linking.connect_customer_to_shared_clouds", e))?;
        debug!(customer_id = %signal.instance_id, clouds = clouds.len(), "Customer connected to shared clouds");
        Ok(())
    }
}

/// Link a new project to every available-for-all cloud of its customer.
struct ConnectProjectToClouds;

#[async_trait]
impl SignalHandler<ConductorState> for ConnectProjectToClouds {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        if !matches!(signal.kind, SignalKind::PostSave { created: true }) {
            return Ok(());
        }
        let structure = ctx.structure.read().await;
        let project = structure.project(signal.instance_id)?;
        let linked = ctx
            .inventory
            .write()
            .await
            .connect_project_to_available_clouds(project)
            .map_err(|e| receiver_error("linking.connect_project_to_clouds", e))?;
        debug!(project_id = %project.id, linked = linked.len(), "Project linked to available clouds");
        Ok(())
    }
}

/// Link every project of the customer once a cloud is available for all.
struct ConnectCloudToProjects;

#[async_trait]
impl SignalHandler<ConductorState> for ConnectCloudToProjects {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let structure = ctx.structure.read().await;
        let mut inventory = ctx.inventory.write().await;
        let available = inventory
            .cloud(signal.instance_id)
            .map_err(|e| receiver_error("linking.connect_cloud_to_projects", e))?
            .available_for_all;
        if available {
            inventory
                .set_cloud_available_for_all(&structure, signal.instance_id, true)
                .map_err(|e| receiver_error("linking.connect_cloud_to_projects", e))?;
        }
        Ok(())
    }
}

struct RemoveProjectLinks;

#[async_trait]
impl SignalHandler<ConductorState> for RemoveProjectLinks {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let removed = ctx
            .inventory
            .write()
            .await
            .remove_project_links(signal.instance_id);
        debug!(project_id = %signal.instance_id, removed = removed.len(), "Project links removed");
        Ok(())
    }
}
