//! Customer, project, project group and role receivers

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conductor_events::{Signal, SignalError, SignalHandler, SignalKind, SignalName, SignalResult, StructureEvent};
use conductor_rbac::ResourceType;
use conductor_structure::{ScopeKind, Structure, StructureError, StructureResult};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{attributed, Route};
use crate::conductor::ConductorState;

const HIERARCHY: &[ResourceType] = &[
    ResourceType::Customer,
    ResourceType::Project,
    ResourceType::ProjectGroup,
];

pub(super) fn routes() -> Vec<Route> {
    let log_role_change: Arc<LogRoleChange> = Arc::new(LogRoleChange);
    let sync_user_count: Arc<SyncUserCount> = Arc::new(SyncUserCount);
    vec![
        Route::new(
            "structure.create_role_slots",
            SignalName::PostSave,
            HIERARCHY,
            Arc::new(CreateRoleSlots),
        ),
        Route::new(
            "structure.log_saved",
            SignalName::PostSave,
            HIERARCHY,
            Arc::new(LogSaved),
        ),
        Route::new(
            "structure.prevent_customer_deletion",
            SignalName::PreDelete,
            &[ResourceType::Customer],
            Arc::new(PreventCustomerDeletion),
        ),
        Route::new(
            "structure.prevent_project_group_deletion",
            SignalName::PreDelete,
            &[ResourceType::ProjectGroup],
            Arc::new(PreventProjectGroupDeletion),
        ),
        Route::new(
            "structure.log_deleted",
            SignalName::PreDelete,
            HIERARCHY,
            Arc::new(LogDeleted),
        ),
        Route::new(
            "structure.revoke_roles_on_project_deletion",
            SignalName::PreDelete,
            &[ResourceType::Project],
            Arc::new(RevokeRolesOnProjectDeletion),
        ),
        Route::new(
            "structure.sync_user_count_on_grant",
            SignalName::RoleGranted,
            HIERARCHY,
            sync_user_count.clone(),
        ),
        Route::new(
            "structure.sync_user_count_on_revoke",
            SignalName::RoleRevoked,
            HIERARCHY,
            sync_user_count,
        ),
        Route::new(
            "structure.log_role_granted",
            SignalName::RoleGranted,
            HIERARCHY,
            log_role_change.clone(),
        ),
        Route::new(
            "structure.log_role_revoked",
            SignalName::RoleRevoked,
            HIERARCHY,
            log_role_change,
        ),
        Route::new(
            "structure.log_account_credited",
            SignalName::AccountCredited,
            &[ResourceType::Customer],
            Arc::new(LogAccountBalance),
        ),
        Route::new(
            "structure.log_account_debited",
            SignalName::AccountDebited,
            &[ResourceType::Customer],
            Arc::new(LogAccountBalance),
        ),
    ]
}

/// Scope level, name and customer of a hierarchy object.
fn describe(structure: &Structure, sender: ResourceType, id: Uuid) -> StructureResult<(ScopeKind, String, Uuid)> {
    match sender {
        ResourceType::Customer => {
            let customer = structure.customer(id)?;
            Ok((ScopeKind::Customer, customer.name.clone(), customer.id))
        }
        ResourceType::Project => {
            let project = structure.project(id)?;
            Ok((ScopeKind::Project, project.name.clone(), project.customer_id))
        }
        ResourceType::ProjectGroup => {
            let group = structure.project_group(id)?;
            Ok((ScopeKind::ProjectGroup, group.name.clone(), group.customer_id))
        }
        other => Err(StructureError::validation(
            "sender",
            format!("{other} is not part of the hierarchy"),
        )),
    }
}

fn lifecycle_event(kind: ScopeKind, id: Uuid, name: String, customer_id: Uuid, signal: &SignalKind) -> Option<StructureEvent> {
    let event = match (kind, signal) {
        (ScopeKind::Customer, SignalKind::PostSave { created: true }) => StructureEvent::CustomerCreated {
            customer_id,
            customer_name: name,
        },
        (ScopeKind::Customer, SignalKind::PostSave { created: false }) => StructureEvent::CustomerUpdated {
            customer_id,
            customer_name: name,
        },
        (ScopeKind::Customer, SignalKind::PreDelete) => StructureEvent::CustomerDeleted {
            customer_id,
            customer_name: name,
        },
        (ScopeKind::Project, SignalKind::PostSave { created: true }) => StructureEvent::ProjectCreated {
            project_id: id,
            project_name: name,
            customer_id,
        },
        (ScopeKind::Project, SignalKind::PostSave { created: false }) => StructureEvent::ProjectUpdated {
            project_id: id,
            project_name: name,
            customer_id,
        },
        (ScopeKind::Project, SignalKind::PreDelete) => StructureEvent::ProjectDeleted {
            project_id: id,
            project_name: name,
            customer_id,
        },
        (ScopeKind::ProjectGroup, SignalKind::PostSave { created: true }) => StructureEvent::ProjectGroupCreated {
            project_group_id: id,
            project_group_name: name,
            customer_id,
        },
        (ScopeKind::ProjectGroup, SignalKind::PostSave { created: false }) => StructureEvent::ProjectGroupUpdated {
            project_group_id: id,
            project_group_name: name,
            customer_id,
        },
        (ScopeKind::ProjectGroup, SignalKind::PreDelete) => StructureEvent::ProjectGroupDeleted {
            project_group_id: id,
            project_group_name: name,
            customer_id,
        },
        _ => return None,
    };
    Some(event)
}

async fn log_lifecycle(ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
    let event = {
        let structure = ctx.structure.read().await;
        let (kind, name, customer_id) = describe(&structure, signal.sender, signal.instance_id)?;
        lifecycle_event(kind, signal.instance_id, name, customer_id, &signal.kind)
    };
    if let Some(event) = event {
        ctx.emit(attributed(event.to_event(), signal)).await;
    }
    Ok(())
}

struct LogSaved;

#[async_trait]
impl SignalHandler<ConductorState> for LogSaved {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        log_lifecycle(ctx, signal).await
    }
}

struct LogDeleted;

#[async_trait]
impl SignalHandler<ConductorState> for LogDeleted {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        log_lifecycle(ctx, signal).await
    }
}

struct CreateRoleSlots;

#[async_trait]
impl SignalHandler<ConductorState> for CreateRoleSlots {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        if !matches!(signal.kind, SignalKind::PostSave { created: true }) {
            return Ok(());
        }
        let kind = match signal.sender {
            ResourceType::Customer => ScopeKind::Customer,
            ResourceType::Project => ScopeKind::Project,
            _ => ScopeKind::ProjectGroup,
        };
        ctx.structure
            .write()
            .await
            .ensure_role_slots(kind, signal.instance_id);
        Ok(())
    }
}

struct PreventCustomerDeletion;

#[async_trait]
impl SignalHandler<ConductorState> for PreventCustomerDeletion {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let structure = ctx.structure.read().await;
        structure.customer(signal.instance_id)?;
        if !structure.projects_of_customer(signal.instance_id).is_empty() {
            warn!(customer_id = %signal.instance_id, "Customer deletion vetoed");
            return Err(SignalError::Structure(StructureError::Conflict(
                "Cannot delete customer with existing projects".to_string(),
            )));
        }
        Ok(())
    }
}

struct PreventProjectGroupDeletion;

#[async_trait]
impl SignalHandler<ConductorState> for PreventProjectGroupDeletion {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let structure = ctx.structure.read().await;
        if let Err(e) = structure.ensure_project_group_empty(signal.instance_id) {
            warn!(project_group_id = %signal.instance_id, "Project group deletion vetoed");
            return Err(e.into());
        }
        Ok(())
    }
}

struct RevokeRolesOnProjectDeletion;

#[async_trait]
impl SignalHandler<ConductorState> for RevokeRolesOnProjectDeletion {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let events = {
            let mut structure = ctx.structure.write().await;
            let project = structure.project(signal.instance_id)?.clone();
            let revoked = structure.revoke_project_roles(project.id);
            if !revoked.is_empty() {
                structure.sync_customer_user_count(project.customer_id, Utc::now())?;
            }
            revoked
                .into_iter()
                .map(|grant| StructureEvent::RoleRevoked {
                    scope_kind: ScopeKind::Project,
                    scope_id: project.id,
                    scope_name: project.name.clone(),
                    customer_id: project.customer_id,
                    affected_user_id: grant.user_id,
                    affected_username: structure
                        .user(grant.user_id)
                        .map(|u| u.username.clone())
                        .unwrap_or_default(),
                    role: conductor_structure::RoleType::Project(grant.role),
                })
                .collect::<Vec<_>>()
        };
        for event in events {
            ctx.emit(attributed(event.to_event(), signal)).await;
        }
        Ok(())
    }
}

struct SyncUserCount;

#[async_trait]
impl SignalHandler<ConductorState> for SyncUserCount {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let mut structure = ctx.structure.write().await;
        let (_, _, customer_id) = describe(&structure, signal.sender, signal.instance_id)?;
        let count = structure.sync_customer_user_count(customer_id, Utc::now())?;
        debug!(customer_id = %customer_id, count, "Customer user count synchronized");
        Ok(())
    }
}

struct LogRoleChange;

#[async_trait]
impl SignalHandler<ConductorState> for LogRoleChange {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let event = {
            let structure = ctx.structure.read().await;
            let (scope_kind, scope_name, customer_id) =
                describe(&structure, signal.sender, signal.instance_id)?;
            let (granted, user_id, role) = match signal.kind {
                SignalKind::RoleGranted { user_id, role } => (true, user_id, role),
                SignalKind::RoleRevoked { user_id, role } => (false, user_id, role),
                _ => return Ok(()),
            };
            let affected_username = structure.user(user_id)?.username.clone();
            if granted {
                StructureEvent::RoleGranted {
                    scope_kind,
                    scope_id: signal.instance_id,
                    scope_name,
                    customer_id,
                    affected_user_id: user_id,
                    affected_username,
                    role,
                }
            } else {
                StructureEvent::RoleRevoked {
                    scope_kind,
                    scope_id: signal.instance_id,
                    scope_name,
                    customer_id,
                    affected_user_id: user_id,
                    affected_username,
                    role,
                }
            }
        };
        ctx.emit(attributed(event.to_event(), signal)).await;
        Ok(())
    }
}

struct LogAccountBalance;

#[async_trait]
impl SignalHandler<ConductorState> for LogAccountBalance {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let event = {
            let structure = ctx.structure.read().await;
            let customer = structure.customer(signal.instance_id)?;
            let customer_id = customer.id;
            let customer_name = customer.name.clone();
            let balance = customer.balance;
            match signal.kind {
                SignalKind::AccountCredited { amount } => StructureEvent::AccountCredited {
                    customer_id,
                    customer_name,
                    amount,
                    balance,
                },
                SignalKind::AccountDebited { amount } => StructureEvent::AccountDebited {
                    customer_id,
                    customer_name,
                    amount,
                    balance,
                },
                _ => return Ok(()),
            }
        };
        ctx.emit(attributed(event.to_event(), signal)).await;
        Ok(())
    }
}
