//! SSH key receivers

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conductor_events::{Signal, SignalHandler, SignalKind, SignalName, SignalResult, UserEvent};
use conductor_rbac::{ResourceType, UserScope};
use tracing::{info, warn};
use uuid::Uuid;

use super::{attributed, Route};
use crate::conductor::ConductorState;

pub(super) fn routes() -> Vec<Route> {
    let log_ssh_key: Arc<LogSshKey> = Arc::new(LogSshKey);
    vec![
        Route::new(
            "users.log_ssh_key_created",
            SignalName::PostSave,
            &[ResourceType::SshKey],
            log_ssh_key.clone(),
        ),
        Route::new(
            "users.log_ssh_key_deleted",
            SignalName::PreDelete,
            &[ResourceType::SshKey],
            log_ssh_key,
        ),
        Route::new(
            "users.propagate_ssh_key",
            SignalName::PostSave,
            &[ResourceType::SshKey],
            Arc::new(PropagateSshKey),
        ),
    ]
}

struct LogSshKey;

#[async_trait]
impl SignalHandler<ConductorState> for LogSshKey {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let event = {
            let structure = ctx.structure.read().await;
            let key = structure.ssh_key(signal.instance_id)?;
            let username = structure.user(key.user_id)?.username.clone();
            let (key_id, key_name, user_id) = (key.id, key.name.clone(), key.user_id);
            match signal.kind {
                SignalKind::PostSave { created: true } => UserEvent::SshKeyCreated {
                    key_id,
                    key_name,
                    user_id,
                    username,
                },
                SignalKind::PreDelete => UserEvent::SshKeyDeleted {
                    key_id,
                    key_name,
                    user_id,
                    username,
                },
                _ => return Ok(()),
            }
        };
        ctx.emit(attributed(event.to_event(), signal)).await;
        Ok(())
    }
}

/// Push a new key to every in-sync membership its owner can see.
struct PropagateSshKey;

#[async_trait]
impl SignalHandler<ConductorState> for PropagateSshKey {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        if !matches!(signal.kind, SignalKind::PostSave { created: true }) {
            return Ok(());
        }
        let (record, memberships): (_, Vec<Uuid>) = {
            let structure = ctx.structure.read().await;
            let key = structure.ssh_key(signal.instance_id)?;
            let scope = UserScope::for_user(&structure, key.user_id, Utc::now())?;
            let inventory = ctx.inventory.read().await;
            let memberships = inventory
                .in_sync_memberships_visible_to(&structure, &scope)
                .into_iter()
                .map(|m| m.id)
                .collect();
            (key.to_record(), memberships)
        };

        for membership_id in &memberships {
            if let Err(e) = ctx.backend.push_ssh_public_key(*membership_id, &record).await {
                warn!(
                    membership_id = %membership_id,
                    key_fingerprint = %record.fingerprint,
                    error = %e,
                    "Failed to push SSH public key"
                );
            }
        }
        info!(key_id = %signal.instance_id, memberships = memberships.len(), "SSH public key propagated");
        Ok(())
    }
}
