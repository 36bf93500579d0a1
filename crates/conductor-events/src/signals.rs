//! # Signals
//!
//! In-process signal dispatch. Mutating operations send a [`Signal`] after (or,
//! for pre-delete, before) changing state; connected receivers react in the
//! order they were connected.
//!
//! ## Architecture
//!
//! ```text
//! operation ──send(ctx, signal)──→ SignalDispatcher
//!                                      │ filter by sender + kind
//!                                      ├──→ receiver 1 (awaited)
//!                                      ├──→ receiver 2 (awaited)
//!                                      └──→ ...  first error aborts
//! ```
//!
//! Unlike the event bus, dispatch is synchronous from the caller's point of
//! view: `send` returns once every receiver has finished, and a failing
//! pre-delete receiver vetoes the deletion.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_rbac::ResourceType;
use conductor_structure::{RoleType, StructureError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Signal dispatch errors.
#[derive(Debug, Error)]
pub enum SignalError {
    /// A receiver rejected the change
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// A receiver failed
    #[error("Receiver {receiver} failed: {message}")]
    Receiver {
        /// dispatch_uid of the failing receiver
        receiver: String,
        /// Failure description
        message: String,
    },
}

impl SignalError {
    /// Build a receiver failure.
    pub fn receiver(receiver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Receiver {
            receiver: receiver.into(),
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SignalError::Structure(e) => e.status_code(),
            SignalError::Receiver { .. } => 500,
        }
    }
}

/// Result type for signal dispatch.
pub type SignalResult<T> = Result<T, SignalError>;

/// What happened to the sending instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    /// Instance was saved
    PostSave { created: bool },
    /// Instance is about to be deleted
    PreDelete,
    /// Instance was deleted
    PostDelete,
    /// State machine transition completed
    PostTransition {
        from: String,
        to: String,
        transition: String,
    },
    /// A user gained a role on the instance
    RoleGranted { user_id: Uuid, role: RoleType },
    /// A user lost a role on the instance
    RoleRevoked { user_id: Uuid, role: RoleType },
    /// Customer balance increased
    AccountCredited { amount: f64 },
    /// Customer balance decreased
    AccountDebited { amount: f64 },
    /// Instance was imported from a backend
    ResourceImported,
}

/// Signal kind without its data, used to filter receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalName {
    PostSave,
    PreDelete,
    PostDelete,
    PostTransition,
    RoleGranted,
    RoleRevoked,
    AccountCredited,
    AccountDebited,
    ResourceImported,
}

impl SignalName {
    /// Get the string representation of the signal name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalName::PostSave => "post_save",
            SignalName::PreDelete => "pre_delete",
            SignalName::PostDelete => "post_delete",
            SignalName::PostTransition => "post_transition",
            SignalName::RoleGranted => "structure_role_granted",
            SignalName::RoleRevoked => "structure_role_revoked",
            SignalName::AccountCredited => "customer_account_credited",
            SignalName::AccountDebited => "customer_account_debited",
            SignalName::ResourceImported => "resource_imported",
        }
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SignalKind {
    /// Name of the signal kind.
    pub fn name(&self) -> SignalName {
        match self {
            SignalKind::PostSave { .. } => SignalName::PostSave,
            SignalKind::PreDelete => SignalName::PreDelete,
            SignalKind::PostDelete => SignalName::PostDelete,
            SignalKind::PostTransition { .. } => SignalName::PostTransition,
            SignalKind::RoleGranted { .. } => SignalName::RoleGranted,
            SignalKind::RoleRevoked { .. } => SignalName::RoleRevoked,
            SignalKind::AccountCredited { .. } => SignalName::AccountCredited,
            SignalKind::AccountDebited { .. } => SignalName::AccountDebited,
            SignalKind::ResourceImported => SignalName::ResourceImported,
        }
    }
}

/// A signal sent by a mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// What happened
    pub kind: SignalKind,
    /// Type of the instance the signal is about
    pub sender: ResourceType,
    /// ID of that instance
    pub instance_id: Uuid,
    /// User who performed the operation
    pub actor: Option<Uuid>,
    /// When the signal was sent
    pub sent_at: DateTime<Utc>,
}

impl Signal {
    /// Create a new signal.
    pub fn new(kind: SignalKind, sender: ResourceType, instance_id: Uuid) -> Self {
        Self {
            kind,
            sender,
            instance_id,
            actor: None,
            sent_at: Utc::now(),
        }
    }

    /// Set the acting user.
    pub fn with_actor(mut self, actor: Option<Uuid>) -> Self {
        self.actor = actor;
        self
    }

    /// Shorthand for a post-save signal.
    pub fn saved(sender: ResourceType, instance_id: Uuid, created: bool) -> Self {
        Self::new(SignalKind::PostSave { created }, sender, instance_id)
    }

    /// Shorthand for a pre-delete signal.
    pub fn deleting(sender: ResourceType, instance_id: Uuid) -> Self {
        Self::new(SignalKind::PreDelete, sender, instance_id)
    }

    /// Shorthand for a post-delete signal.
    pub fn deleted(sender: ResourceType, instance_id: Uuid) -> Self {
        Self::new(SignalKind::PostDelete, sender, instance_id)
    }

    /// Shorthand for a post-transition signal.
    pub fn transitioned(
        sender: ResourceType,
        instance_id: Uuid,
        from: impl Into<String>,
        to: impl Into<String>,
        transition: impl Into<String>,
    ) -> Self {
        Self::new(
            SignalKind::PostTransition {
                from: from.into(),
                to: to.into(),
                transition: transition.into(),
            },
            sender,
            instance_id,
        )
    }
}

/// Reaction to a signal.
#[async_trait]
pub trait SignalHandler<C: Send + Sync>: Send + Sync {
    /// Handle a signal with the dispatcher's context.
    async fn handle(&self, ctx: &C, signal: &Signal) -> SignalResult<()>;
}

/// A connected handler together with its filters.
pub struct Receiver<C: Send + Sync> {
    dispatch_uid: String,
    signal: SignalName,
    senders: Vec<ResourceType>,
    handler: Arc<dyn SignalHandler<C>>,
}

impl<C: Send + Sync> Receiver<C> {
    /// Create a receiver for one signal kind from any sender.
    pub fn new(
        dispatch_uid: impl Into<String>,
        signal: SignalName,
        handler: Arc<dyn SignalHandler<C>>,
    ) -> Self {
        Self {
            dispatch_uid: dispatch_uid.into(),
            signal,
            senders: Vec::new(),
            handler,
        }
    }

    /// Only accept signals from this sender. May be called repeatedly.
    pub fn from_sender(mut self, sender: ResourceType) -> Self {
        self.senders.push(sender);
        self
    }

    /// Unique ID of the connection.
    pub fn dispatch_uid(&self) -> &str {
        &self.dispatch_uid
    }

    fn accepts(&self, signal: &Signal) -> bool {
        self.signal == signal.kind.name()
            && (self.senders.is_empty() || self.senders.contains(&signal.sender))
    }
}

impl<C: Send + Sync> fmt::Debug for Receiver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("dispatch_uid", &self.dispatch_uid)
            .field("signal", &self.signal)
            .field("senders", &self.senders)
            .finish()
    }
}

/// Ordered registry of signal receivers.
pub struct SignalDispatcher<C: Send + Sync> {
    receivers: RwLock<Vec<Receiver<C>>>,
}

impl<C: Send + Sync> SignalDispatcher<C> {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            receivers: RwLock::new(Vec::new()),
        }
    }

    /// Connect a receiver.
    ///
    /// # Returns
    ///
    /// `false` if a receiver with the same dispatch_uid is already connected
    pub async fn connect(&self, receiver: Receiver<C>) -> bool {
        let mut receivers = self.receivers.write().await;
        if receivers
            .iter()
            .any(|r| r.dispatch_uid == receiver.dispatch_uid)
        {
            tracing::debug!(dispatch_uid = %receiver.dispatch_uid, "Receiver already connected");
            return false;
        }
        receivers.push(receiver);
        true
    }

    /// Disconnect a receiver by dispatch_uid.
    pub async fn disconnect(&self, dispatch_uid: &str) -> bool {
        let mut receivers = self.receivers.write().await;
        let before = receivers.len();
        receivers.retain(|r| r.dispatch_uid != dispatch_uid);
        receivers.len() != before
    }

    /// Number of connected receivers.
    pub async fn len(&self) -> usize {
        self.receivers.read().await.len()
    }

    /// Check if no receiver is connected.
    pub async fn is_empty(&self) -> bool {
        self.receivers.read().await.is_empty()
    }

    /// Send a signal to every matching receiver, in connection order.
    ///
    /// # Returns
    ///
    /// The number of receivers that ran
    ///
    /// # Errors
    ///
    /// The first receiver error; later receivers are not run
    pub async fn send(&self, ctx: &C, signal: &Signal) -> SignalResult<usize> {
        let matching: Vec<(String, Arc<dyn SignalHandler<C>>)> = {
            let receivers = self.receivers.read().await;
            receivers
                .iter()
                .filter(|r| r.accepts(signal))
                .map(|r| (r.dispatch_uid.clone(), r.handler.clone()))
                .collect()
        };

        for (dispatch_uid, handler) in &matching {
            tracing::debug!(
                signal = %signal.kind.name(),
                sender = %signal.sender,
                instance_id = %signal.instance_id,
                receiver = %dispatch_uid,
                "Dispatching signal"
            );
            if let Err(e) = handler.handle(ctx, signal).await {
                tracing::warn!(receiver = %dispatch_uid, error = %e, "Signal receiver aborted dispatch");
                return Err(e);
            }
        }
        Ok(matching.len())
    }
}

impl<C: Send + Sync> Default for SignalDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync> fmt::Debug for SignalDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Trace {
        calls: Mutex<Vec<String>>,
    }

    struct Record(&'static str);

    #[async_trait]
    impl SignalHandler<Trace> for Record {
        async fn handle(&self, ctx: &Trace, _signal: &Signal) -> SignalResult<()> {
            ctx.calls.lock().unwrap().push(self.0.to_string());
            Ok(())
        }
    }

    struct Veto;

    #[async_trait]
    impl SignalHandler<Trace> for Veto {
        async fn handle(&self, _ctx: &Trace, _signal: &Signal) -> SignalResult<()> {
            Err(StructureError::Conflict(
                "Cannot delete project group with existing projects".to_string(),
            )
            .into())
        }
    }

    #[tokio::test]
    async fn test_receivers_run_in_connection_order() {
        let dispatcher = SignalDispatcher::new();
        for name in ["first", "second", "third"] {
            dispatcher
                .connect(Receiver::new(name, SignalName::PostSave, Arc::new(Record(name))))
                .await;
        }
        let trace = Trace::default();
        let ran = dispatcher
            .send(&trace, &Signal::saved(ResourceType::Customer, Uuid::now_v7(), true))
            .await
            .unwrap();
        assert_eq!(ran, 3);
        assert_eq!(*trace.calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_dispatch_uid_dedupes() {
        let dispatcher: SignalDispatcher<Trace> = SignalDispatcher::new();
        assert!(
            dispatcher
                .connect(Receiver::new("log", SignalName::PostSave, Arc::new(Record("a"))))
                .await
        );
        assert!(
            !dispatcher
                .connect(Receiver::new("log", SignalName::PostSave, Arc::new(Record("b"))))
                .await
        );
        assert_eq!(dispatcher.len().await, 1);
        assert!(dispatcher.disconnect("log").await);
        assert!(dispatcher.is_empty().await);
    }

    #[tokio::test]
    async fn test_sender_and_kind_filters() {
        let dispatcher = SignalDispatcher::new();
        dispatcher
            .connect(
                Receiver::new("project_saved", SignalName::PostSave, Arc::new(Record("project")))
                    .from_sender(ResourceType::Project),
            )
            .await;
        dispatcher
            .connect(Receiver::new("any_delete", SignalName::PostDelete, Arc::new(Record("delete"))))
            .await;

        let trace = Trace::default();
        let id = Uuid::now_v7();
        assert_eq!(
            dispatcher
                .send(&trace, &Signal::saved(ResourceType::Customer, id, true))
                .await
                .unwrap(),
            0
        );
        dispatcher
            .send(&trace, &Signal::saved(ResourceType::Project, id, false))
            .await
            .unwrap();
        dispatcher
            .send(&trace, &Signal::deleted(ResourceType::Instance, id))
            .await
            .unwrap();
        assert_eq!(*trace.calls.lock().unwrap(), vec!["project", "delete"]);
    }

    #[tokio::test]
    async fn test_first_error_aborts() {
        let dispatcher = SignalDispatcher::new();
        dispatcher
            .connect(Receiver::new("veto", SignalName::PreDelete, Arc::new(Veto)))
            .await;
        dispatcher
            .connect(Receiver::new("after", SignalName::PreDelete, Arc::new(Record("after"))))
            .await;

        let trace = Trace::default();
        let err = dispatcher
            .send(&trace, &Signal::deleting(ResourceType::ProjectGroup, Uuid::now_v7()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.to_string(), "Cannot delete project group with existing projects");
        assert!(trace.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_signal_names() {
        let signal = Signal::transitioned(ResourceType::Instance, Uuid::now_v7(), "starting", "online", "set_online");
        assert_eq!(signal.kind.name(), SignalName::PostTransition);
        assert_eq!(SignalName::RoleGranted.to_string(), "structure_role_granted");
    }
}
