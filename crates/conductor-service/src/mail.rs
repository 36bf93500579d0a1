//! Invitation mail
//!
//! [`Mailer`] is the seam to the mail transport. [`send_invitation`] renders
//! the invitation context and records delivery failures on the invitation.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_structure::{Invitation, InvitationTarget, ProjectRole, Structure, StructureError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ConductorConfig;

/// Mail errors.
#[derive(Debug, Error)]
pub enum MailError {
    /// The transport refused the message.
    #[error("Failed to send mail to {recipient}: {message}")]
    Delivery {
        /// Recipient address
        recipient: String,
        /// Transport error
        message: String,
    },

    /// The invitation could not be rendered.
    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// Outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
}

/// Mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Mailer keeping messages in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    outbox: Arc<Mutex<Vec<MailMessage>>>,
}

impl MemoryMailer {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub async fn sent(&self) -> Vec<MailMessage> {
        self.outbox.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        self.outbox.lock().await.push(message);
        Ok(())
    }
}

/// Values an invitation mail is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationMail {
    /// "project" or "organization"
    #[serde(rename = "type")]
    pub kind: String,
    /// Project or customer name
    pub name: String,
    /// Offered role as shown to the invitee
    pub role: String,
    /// Name of the inviting user
    pub sender: String,
    /// Acceptance link
    pub link: String,
}

impl InvitationMail {
    /// Build the context of an invitation.
    pub fn build(invitation: &Invitation, sender: &str, structure: &Structure) -> Result<Self, MailError> {
        let (kind, name, role) = match invitation.target {
            InvitationTarget::Project { project_id, role } => {
                let role = match role {
                    ProjectRole::Manager => "project Manager",
                    ProjectRole::Administrator => "system Administrator",
                };
                ("project", structure.project(project_id)?.name.clone(), role)
            }
            InvitationTarget::Customer { role } => (
                "organization",
                structure.customer(invitation.customer_id)?.name.clone(),
                role.display_name(),
            ),
        };
        Ok(Self {
            kind: kind.to_string(),
            name,
            role: role.to_string(),
            sender: sender.to_string(),
            link: invitation.link(),
        })
    }

    /// Subject line.
    pub fn subject(&self) -> String {
        format!("Invitation to {} {}", self.name, self.kind)
    }

    /// Plain text body.
    pub fn body(&self) -> String {
        format!(
            "Hello!\n\n{} has invited you to join {} {} in {} role.\n\
             Please visit the link below to accept the invitation:\n\n{}\n",
            self.sender, self.name, self.kind, self.role, self.link
        )
    }
}

/// Send the mail of a stored invitation.
///
/// The message is rendered under a read lock; no lock is held while the
/// mailer runs. A delivery failure is stored as the invitation's
/// `error_message` and returned.
pub async fn send_invitation(
    invitation_id: Uuid,
    sender: &str,
    structure: &RwLock<Structure>,
    mailer: &dyn Mailer,
    config: &ConductorConfig,
) -> Result<(), MailError> {
    let message = {
        let structure = structure.read().await;
        let invitation = structure.invitation(invitation_id)?;
        let context = InvitationMail::build(invitation, sender, &structure)?;
        debug!(
            "About to send invitation to {} to join {} {} as {}",
            invitation.email, context.name, context.kind, context.role
        );
        MailMessage {
            from: config.default_from_email.clone(),
            to: invitation.email.clone(),
            subject: context.subject(),
            body: context.body(),
        }
    };

    if let Err(e) = mailer.send(message).await {
        warn!(invitation_id = %invitation_id, error = %e, "Invitation delivery failed");
        structure
            .write()
            .await
            .set_invitation_error(invitation_id, e.to_string())?;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_structure::{Customer, CustomerRole, Project, User};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, message: MailMessage) -> Result<(), MailError> {
            Err(MailError::Delivery {
                recipient: message.to,
                message: "connection refused".to_string(),
            })
        }
    }

    struct Fixture {
        structure: Structure,
        staff: Uuid,
        customer: Uuid,
        project: Uuid,
    }

    fn fixture() -> Fixture {
        let mut structure = Structure::new();
        let staff = structure
            .add_user_account(User::new("staff", "staff@example.com").staff())
            .unwrap();
        let customer = structure.create_customer(staff, Customer::new("Acme")).unwrap().id;
        let project = structure
            .create_project(staff, Project::new(customer, "Web"))
            .unwrap()
            .id;
        Fixture {
            structure,
            staff,
            customer,
            project,
        }
    }

    #[test]
    fn test_project_context() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.staff,
                Invitation::for_project(
                    f.customer,
                    f.project,
                    ProjectRole::Manager,
                    "new@example.com",
                    "https://example.com/invitation/{uuid}/",
                ),
            )
            .unwrap();

        let context = InvitationMail::build(&invitation, "Alice", &f.structure).unwrap();
        assert_eq!(context.kind, "project");
        assert_eq!(context.name, "Web");
        assert_eq!(context.role, "project Manager");
        assert_eq!(
            context.link,
            format!("https://example.com/invitation/{}/", invitation.id.simple())
        );
        assert_eq!(context.subject(), "Invitation to Web project");
    }

    #[test]
    fn test_customer_context() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.staff,
                Invitation::for_customer(f.customer, CustomerRole::Owner, "new@example.com", "{uuid}"),
            )
            .unwrap();

        let context = InvitationMail::build(&invitation, "Alice", &f.structure).unwrap();
        assert_eq!(context.kind, "organization");
        assert_eq!(context.name, "Acme");
        assert_eq!(context.role, "Owner");
    }

    #[tokio::test]
    async fn test_send_invitation() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.staff,
                Invitation::for_project(
                    f.customer,
                    f.project,
                    ProjectRole::Administrator,
                    "new@example.com",
                    "{uuid}",
                ),
            )
            .unwrap();
        let mailer = MemoryMailer::new();
        let config = ConductorConfig::default();
        let structure = RwLock::new(f.structure);

        send_invitation(invitation.id, "Alice", &structure, &mailer, &config)
            .await
            .unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "new@example.com");
        assert_eq!(sent[0].from, config.default_from_email);
        assert!(sent[0].body.contains("system Administrator"));
    }

    #[tokio::test]
    async fn test_failure_is_stored() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.staff,
                Invitation::for_customer(f.customer, CustomerRole::Owner, "new@example.com", "{uuid}"),
            )
            .unwrap();

        let structure = RwLock::new(f.structure);
        let err = send_invitation(
            invitation.id,
            "Alice",
            &structure,
            &FailingMailer,
            &ConductorConfig::default(),
        )
        .await
        .unwrap_err();

        let structure = structure.read().await;
        let stored = structure.invitation(invitation.id).unwrap();
        assert_eq!(stored.error_message, err.to_string());
        assert!(stored.error_message.contains("connection refused"));
    }

    /// Records whether the registry could be written while delivering.
    struct LockCheckingMailer {
        structure: Arc<RwLock<Structure>>,
        writable: AtomicBool,
    }

    #[async_trait]
    impl Mailer for LockCheckingMailer {
        async fn send(&self, _message: MailMessage) -> Result<(), MailError> {
            self.writable
                .store(self.structure.try_write().is_ok(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registry_is_unlocked_during_delivery() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.staff,
                Invitation::for_customer(f.customer, CustomerRole::Owner, "new@example.com", "{uuid}"),
            )
            .unwrap();
        let structure = Arc::new(RwLock::new(f.structure));
        let mailer = LockCheckingMailer {
            structure: structure.clone(),
            writable: AtomicBool::new(false),
        };

        send_invitation(invitation.id, "Alice", &structure, &mailer, &ConductorConfig::default())
            .await
            .unwrap();
        assert!(mailer.writable.load(Ordering::SeqCst));
    }
}
