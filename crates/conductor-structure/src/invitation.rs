//! Invitations
//!
//! An invitation offers a customer or project role to an email address for a
//! limited time. The state only moves forward:
//!
//! ```text
//! Pending ──accept──→ Accepted
//!    └─────expire──→ Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StructureError, StructureResult};
use crate::roles::{CustomerRole, ProjectRole, RoleType};

/// Invitation lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvitationState {
    /// Waiting for the invitee
    Pending,
    /// Accepted by the invitee, role granted
    Accepted,
    /// Lifetime elapsed before acceptance
    Expired,
}

impl InvitationState {
    /// Get string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Expired => "expired",
        }
    }
}

/// Role offered by an invitation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvitationTarget {
    /// Role on the customer itself
    Customer {
        /// Offered role
        role: CustomerRole,
    },
    /// Role on one project of the customer
    Project {
        /// Target project
        project_id: Uuid,
        /// Offered role
        role: ProjectRole,
    },
}

impl InvitationTarget {
    /// Offered role with its scope level.
    pub fn role_type(&self) -> RoleType {
        match self {
            InvitationTarget::Customer { role } => RoleType::Customer(*role),
            InvitationTarget::Project { role, .. } => RoleType::Project(*role),
        }
    }
}

/// Time-limited offer of a role grant to an email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    /// Unique invitation ID
    pub id: Uuid,

    /// Customer the invitation belongs to
    pub customer_id: Uuid,

    /// Offered role
    pub target: InvitationTarget,

    /// Invitee email
    pub email: String,

    /// Acceptance link with a `{uuid}` placeholder
    pub link_template: String,

    /// Inviting user
    pub created_by: Option<Uuid>,

    /// When the invitation was created
    pub created_at: DateTime<Utc>,

    /// Lifecycle state
    pub state: InvitationState,

    /// Last delivery failure
    #[serde(default)]
    pub error_message: String,
}

impl Invitation {
    /// Invitation to a customer role.
    pub fn for_customer(
        customer_id: Uuid,
        role: CustomerRole,
        email: impl Into<String>,
        link_template: impl Into<String>,
    ) -> Self {
        Self::new(customer_id, InvitationTarget::Customer { role }, email, link_template)
    }

    /// Invitation to a project role.
    pub fn for_project(
        customer_id: Uuid,
        project_id: Uuid,
        role: ProjectRole,
        email: impl Into<String>,
        link_template: impl Into<String>,
    ) -> Self {
        Self::new(
            customer_id,
            InvitationTarget::Project { project_id, role },
            email,
            link_template,
        )
    }

    fn new(
        customer_id: Uuid,
        target: InvitationTarget,
        email: impl Into<String>,
        link_template: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            customer_id,
            target,
            email: email.into(),
            link_template: link_template.into(),
            created_by: None,
            created_at: Utc::now(),
            state: InvitationState::Pending,
            error_message: String::new(),
        }
    }

    /// Record the inviting user.
    pub fn with_created_by(mut self, user_id: Uuid) -> Self {
        self.created_by = Some(user_id);
        self
    }

    /// Link sent to the invitee.
    pub fn link(&self) -> String {
        self.link_template
            .replace("{uuid}", &self.id.simple().to_string())
    }

    /// Whether a pending invitation outlived `lifetime` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        self.state == InvitationState::Pending && self.created_at <= now - lifetime
    }

    /// Mark the invitation accepted.
    ///
    /// # Errors
    ///
    /// `StructureError::Conflict` unless the invitation is pending.
    pub fn accept(&mut self) -> StructureResult<()> {
        self.transition(InvitationState::Accepted)
    }

    /// Mark the invitation expired.
    ///
    /// # Errors
    ///
    /// `StructureError::Conflict` unless the invitation is pending.
    pub fn expire(&mut self) -> StructureResult<()> {
        self.transition(InvitationState::Expired)
    }

    fn transition(&mut self, target: InvitationState) -> StructureResult<()> {
        if self.state != InvitationState::Pending {
            return Err(StructureError::Conflict(format!(
                "Invitation is {} and cannot become {}.",
                self.state.as_str(),
                target.as_str()
            )));
        }
        self.state = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation() -> Invitation {
        Invitation::for_customer(
            Uuid::now_v7(),
            CustomerRole::Owner,
            "new@example.com",
            "https://example.com/invitation/{uuid}/",
        )
    }

    #[test]
    fn test_states_never_revert() {
        let mut accepted = invitation();
        accepted.accept().unwrap();
        assert!(accepted.expire().is_err());
        assert!(accepted.accept().is_err());
        assert_eq!(accepted.state, InvitationState::Accepted);

        let mut expired = invitation();
        expired.expire().unwrap();
        assert!(expired.accept().is_err());
        assert_eq!(expired.state, InvitationState::Expired);
    }

    #[test]
    fn test_is_expired() {
        let inv = invitation();
        let lifetime = Duration::days(7);
        assert!(!inv.is_expired(inv.created_at + Duration::days(6), lifetime));
        assert!(inv.is_expired(inv.created_at + Duration::days(7), lifetime));
    }

    #[test]
    fn test_link() {
        let inv = invitation();
        assert_eq!(
            inv.link(),
            format!("https://example.com/invitation/{}/", inv.id.simple())
        );
    }

    #[test]
    fn test_target_role_type() {
        let project_id = Uuid::now_v7();
        let inv = Invitation::for_project(
            Uuid::now_v7(),
            project_id,
            ProjectRole::Manager,
            "pm@example.com",
            "{uuid}",
        );
        assert_eq!(inv.target.role_type(), RoleType::Project(ProjectRole::Manager));
    }
}
