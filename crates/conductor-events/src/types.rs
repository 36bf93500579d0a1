//! Event types for the audit log
//!
//! This module defines the event envelope and the typed events emitted by
//! each Conductor module. Every typed event renders the human message shown
//! in the audit log.

use chrono::{DateTime, Utc};
use conductor_rbac::{Module, ResourceType};
use conductor_structure::{RoleType, ScopeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Importance of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    /// Diagnostic noise
    Debug,
    /// Regular state change
    Info,
    /// Something worth a look
    Warning,
    /// A failed operation
    Error,
}

impl EventLevel {
    /// Get the string representation of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
        }
    }
}

impl Default for EventLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// The object an event or alert is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventScope {
    /// Resource type of the object
    pub resource_type: ResourceType,
    /// Object ID
    pub id: Uuid,
}

impl EventScope {
    /// Create a new scope reference.
    pub fn new(resource_type: ResourceType, id: Uuid) -> Self {
        Self { resource_type, id }
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id.simple())
    }
}

/// Audit event envelope.
///
/// All events are wrapped in this envelope which carries the hierarchy
/// context used for permission filtering and the rendered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Event type (e.g., "customer_creation_succeeded")
    pub event_type: String,

    /// Emitting module
    pub source: Module,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Importance
    #[serde(default)]
    pub level: EventLevel,

    /// Rendered human-readable message
    pub message: String,

    /// Customer context
    pub customer_id: Option<Uuid>,

    /// Project context
    pub project_id: Option<Uuid>,

    /// Project group context
    pub project_group_id: Option<Uuid>,

    /// User who triggered the event
    pub user_id: Option<Uuid>,

    /// Username of the affected or acting user
    pub user_username: Option<String>,

    /// Object the event is about
    pub scope: Option<EventScope>,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// Event version for schema evolution
    pub version: u32,

    /// Event payload
    pub payload: serde_json::Value,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create a new event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The event type string
    /// * `source` - The emitting module
    /// * `message` - Rendered message
    /// * `payload` - The event payload
    pub fn new(
        event_type: impl Into<String>,
        source: Module,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            source,
            timestamp: Utc::now(),
            level: EventLevel::Info,
            message: message.into(),
            customer_id: None,
            project_id: None,
            project_group_id: None,
            user_id: None,
            user_username: None,
            scope: None,
            correlation_id: None,
            version: 1,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Set the level.
    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    /// Set customer context.
    pub fn with_customer(mut self, customer_id: Uuid) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    /// Set project context.
    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Set project group context.
    pub fn with_project_group(mut self, project_group_id: Uuid) -> Self {
        self.project_group_id = Some(project_group_id);
        self
    }

    /// Set the acting user.
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set the username shown with the event.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.user_username = Some(username.into());
        self
    }

    /// Set the object the event is about.
    pub fn with_scope(mut self, resource_type: ResourceType, id: Uuid) -> Self {
        self.scope = Some(EventScope::new(resource_type, id));
        self
    }

    /// Set correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `{module}.{event_type}`
    pub fn topic(&self) -> String {
        format!("{}.{}", self.source.as_str(), self.event_type)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

fn payload_of<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn scope_word(kind: ScopeKind) -> &'static str {
    match kind {
        ScopeKind::Customer => "customer",
        ScopeKind::Project => "project",
        ScopeKind::ProjectGroup => "project group",
    }
}

fn resource_title(resource_type: ResourceType) -> String {
    let words = resource_type.as_str().replace('_', " ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => words,
    }
}

// ============================================================================
// Structure Events
// ============================================================================

/// Customer, project, project group and role events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructureEvent {
    /// Customer was created
    CustomerCreated { customer_id: Uuid, customer_name: String },
    /// Customer was updated
    CustomerUpdated { customer_id: Uuid, customer_name: String },
    /// Customer was deleted
    CustomerDeleted { customer_id: Uuid, customer_name: String },
    /// Project was created
    ProjectCreated {
        project_id: Uuid,
        project_name: String,
        customer_id: Uuid,
    },
    /// Project was updated
    ProjectUpdated {
        project_id: Uuid,
        project_name: String,
        customer_id: Uuid,
    },
    /// Project was deleted
    ProjectDeleted {
        project_id: Uuid,
        project_name: String,
        customer_id: Uuid,
    },
    /// Project group was created
    ProjectGroupCreated {
        project_group_id: Uuid,
        project_group_name: String,
        customer_id: Uuid,
    },
    /// Project group was updated
    ProjectGroupUpdated {
        project_group_id: Uuid,
        project_group_name: String,
        customer_id: Uuid,
    },
    /// Project group was deleted
    ProjectGroupDeleted {
        project_group_id: Uuid,
        project_group_name: String,
        customer_id: Uuid,
    },
    /// A user gained a role
    RoleGranted {
        scope_kind: ScopeKind,
        scope_id: Uuid,
        scope_name: String,
        customer_id: Uuid,
        affected_user_id: Uuid,
        affected_username: String,
        role: RoleType,
    },
    /// A user lost a role
    RoleRevoked {
        scope_kind: ScopeKind,
        scope_id: Uuid,
        scope_name: String,
        customer_id: Uuid,
        affected_user_id: Uuid,
        affected_username: String,
        role: RoleType,
    },
    /// Customer balance increased
    AccountCredited {
        customer_id: Uuid,
        customer_name: String,
        amount: f64,
        balance: f64,
    },
    /// Customer balance decreased
    AccountDebited {
        customer_id: Uuid,
        customer_name: String,
        amount: f64,
        balance: f64,
    },
}

impl StructureEvent {
    /// Get the event type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            StructureEvent::CustomerCreated { .. } => "customer_creation_succeeded",
            StructureEvent::CustomerUpdated { .. } => "customer_update_succeeded",
            StructureEvent::CustomerDeleted { .. } => "customer_deletion_succeeded",
            StructureEvent::ProjectCreated { .. } => "project_creation_succeeded",
            StructureEvent::ProjectUpdated { .. } => "project_update_succeeded",
            StructureEvent::ProjectDeleted { .. } => "project_deletion_succeeded",
            StructureEvent::ProjectGroupCreated { .. } => "project_group_creation_succeeded",
            StructureEvent::ProjectGroupUpdated { .. } => "project_group_update_succeeded",
            StructureEvent::ProjectGroupDeleted { .. } => "project_group_deletion_succeeded",
            StructureEvent::RoleGranted { .. } => "role_granted",
            StructureEvent::RoleRevoked { .. } => "role_revoked",
            StructureEvent::AccountCredited { .. } => "customer_account_credited",
            StructureEvent::AccountDebited { .. } => "customer_account_debited",
        }
    }

    /// Render the audit message.
    pub fn message(&self) -> String {
        match self {
            StructureEvent::CustomerCreated { customer_name, .. } => {
                format!("Customer {} has been created.", customer_name)
            }
            StructureEvent::CustomerUpdated { customer_name, .. } => {
                format!("Customer {} has been updated.", customer_name)
            }
            StructureEvent::CustomerDeleted { customer_name, .. } => {
                format!("Customer {} has been deleted.", customer_name)
            }
            StructureEvent::ProjectCreated { project_name, .. } => {
                format!("Project {} has been created.", project_name)
            }
            StructureEvent::ProjectUpdated { project_name, .. } => {
                format!("Project {} has been updated.", project_name)
            }
            StructureEvent::ProjectDeleted { project_name, .. } => {
                format!("Project {} has been deleted.", project_name)
            }
            StructureEvent::ProjectGroupCreated { project_group_name, .. } => {
                format!("Project group {} has been created.", project_group_name)
            }
            StructureEvent::ProjectGroupUpdated { project_group_name, .. } => {
                format!("Project group {} has been updated.", project_group_name)
            }
            StructureEvent::ProjectGroupDeleted { project_group_name, .. } => {
                format!("Project group {} has been deleted.", project_group_name)
            }
            StructureEvent::RoleGranted {
                scope_kind,
                scope_name,
                affected_username,
                role,
                ..
            } => format!(
                "User {} has gained role of {} in {} {}.",
                affected_username,
                role.display_name().to_lowercase(),
                scope_word(*scope_kind),
                scope_name
            ),
            StructureEvent::RoleRevoked {
                scope_kind,
                scope_name,
                affected_username,
                role,
                ..
            } => format!(
                "User {} has lost role of {} in {} {}.",
                affected_username,
                role.display_name().to_lowercase(),
                scope_word(*scope_kind),
                scope_name
            ),
            StructureEvent::AccountCredited {
                customer_name,
                amount,
                ..
            } => format!(
                "Balance has been increased by {:.2} for customer {}.",
                amount, customer_name
            ),
            StructureEvent::AccountDebited {
                customer_name,
                amount,
                ..
            } => format!(
                "Balance has been decreased by {:.2} for customer {}.",
                amount, customer_name
            ),
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let event = Event::new(
            self.event_type(),
            Module::Structure,
            self.message(),
            payload_of(self),
        );
        match self {
            StructureEvent::CustomerCreated { customer_id, .. }
            | StructureEvent::CustomerUpdated { customer_id, .. }
            | StructureEvent::CustomerDeleted { customer_id, .. }
            | StructureEvent::AccountCredited { customer_id, .. }
            | StructureEvent::AccountDebited { customer_id, .. } => event
                .with_customer(*customer_id)
                .with_scope(ResourceType::Customer, *customer_id),
            StructureEvent::ProjectCreated {
                project_id,
                customer_id,
                ..
            }
            | StructureEvent::ProjectUpdated {
                project_id,
                customer_id,
                ..
            }
            | StructureEvent::ProjectDeleted {
                project_id,
                customer_id,
                ..
            } => event
                .with_customer(*customer_id)
                .with_project(*project_id)
                .with_scope(ResourceType::Project, *project_id),
            StructureEvent::ProjectGroupCreated {
                project_group_id,
                customer_id,
                ..
            }
            | StructureEvent::ProjectGroupUpdated {
                project_group_id,
                customer_id,
                ..
            }
            | StructureEvent::ProjectGroupDeleted {
                project_group_id,
                customer_id,
                ..
            } => event
                .with_customer(*customer_id)
                .with_project_group(*project_group_id)
                .with_scope(ResourceType::ProjectGroup, *project_group_id),
            StructureEvent::RoleGranted {
                scope_kind,
                scope_id,
                customer_id,
                affected_username,
                ..
            }
            | StructureEvent::RoleRevoked {
                scope_kind,
                scope_id,
                customer_id,
                affected_username,
                ..
            } => {
                let event = event
                    .with_customer(*customer_id)
                    .with_username(affected_username.clone());
                match scope_kind {
                    ScopeKind::Customer => {
                        event.with_scope(ResourceType::CustomerPermission, *scope_id)
                    }
                    ScopeKind::Project => event
                        .with_project(*scope_id)
                        .with_scope(ResourceType::ProjectPermission, *scope_id),
                    ScopeKind::ProjectGroup => event
                        .with_project_group(*scope_id)
                        .with_scope(ResourceType::ProjectGroupPermission, *scope_id),
                }
            }
        }
    }
}

// ============================================================================
// User Events
// ============================================================================

/// SSH key and organization membership events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    /// SSH key was added
    SshKeyCreated {
        key_id: Uuid,
        key_name: String,
        user_id: Uuid,
        username: String,
    },
    /// SSH key was removed
    SshKeyDeleted {
        key_id: Uuid,
        key_name: String,
        user_id: Uuid,
        username: String,
    },
    /// User claimed an organization
    OrganizationClaimed {
        user_id: Uuid,
        username: String,
        organization: String,
    },
    /// Claim was approved
    OrganizationApproved {
        user_id: Uuid,
        username: String,
        organization: String,
    },
    /// Claim was rejected
    OrganizationRejected {
        user_id: Uuid,
        username: String,
        organization: String,
    },
    /// User was removed from the organization
    OrganizationRemoved {
        user_id: Uuid,
        username: String,
        organization: String,
    },
}

impl UserEvent {
    /// Get the event type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            UserEvent::SshKeyCreated { .. } => "ssh_key_creation_succeeded",
            UserEvent::SshKeyDeleted { .. } => "ssh_key_deletion_succeeded",
            UserEvent::OrganizationClaimed { .. } => "user_organization_claimed",
            UserEvent::OrganizationApproved { .. } => "user_organization_approved",
            UserEvent::OrganizationRejected { .. } => "user_organization_rejected",
            UserEvent::OrganizationRemoved { .. } => "user_organization_removed",
        }
    }

    /// Render the audit message.
    pub fn message(&self) -> String {
        match self {
            UserEvent::SshKeyCreated { key_name, .. } => {
                format!("SSH key {} has been created.", key_name)
            }
            UserEvent::SshKeyDeleted { key_name, .. } => {
                format!("SSH key {} has been deleted.", key_name)
            }
            UserEvent::OrganizationClaimed {
                username,
                organization,
                ..
            } => format!("User {} has claimed organization {}.", username, organization),
            UserEvent::OrganizationApproved {
                username,
                organization,
                ..
            } => format!(
                "User {} has been approved for organization {}.",
                username, organization
            ),
            UserEvent::OrganizationRejected {
                username,
                organization,
                ..
            } => format!(
                "User {} claim for organization {} has been rejected.",
                username, organization
            ),
            UserEvent::OrganizationRemoved {
                username,
                organization,
                ..
            } => format!(
                "User {} has been removed from organization {}.",
                username, organization
            ),
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let event = Event::new(self.event_type(), Module::Users, self.message(), payload_of(self));
        match self {
            UserEvent::SshKeyCreated {
                key_id, username, ..
            }
            | UserEvent::SshKeyDeleted {
                key_id, username, ..
            } => event
                .with_username(username.clone())
                .with_scope(ResourceType::SshKey, *key_id),
            UserEvent::OrganizationClaimed {
                user_id, username, ..
            }
            | UserEvent::OrganizationApproved {
                user_id, username, ..
            }
            | UserEvent::OrganizationRejected {
                user_id, username, ..
            }
            | UserEvent::OrganizationRemoved {
                user_id, username, ..
            } => event
                .with_username(username.clone())
                .with_scope(ResourceType::User, *user_id),
        }
    }
}

// ============================================================================
// Resource Events
// ============================================================================

/// Identity of a backend resource inside the hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRef {
    /// Resource type
    pub resource_type: ResourceType,
    /// Resource ID
    pub resource_id: Uuid,
    /// Resource name
    pub resource_name: String,
    /// Owning project
    pub project_id: Uuid,
    /// Owning customer
    pub customer_id: Uuid,
}

impl ResourceRef {
    /// Full name as shown in messages, e.g. "Instance web-1".
    pub fn full_name(&self) -> String {
        format!("{} {}", resource_title(self.resource_type), self.resource_name)
    }
}

/// Backend resource lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceEvent {
    /// Provisioning was scheduled
    CreationScheduled { resource: ResourceRef },
    /// Resource was deleted
    Deleted { resource: ResourceRef },
    /// Resource was imported from the backend
    Imported { resource: ResourceRef },
    /// A runtime action was scheduled
    ActionScheduled { resource: ResourceRef, action: String },
    /// A runtime action finished
    ActionSucceeded { resource: ResourceRef, action: String },
}

/// Runtime actions whose events are grouped under `resources`.
pub const RESOURCE_ACTIONS: &[&str] = &["start", "stop", "restart", "resize"];

fn past_tense(action: &str) -> String {
    match action {
        "stop" => "stopped".to_string(),
        a if a.ends_with('e') => format!("{}d", a),
        a => format!("{}ed", a),
    }
}

impl ResourceEvent {
    /// Get the event type string.
    pub fn event_type(&self) -> String {
        match self {
            ResourceEvent::CreationScheduled { .. } => "resource_creation_scheduled".to_string(),
            ResourceEvent::Deleted { .. } => "resource_deletion_succeeded".to_string(),
            ResourceEvent::Imported { .. } => "resource_import_succeeded".to_string(),
            ResourceEvent::ActionScheduled { action, .. } => {
                format!("resource_{}_scheduled", action)
            }
            ResourceEvent::ActionSucceeded { action, .. } => {
                format!("resource_{}_succeeded", action)
            }
        }
    }

    /// The resource the event is about.
    pub fn resource(&self) -> &ResourceRef {
        match self {
            ResourceEvent::CreationScheduled { resource }
            | ResourceEvent::Deleted { resource }
            | ResourceEvent::Imported { resource }
            | ResourceEvent::ActionScheduled { resource, .. }
            | ResourceEvent::ActionSucceeded { resource, .. } => resource,
        }
    }

    /// Render the audit message.
    pub fn message(&self) -> String {
        let name = self.resource().full_name();
        match self {
            ResourceEvent::CreationScheduled { .. } => {
                format!("{} creation has been scheduled.", name)
            }
            ResourceEvent::Deleted { .. } => format!("{} has been deleted.", name),
            ResourceEvent::Imported { .. } => format!("{} has been imported.", name),
            ResourceEvent::ActionScheduled { action, .. } => {
                format!("{} {} has been scheduled.", name, action)
            }
            ResourceEvent::ActionSucceeded { action, .. } => {
                format!("{} has been {}.", name, past_tense(action))
            }
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let resource = self.resource();
        Event::new(self.event_type(), Module::Iaas, self.message(), payload_of(self))
            .with_customer(resource.customer_id)
            .with_project(resource.project_id)
            .with_scope(resource.resource_type, resource.resource_id)
    }
}

// ============================================================================
// Billing Events
// ============================================================================

/// Invoice lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvoiceEvent {
    /// Invoice was created
    Created {
        invoice_id: Uuid,
        customer_id: Uuid,
        customer_name: String,
        invoice_date: String,
    },
    /// Invoice was updated
    Updated {
        invoice_id: Uuid,
        customer_id: Uuid,
        customer_name: String,
        invoice_date: String,
    },
    /// Invoice was deleted
    Deleted {
        invoice_id: Uuid,
        customer_id: Uuid,
        customer_name: String,
        invoice_date: String,
    },
}

impl InvoiceEvent {
    /// Get the event type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Created { .. } => "invoice_creation_succeeded",
            InvoiceEvent::Updated { .. } => "invoice_update_succeeded",
            InvoiceEvent::Deleted { .. } => "invoice_deletion_succeeded",
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let (verb, invoice_id, customer_id, customer_name, invoice_date) = match self {
            InvoiceEvent::Created {
                invoice_id,
                customer_id,
                customer_name,
                invoice_date,
            } => ("created", invoice_id, customer_id, customer_name, invoice_date),
            InvoiceEvent::Updated {
                invoice_id,
                customer_id,
                customer_name,
                invoice_date,
            } => ("updated", invoice_id, customer_id, customer_name, invoice_date),
            InvoiceEvent::Deleted {
                invoice_id,
                customer_id,
                customer_name,
                invoice_date,
            } => ("deleted", invoice_id, customer_id, customer_name, invoice_date),
        };
        let message = format!(
            "Invoice for customer {} for the period of {} has been {}.",
            customer_name, invoice_date, verb
        );
        Event::new(self.event_type(), Module::Billing, message, payload_of(self))
            .with_customer(*customer_id)
            .with_scope(ResourceType::Invoice, *invoice_id)
    }
}

// ============================================================================
// Invitation Events
// ============================================================================

/// Invitation lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvitationEvent {
    /// Invitation was created
    Created {
        invitation_id: Uuid,
        customer_id: Uuid,
        project_id: Option<Uuid>,
        email: String,
        role: RoleType,
    },
    /// Invitation was accepted
    Accepted {
        invitation_id: Uuid,
        customer_id: Uuid,
        project_id: Option<Uuid>,
        email: String,
        username: String,
    },
    /// Invitation lifetime ran out
    Expired {
        invitation_id: Uuid,
        customer_id: Uuid,
        project_id: Option<Uuid>,
        email: String,
    },
    /// Invitation email could not be delivered
    SendFailed {
        invitation_id: Uuid,
        customer_id: Uuid,
        project_id: Option<Uuid>,
        email: String,
        error: String,
    },
}

impl InvitationEvent {
    /// Get the event type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            InvitationEvent::Created { .. } => "invitation_created",
            InvitationEvent::Accepted { .. } => "invitation_accepted",
            InvitationEvent::Expired { .. } => "invitation_expired",
            InvitationEvent::SendFailed { .. } => "invitation_send_failed",
        }
    }

    /// Render the audit message.
    pub fn message(&self) -> String {
        match self {
            InvitationEvent::Created { email, role, .. } => format!(
                "Invitation for {} as {} has been created.",
                email,
                role.display_name().to_lowercase()
            ),
            InvitationEvent::Accepted {
                email, username, ..
            } => format!(
                "Invitation for {} has been accepted by user {}.",
                email, username
            ),
            InvitationEvent::Expired { email, .. } => {
                format!("Invitation for {} has expired.", email)
            }
            InvitationEvent::SendFailed { email, error, .. } => {
                format!("Invitation for {} could not be sent: {}", email, error)
            }
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let (invitation_id, customer_id, project_id) = match self {
            InvitationEvent::Created {
                invitation_id,
                customer_id,
                project_id,
                ..
            }
            | InvitationEvent::Accepted {
                invitation_id,
                customer_id,
                project_id,
                ..
            }
            | InvitationEvent::Expired {
                invitation_id,
                customer_id,
                project_id,
                ..
            }
            | InvitationEvent::SendFailed {
                invitation_id,
                customer_id,
                project_id,
                ..
            } => (*invitation_id, *customer_id, *project_id),
        };
        let level = match self {
            InvitationEvent::SendFailed { .. } => EventLevel::Error,
            _ => EventLevel::Info,
        };
        let mut event = Event::new(self.event_type(), Module::Users, self.message(), payload_of(self))
            .with_level(level)
            .with_customer(customer_id)
            .with_scope(ResourceType::Invitation, invitation_id);
        if let InvitationEvent::Accepted { username, .. } = self {
            event = event.with_username(username.clone());
        }
        match project_id {
            Some(project_id) => event.with_project(project_id),
            None => event,
        }
    }
}

// ============================================================================
// Feature groups
// ============================================================================

const EVENT_GROUPS: &[(&str, &[&str])] = &[
    (
        "customers",
        &[
            "customer_creation_succeeded",
            "customer_update_succeeded",
            "customer_deletion_succeeded",
            "customer_account_credited",
            "customer_account_debited",
        ],
    ),
    (
        "projects",
        &[
            "project_creation_succeeded",
            "project_update_succeeded",
            "project_deletion_succeeded",
        ],
    ),
    (
        "project_groups",
        &[
            "project_group_creation_succeeded",
            "project_group_update_succeeded",
            "project_group_deletion_succeeded",
        ],
    ),
    (
        "users",
        &[
            "role_granted",
            "role_revoked",
            "user_organization_claimed",
            "user_organization_approved",
            "user_organization_rejected",
            "user_organization_removed",
        ],
    ),
    (
        "ssh",
        &["ssh_key_creation_succeeded", "ssh_key_deletion_succeeded"],
    ),
    (
        "resources",
        &[
            "resource_creation_scheduled",
            "resource_deletion_succeeded",
            "resource_import_succeeded",
            "resource_start_scheduled",
            "resource_start_succeeded",
            "resource_stop_scheduled",
            "resource_stop_succeeded",
            "resource_restart_scheduled",
            "resource_restart_succeeded",
            "resource_resize_scheduled",
            "resource_resize_succeeded",
        ],
    ),
    (
        "invoices",
        &[
            "invoice_creation_succeeded",
            "invoice_update_succeeded",
            "invoice_deletion_succeeded",
        ],
    ),
    (
        "invitations",
        &[
            "invitation_created",
            "invitation_accepted",
            "invitation_expired",
            "invitation_send_failed",
        ],
    ),
    (
        "update",
        &[
            "customer_update_succeeded",
            "project_update_succeeded",
            "project_group_update_succeeded",
            "invoice_update_succeeded",
        ],
    ),
];

const ALERT_GROUPS: &[(&str, &[&str])] = &[
    (
        "customers",
        &[
            "customer_has_zero_services",
            "customer_has_zero_resources",
            "customer_has_zero_projects",
            "customer_projects_quota_exceeded",
        ],
    ),
    (
        "services",
        &["service_unavailable", "service_has_unmanaged_resources"],
    ),
    ("resources", &["resource_disappeared_from_backend"]),
    ("quota", &["quota_usage_is_over_threshold"]),
];

fn expand(groups: &[(&str, &[&str])], features: &[String]) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for feature in features {
        if let Some((_, members)) = groups.iter().find(|(name, _)| *name == feature.as_str()) {
            for member in members.iter() {
                if !types.iter().any(|t| t == member) {
                    types.push((*member).to_string());
                }
            }
        }
    }
    types
}

/// Names of the event feature groups.
pub fn event_groups() -> Vec<&'static str> {
    EVENT_GROUPS.iter().map(|(name, _)| *name).collect()
}

/// Expand feature names into the event types they cover. Unknown features are ignored.
///
/// # Example
///
/// ```
/// use conductor_events::expand_event_groups;
///
/// let types = expand_event_groups(&["ssh".to_string()]);
/// assert_eq!(types, vec!["ssh_key_creation_succeeded", "ssh_key_deletion_succeeded"]);
/// ```
pub fn expand_event_groups(features: &[String]) -> Vec<String> {
    expand(EVENT_GROUPS, features)
}

/// Expand feature names into the alert types they cover. Unknown features are ignored.
pub fn expand_alert_groups(features: &[String]) -> Vec<String> {
    expand(ALERT_GROUPS, features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_structure::ProjectRole;

    #[test]
    fn test_event_creation() {
        let customer = Uuid::now_v7();
        let event = Event::new("test_event", Module::Structure, "hello", serde_json::json!({}))
            .with_customer(customer)
            .with_user(Uuid::now_v7())
            .with_metadata("ip", serde_json::json!("10.0.0.1"));

        assert_eq!(event.event_type, "test_event");
        assert_eq!(event.source, Module::Structure);
        assert_eq!(event.customer_id, Some(customer));
        assert!(event.user_id.is_some());
        assert_eq!(event.level, EventLevel::Info);
        assert_eq!(event.topic(), "structure.test_event");
    }

    #[test]
    fn test_customer_event() {
        let customer_id = Uuid::now_v7();
        let event = StructureEvent::CustomerCreated {
            customer_id,
            customer_name: "Acme".to_string(),
        }
        .to_event();
        assert_eq!(event.event_type, "customer_creation_succeeded");
        assert_eq!(event.message, "Customer Acme has been created.");
        assert_eq!(event.customer_id, Some(customer_id));
        assert_eq!(event.scope, Some(EventScope::new(ResourceType::Customer, customer_id)));
    }

    #[test]
    fn test_role_granted_event() {
        let project_id = Uuid::now_v7();
        let event = StructureEvent::RoleGranted {
            scope_kind: ScopeKind::Project,
            scope_id: project_id,
            scope_name: "Web".to_string(),
            customer_id: Uuid::now_v7(),
            affected_user_id: Uuid::now_v7(),
            affected_username: "alice".to_string(),
            role: RoleType::Project(ProjectRole::Administrator),
        }
        .to_event();
        assert_eq!(event.event_type, "role_granted");
        assert_eq!(
            event.message,
            "User alice has gained role of administrator in project Web."
        );
        assert_eq!(event.project_id, Some(project_id));
        assert_eq!(event.user_username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_account_events() {
        let event = StructureEvent::AccountDebited {
            customer_id: Uuid::now_v7(),
            customer_name: "Acme".to_string(),
            amount: 12.5,
            balance: -2.5,
        }
        .to_event();
        assert_eq!(event.message, "Balance has been decreased by 12.50 for customer Acme.");
    }

    #[test]
    fn test_resource_events() {
        let resource = ResourceRef {
            resource_type: ResourceType::Instance,
            resource_id: Uuid::now_v7(),
            resource_name: "web-1".to_string(),
            project_id: Uuid::now_v7(),
            customer_id: Uuid::now_v7(),
        };
        let scheduled = ResourceEvent::ActionScheduled {
            resource: resource.clone(),
            action: "stop".to_string(),
        }
        .to_event();
        assert_eq!(scheduled.event_type, "resource_stop_scheduled");
        assert_eq!(scheduled.message, "Instance web-1 stop has been scheduled.");

        let done = ResourceEvent::ActionSucceeded {
            resource: resource.clone(),
            action: "resize".to_string(),
        }
        .to_event();
        assert_eq!(done.message, "Instance web-1 has been resized.");
        assert_eq!(done.source, Module::Iaas);

        let sg = ResourceRef {
            resource_type: ResourceType::SecurityGroup,
            ..resource
        };
        assert_eq!(sg.full_name(), "Security group web-1");
    }

    #[test]
    fn test_invoice_event() {
        let event = InvoiceEvent::Deleted {
            invoice_id: Uuid::now_v7(),
            customer_id: Uuid::now_v7(),
            customer_name: "Acme".to_string(),
            invoice_date: "2026-09".to_string(),
        }
        .to_event();
        assert_eq!(event.event_type, "invoice_deletion_succeeded");
        assert_eq!(
            event.message,
            "Invoice for customer Acme for the period of 2026-09 has been deleted."
        );
    }

    #[test]
    fn test_invitation_send_failed_is_error() {
        let event = InvitationEvent::SendFailed {
            invitation_id: Uuid::now_v7(),
            customer_id: Uuid::now_v7(),
            project_id: None,
            email: "bob@example.com".to_string(),
            error: "SMTP down".to_string(),
        }
        .to_event();
        assert_eq!(event.level, EventLevel::Error);
        assert_eq!(event.project_id, None);
    }

    #[test]
    fn test_expand_event_groups() {
        let types = expand_event_groups(&["projects".to_string(), "update".to_string()]);
        assert!(types.contains(&"project_creation_succeeded".to_string()));
        assert!(types.contains(&"invoice_update_succeeded".to_string()));
        // project_update_succeeded is in both groups but listed once
        assert_eq!(
            types.iter().filter(|t| *t == "project_update_succeeded").count(),
            1
        );
        assert!(expand_event_groups(&["nothing".to_string()]).is_empty());
        assert_eq!(
            expand_alert_groups(&["services".to_string()]),
            vec!["service_unavailable", "service_has_unmanaged_resources"]
        );
    }
}
