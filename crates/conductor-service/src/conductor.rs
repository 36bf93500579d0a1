//! Service facade
//!
//! [`Conductor`] owns the registries and runs every mutating operation in two
//! steps: the change is made under the registry locks, then the locks are
//! released and the matching [`Signal`] is sent. Receivers take the locks
//! they need themselves.
//!
//! ```text
//! Conductor::create_project
//!     │ Structure::create_project      (write lock, released)
//!     │ Signal::saved(Project)
//!     ▼
//! SignalDispatcher ──→ role slots ──→ audit log ──→ cloud links
//! ```
//!
//! Registry locks are always taken in field order (structure, inventory,
//! cost books) so nested acquisition cannot deadlock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use conductor_auth::UserDirectory;
use conductor_cost::{
    record_customer_estimates, CostTrackingStrategy, Invoice, InvoiceBook, InvoiceState, OrderBook,
    PriceEstimateBook, PriceListBook, YearMonth,
};
use conductor_events::{
    Alert, AlertLog, AlertQuery, AlertRequest, Event, EventBus, EventLog, EventQuery, EventScope,
    InvitationEvent, MemoryEventBus, Signal, SignalDispatcher, SignalKind,
};
use conductor_iaas::{
    check_operation, Cloud, CloudProjectMembership, Flavor, IaasError, Instance, InstanceState,
    Inventory, OperationOutcome, ResizeRequest, RoleRequirement, SecurityGroup,
    SharedCloudSettings, StateChange, Transition,
};
use conductor_rbac::{permitted_object_ids, Action, ResourceType, Scoped, UserScope};
use conductor_structure::{
    BalanceChange, Customer, CustomerPermission, CustomerRole, Invitation, InvitationTarget,
    Project, ProjectGroup, ProjectGroupPermission, ProjectGroupRole, ProjectPermission, ProjectRole,
    RoleType, SshPublicKey, Structure, StructureError, User,
};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{CloudBackend, MemoryCloudBackend};
use crate::config::ConductorConfig;
use crate::error::ServiceResult;
use crate::geoip::GeoIpClient;
use crate::handlers;
use crate::mail::{self, Mailer, MemoryMailer};
use crate::report;

const DENIED: &str = "You do not have permission to perform this action.";

/// Shared state handed to every signal receiver.
pub struct ConductorState {
    /// Organizational hierarchy, users and invitations
    pub structure: RwLock<Structure>,
    /// Clouds and instances
    pub inventory: RwLock<Inventory>,
    /// Monthly price estimates
    pub estimates: RwLock<PriceEstimateBook>,
    /// Service price lists
    pub price_lists: RwLock<PriceListBook>,
    /// Customer invoices
    pub invoices: RwLock<InvoiceBook>,
    /// Resource orders
    pub orders: RwLock<OrderBook>,
    /// Alerts
    pub alerts: RwLock<AlertLog>,
    /// Audit log
    pub events: EventLog,
    /// Event fan-out to subscribers
    pub bus: MemoryEventBus,
    /// Coordinates lookup for new VMs
    pub geoip: Option<GeoIpClient>,
    /// Cloud tenant operations
    pub backend: Arc<dyn CloudBackend>,
    /// Mail transport
    pub mailer: Arc<dyn Mailer>,
    /// Service configuration
    pub config: ConductorConfig,
}

impl ConductorState {
    /// Create empty registries with in-memory collaborators.
    pub fn new(config: ConductorConfig) -> Self {
        Self {
            structure: RwLock::new(Structure::new()),
            inventory: RwLock::new(Inventory::new()),
            estimates: RwLock::new(PriceEstimateBook::new()),
            price_lists: RwLock::new(PriceListBook::new()),
            invoices: RwLock::new(InvoiceBook::new()),
            orders: RwLock::new(OrderBook::new()),
            alerts: RwLock::new(AlertLog::new()),
            events: EventLog::new(),
            bus: MemoryEventBus::new(),
            geoip: None,
            backend: Arc::new(MemoryCloudBackend::new()),
            mailer: Arc::new(MemoryMailer::new()),
            config,
        }
    }

    /// Detect VM coordinates with this client.
    pub fn with_geoip(mut self, geoip: GeoIpClient) -> Self {
        self.geoip = Some(geoip);
        self
    }

    /// Use another cloud backend.
    pub fn with_backend(mut self, backend: Arc<dyn CloudBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Use another mail transport.
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Store an audit event and publish it to bus subscribers.
    pub async fn emit(&self, event: Event) {
        self.events.record(event.clone()).await;
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}

impl std::fmt::Debug for ConductorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductorState")
            .field("geoip", &self.geoip)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Service facade.
///
/// # Example
///
/// ```rust,no_run
/// use conductor_service::{ConductorConfig, Conductor, ConductorState};
/// use conductor_structure::{Customer, User};
///
/// async fn example() {
///     let conductor = Conductor::new(ConductorState::new(ConductorConfig::default())).await;
///     let staff = conductor
///         .register_user(User::new("staff", "staff@example.com").staff())
///         .await
///         .unwrap();
///     conductor.create_customer(staff, Customer::new("Acme")).await.unwrap();
/// }
/// ```
pub struct Conductor {
    state: Arc<ConductorState>,
    signals: SignalDispatcher<ConductorState>,
}

impl Conductor {
    /// Create the facade and connect every signal receiver.
    pub async fn new(state: ConductorState) -> Self {
        let signals = SignalDispatcher::new();
        handlers::connect_all(&signals).await;
        Self {
            state: Arc::new(state),
            signals,
        }
    }

    /// Shared state.
    pub fn state(&self) -> &ConductorState {
        &self.state
    }

    /// Signal dispatcher, e.g. to connect extra receivers.
    pub fn signals(&self) -> &SignalDispatcher<ConductorState> {
        &self.signals
    }

    async fn send(&self, signal: Signal) -> ServiceResult<usize> {
        Ok(self.signals.send(&self.state, &signal).await?)
    }

    /// Permission scope of a user right now.
    pub async fn user_scope(&self, user_id: Uuid) -> ServiceResult<UserScope> {
        let structure = self.state.structure.read().await;
        Ok(UserScope::for_user(&structure, user_id, Utc::now())?)
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    /// Register a user account.
    pub async fn register_user(&self, user: User) -> ServiceResult<Uuid> {
        Ok(self.state.structure.write().await.add_user_account(user)?)
    }

    /// Add an SSH key and push it to the clouds its owner can reach.
    #[instrument(skip(self, key), fields(user_id = %key.user_id))]
    pub async fn add_ssh_key(&self, key: SshPublicKey) -> ServiceResult<SshPublicKey> {
        let key = self.state.structure.write().await.add_ssh_key(key)?;
        self.send(Signal::saved(ResourceType::SshKey, key.id, true).with_actor(Some(key.user_id)))
            .await?;
        Ok(key)
    }

    /// Delete an SSH key. Only the owner and staff may delete a key.
    pub async fn delete_ssh_key(&self, actor_id: Uuid, key_id: Uuid) -> ServiceResult<SshPublicKey> {
        {
            let structure = self.state.structure.read().await;
            let key = structure.ssh_key(key_id)?;
            if key.user_id != actor_id && !structure.user(actor_id)?.is_staff {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
        }
        self.send(Signal::deleting(ResourceType::SshKey, key_id).with_actor(Some(actor_id)))
            .await?;
        let key = self.state.structure.write().await.remove_ssh_key(key_id)?;
        self.send(Signal::deleted(ResourceType::SshKey, key_id).with_actor(Some(actor_id)))
            .await?;
        Ok(key)
    }

    // ---------------------------------------------------------------------
    // Customers
    // ---------------------------------------------------------------------

    /// Create a customer.
    pub async fn create_customer(&self, actor_id: Uuid, customer: Customer) -> ServiceResult<Customer> {
        let customer = self
            .state
            .structure
            .write()
            .await
            .create_customer(actor_id, customer)?;
        self.send(Signal::saved(ResourceType::Customer, customer.id, true).with_actor(Some(actor_id)))
            .await?;
        Ok(customer)
    }

    /// Change a customer. Staff and customer owners may update customers.
    pub async fn update_customer<F>(&self, actor_id: Uuid, customer_id: Uuid, update: F) -> ServiceResult<Customer>
    where
        F: FnOnce(&mut Customer) + Send,
    {
        let customer = {
            let mut structure = self.state.structure.write().await;
            if !structure.can_manage_customer_role(actor_id, customer_id, None, Utc::now()) {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
            let customer = structure.customer_mut(customer_id)?;
            update(customer);
            customer.clone()
        };
        self.send(Signal::saved(ResourceType::Customer, customer_id, false).with_actor(Some(actor_id)))
            .await?;
        Ok(customer)
    }

    /// Delete a customer without projects.
    pub async fn delete_customer(&self, actor_id: Uuid, customer_id: Uuid) -> ServiceResult<Customer> {
        {
            let structure = self.state.structure.read().await;
            structure.customer(customer_id)?;
            if !structure.user(actor_id)?.is_staff {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
        }
        self.send(Signal::deleting(ResourceType::Customer, customer_id).with_actor(Some(actor_id)))
            .await?;
        let customer = self
            .state
            .structure
            .write()
            .await
            .delete_customer(actor_id, customer_id)?;
        self.send(Signal::deleted(ResourceType::Customer, customer_id).with_actor(Some(actor_id)))
            .await?;
        Ok(customer)
    }

    /// Add money to a customer account.
    pub async fn credit_account(&self, customer_id: Uuid, amount: f64) -> ServiceResult<BalanceChange> {
        let change = self
            .state
            .structure
            .write()
            .await
            .customer_mut(customer_id)?
            .credit_account(amount)?;
        self.send(Signal::new(
            SignalKind::AccountCredited { amount },
            ResourceType::Customer,
            customer_id,
        ))
        .await?;
        Ok(change)
    }

    /// Withdraw money from a customer account.
    pub async fn debit_account(&self, customer_id: Uuid, amount: f64) -> ServiceResult<BalanceChange> {
        let change = self
            .state
            .structure
            .write()
            .await
            .customer_mut(customer_id)?
            .debit_account(amount)?;
        self.send(Signal::new(
            SignalKind::AccountDebited { amount },
            ResourceType::Customer,
            customer_id,
        ))
        .await?;
        Ok(change)
    }

    // ---------------------------------------------------------------------
    // Projects and project groups
    // ---------------------------------------------------------------------

    /// Create a project.
    pub async fn create_project(&self, actor_id: Uuid, project: Project) -> ServiceResult<Project> {
        let project = self
            .state
            .structure
            .write()
            .await
            .create_project(actor_id, project)?;
        self.send(Signal::saved(ResourceType::Project, project.id, true).with_actor(Some(actor_id)))
            .await?;
        Ok(project)
    }

    /// Change a project. Staff and customer owners may update projects.
    pub async fn update_project<F>(&self, actor_id: Uuid, project_id: Uuid, update: F) -> ServiceResult<Project>
    where
        F: FnOnce(&mut Project) + Send,
    {
        let project = {
            let mut structure = self.state.structure.write().await;
            let customer_id = structure.project(project_id)?.customer_id;
            if !structure.can_create_project(actor_id, customer_id, Utc::now()) {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
            let project = structure.project_mut(project_id)?;
            update(project);
            project.clone()
        };
        self.send(Signal::saved(ResourceType::Project, project_id, false).with_actor(Some(actor_id)))
            .await?;
        Ok(project)
    }

    /// Delete a project without instances.
    pub async fn delete_project(&self, actor_id: Uuid, project_id: Uuid) -> ServiceResult<Project> {
        {
            let structure = self.state.structure.read().await;
            let customer_id = structure.project(project_id)?.customer_id;
            if !structure.can_create_project(actor_id, customer_id, Utc::now()) {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
        }
        self.ensure_project_empty(project_id).await?;
        self.send(Signal::deleting(ResourceType::Project, project_id).with_actor(Some(actor_id)))
            .await?;
        let project = {
            let mut structure = self.state.structure.write().await;
            // instances may have been added while receivers ran
            self.ensure_project_empty(project_id).await?;
            structure.delete_project(project_id)?
        };
        self.send(Signal::deleted(ResourceType::Project, project_id).with_actor(Some(actor_id)))
            .await?;
        Ok(project)
    }

    async fn ensure_project_empty(&self, project_id: Uuid) -> ServiceResult<()> {
        if self
            .state
            .inventory
            .read()
            .await
            .instances_of_project(project_id)
            .is_empty()
        {
            Ok(())
        } else {
            Err(StructureError::Conflict("Cannot delete project with existing resources".to_string()).into())
        }
    }

    /// Create a project group.
    pub async fn create_project_group(&self, actor_id: Uuid, group: ProjectGroup) -> ServiceResult<ProjectGroup> {
        let group = self
            .state
            .structure
            .write()
            .await
            .create_project_group(actor_id, group)?;
        self.send(Signal::saved(ResourceType::ProjectGroup, group.id, true).with_actor(Some(actor_id)))
            .await?;
        Ok(group)
    }

    /// Put a project into a group of the same customer.
    pub async fn add_project_to_group(&self, actor_id: Uuid, group_id: Uuid, project_id: Uuid) -> ServiceResult<()> {
        {
            let mut structure = self.state.structure.write().await;
            let customer_id = structure.project_group(group_id)?.customer_id;
            if !structure.can_create_project(actor_id, customer_id, Utc::now()) {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
            structure.add_project_to_group(group_id, project_id)?;
        }
        self.send(Signal::saved(ResourceType::ProjectGroup, group_id, false).with_actor(Some(actor_id)))
            .await?;
        Ok(())
    }

    /// Take a project out of a group.
    pub async fn remove_project_from_group(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        project_id: Uuid,
    ) -> ServiceResult<()> {
        {
            let mut structure = self.state.structure.write().await;
            let customer_id = structure.project_group(group_id)?.customer_id;
            if !structure.can_create_project(actor_id, customer_id, Utc::now()) {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
            structure.remove_project_from_group(group_id, project_id)?;
        }
        self.send(Signal::saved(ResourceType::ProjectGroup, group_id, false).with_actor(Some(actor_id)))
            .await?;
        Ok(())
    }

    /// Delete an empty project group.
    pub async fn delete_project_group(&self, actor_id: Uuid, group_id: Uuid) -> ServiceResult<ProjectGroup> {
        {
            let structure = self.state.structure.read().await;
            let customer_id = structure.project_group(group_id)?.customer_id;
            if !structure.can_create_project(actor_id, customer_id, Utc::now()) {
                return Err(StructureError::PermissionDenied(DENIED.to_string()).into());
            }
        }
        self.send(Signal::deleting(ResourceType::ProjectGroup, group_id).with_actor(Some(actor_id)))
            .await?;
        let group = self
            .state
            .structure
            .write()
            .await
            .delete_project_group(group_id)?;
        self.send(Signal::deleted(ResourceType::ProjectGroup, group_id).with_actor(Some(actor_id)))
            .await?;
        Ok(group)
    }

    // ---------------------------------------------------------------------
    // Roles
    // ---------------------------------------------------------------------

    async fn role_granted(&self, actor: Option<Uuid>, sender: ResourceType, scope_id: Uuid, user_id: Uuid, role: RoleType) -> ServiceResult<()> {
        self.send(Signal::new(SignalKind::RoleGranted { user_id, role }, sender, scope_id).with_actor(actor))
            .await?;
        Ok(())
    }

    async fn role_revoked(&self, actor: Option<Uuid>, sender: ResourceType, scope_id: Uuid, user_id: Uuid, role: RoleType) -> ServiceResult<()> {
        self.send(Signal::new(SignalKind::RoleRevoked { user_id, role }, sender, scope_id).with_actor(actor))
            .await?;
        Ok(())
    }

    /// Grant a customer role.
    pub async fn grant_customer_role(
        &self,
        actor_id: Uuid,
        customer_id: Uuid,
        user_id: Uuid,
        role: CustomerRole,
        expiration_time: Option<DateTime<Utc>>,
    ) -> ServiceResult<CustomerPermission> {
        let (grant, created) = self.state.structure.write().await.grant_customer_role(
            actor_id,
            customer_id,
            user_id,
            role,
            expiration_time,
        )?;
        if created {
            self.role_granted(Some(actor_id), ResourceType::Customer, customer_id, user_id, RoleType::Customer(role))
                .await?;
        }
        Ok(grant)
    }

    /// Revoke customer roles; every role when `role` is `None`.
    pub async fn revoke_customer_role(
        &self,
        actor_id: Uuid,
        customer_id: Uuid,
        user_id: Uuid,
        role: Option<CustomerRole>,
    ) -> ServiceResult<Vec<CustomerPermission>> {
        let revoked = self
            .state
            .structure
            .write()
            .await
            .revoke_customer_role(actor_id, customer_id, user_id, role)?;
        for grant in &revoked {
            self.role_revoked(Some(actor_id), ResourceType::Customer, customer_id, user_id, RoleType::Customer(grant.role))
                .await?;
        }
        Ok(revoked)
    }

    /// Grant a project role.
    pub async fn grant_project_role(
        &self,
        actor_id: Uuid,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
        expiration_time: Option<DateTime<Utc>>,
    ) -> ServiceResult<ProjectPermission> {
        let (grant, created) = self.state.structure.write().await.grant_project_role(
            actor_id,
            project_id,
            user_id,
            role,
            expiration_time,
        )?;
        if created {
            self.role_granted(Some(actor_id), ResourceType::Project, project_id, user_id, RoleType::Project(role))
                .await?;
        }
        Ok(grant)
    }

    /// Revoke a project role.
    pub async fn revoke_project_role(
        &self,
        actor_id: Uuid,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> ServiceResult<Vec<ProjectPermission>> {
        let revoked = self
            .state
            .structure
            .write()
            .await
            .revoke_project_role(actor_id, project_id, user_id, role)?;
        for grant in &revoked {
            self.role_revoked(Some(actor_id), ResourceType::Project, project_id, user_id, RoleType::Project(grant.role))
                .await?;
        }
        Ok(revoked)
    }

    /// Grant a project group role.
    pub async fn grant_project_group_role(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
        role: ProjectGroupRole,
    ) -> ServiceResult<ProjectGroupPermission> {
        let (grant, created) = self
            .state
            .structure
            .write()
            .await
            .grant_project_group_role(actor_id, group_id, user_id, role)?;
        if created {
            self.role_granted(Some(actor_id), ResourceType::ProjectGroup, group_id, user_id, RoleType::ProjectGroup(role))
                .await?;
        }
        Ok(grant)
    }

    /// Revoke project group roles; every role when `role` is `None`.
    pub async fn revoke_project_group_role(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
        role: Option<ProjectGroupRole>,
    ) -> ServiceResult<Vec<ProjectGroupPermission>> {
        let revoked = self
            .state
            .structure
            .write()
            .await
            .revoke_project_group_role(actor_id, group_id, user_id, role)?;
        for grant in &revoked {
            self.role_revoked(
                Some(actor_id),
                ResourceType::ProjectGroup,
                group_id,
                user_id,
                RoleType::ProjectGroup(grant.role),
            )
            .await?;
        }
        Ok(revoked)
    }

    // ---------------------------------------------------------------------
    // Invitations
    // ---------------------------------------------------------------------

    /// Store an invitation and mail it.
    ///
    /// A delivery failure does not fail the call: it is kept on the
    /// invitation and logged as an `invitation_send_failed` event.
    #[instrument(skip(self, invitation), fields(customer_id = %invitation.customer_id))]
    pub async fn create_invitation(&self, actor_id: Uuid, invitation: Invitation) -> ServiceResult<Invitation> {
        let (invitation, sender) = {
            let mut structure = self.state.structure.write().await;
            let invitation = structure.add_invitation(actor_id, invitation)?;
            let actor = structure.user(actor_id)?;
            let sender = if actor.full_name.is_empty() {
                actor.username.clone()
            } else {
                actor.full_name.clone()
            };
            (invitation, sender)
        };
        let event = InvitationEvent::Created {
            invitation_id: invitation.id,
            customer_id: invitation.customer_id,
            project_id: target_project(&invitation.target),
            email: invitation.email.clone(),
            role: invitation.target.role_type(),
        };
        self.state.emit(event.to_event().with_user(actor_id)).await;

        if let Err(e) = self.send_invitation(invitation.id, &sender).await {
            let event = InvitationEvent::SendFailed {
                invitation_id: invitation.id,
                customer_id: invitation.customer_id,
                project_id: target_project(&invitation.target),
                email: invitation.email.clone(),
                error: e.to_string(),
            };
            self.state.emit(event.to_event()).await;
        }
        Ok(self.state.structure.read().await.invitation(invitation.id)?.clone())
    }

    /// Mail a stored invitation.
    pub async fn send_invitation(&self, invitation_id: Uuid, sender: &str) -> ServiceResult<()> {
        mail::send_invitation(
            invitation_id,
            sender,
            &self.state.structure,
            self.state.mailer.as_ref(),
            &self.state.config,
        )
        .await?;
        Ok(())
    }

    /// Accept a pending invitation on behalf of a user.
    ///
    /// `RoleGranted` is sent only when the user did not hold the role yet.
    pub async fn accept_invitation(&self, invitation_id: Uuid, user_id: Uuid) -> ServiceResult<Invitation> {
        let (invitation, role, created, username) = {
            let mut structure = self.state.structure.write().await;
            let lifetime = self.state.config.invitation_lifetime();
            if structure.invitation(invitation_id)?.is_expired(Utc::now(), lifetime) {
                return Err(StructureError::Conflict("Invitation has expired.".to_string()).into());
            }
            let username = structure.user(user_id)?.username.clone();
            let (invitation, role, created) = structure.accept_invitation(invitation_id, user_id)?;
            (invitation, role, created, username)
        };

        if created {
            let (sender, scope_id) = match invitation.target {
                InvitationTarget::Customer { .. } => (ResourceType::Customer, invitation.customer_id),
                InvitationTarget::Project { project_id, .. } => (ResourceType::Project, project_id),
            };
            self.role_granted(invitation.created_by, sender, scope_id, user_id, role)
                .await?;
        }

        let event = InvitationEvent::Accepted {
            invitation_id,
            customer_id: invitation.customer_id,
            project_id: target_project(&invitation.target),
            email: invitation.email.clone(),
            username,
        };
        self.state.emit(event.to_event().with_user(user_id)).await;
        Ok(invitation)
    }

    /// Expire every pending invitation older than the configured lifetime.
    ///
    /// # Returns
    ///
    /// The number of invitations expired
    pub async fn cancel_expired_invitations(&self, now: DateTime<Utc>) -> usize {
        let expired = self
            .state
            .structure
            .write()
            .await
            .expire_invitations(now, self.state.config.invitation_lifetime());
        for invitation in &expired {
            let event = InvitationEvent::Expired {
                invitation_id: invitation.id,
                customer_id: invitation.customer_id,
                project_id: target_project(&invitation.target),
                email: invitation.email.clone(),
            };
            self.state.emit(event.to_event()).await;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired invitations cancelled");
        }
        expired.len()
    }

    // ---------------------------------------------------------------------
    // Clouds
    // ---------------------------------------------------------------------

    /// Register a cloud of a customer. Staff and customer owners may add clouds.
    pub async fn add_cloud(&self, actor_id: Uuid, cloud: Cloud) -> ServiceResult<(Cloud, Vec<Flavor>)> {
        let added = {
            let structure = self.state.structure.read().await;
            structure.customer(cloud.customer_id)?;
            let scope = UserScope::for_user(&structure, actor_id, Utc::now())?;
            if !scope.is_staff && !scope.is_owner_of(cloud.customer_id) {
                return Err(IaasError::PermissionDenied(DENIED.to_string()).into());
            }
            self.state.inventory.write().await.add_cloud(cloud)?
        };
        self.send(Signal::saved(ResourceType::Cloud, added.0.id, true).with_actor(Some(actor_id)))
            .await?;
        Ok(added)
    }

    /// Register cloud settings shared with every customer created from now on.
    /// Staff only.
    pub async fn add_shared_cloud_settings(
        &self,
        actor_id: Uuid,
        settings: SharedCloudSettings,
    ) -> ServiceResult<SharedCloudSettings> {
        if !self.state.structure.read().await.user(actor_id)?.is_staff {
            return Err(IaasError::PermissionDenied(DENIED.to_string()).into());
        }
        Ok(self.state.inventory.write().await.add_shared_settings(settings)?)
    }

    /// Make a cloud available to every project of its customer, or stop
    /// doing so for new projects.
    pub async fn set_cloud_available_for_all(&self, actor_id: Uuid, cloud_id: Uuid, available: bool) -> ServiceResult<Cloud> {
        let cloud = {
            let structure = self.state.structure.read().await;
            let mut inventory = self.state.inventory.write().await;
            let scope = UserScope::for_user(&structure, actor_id, Utc::now())?;
            let cloud = inventory.cloud_mut(cloud_id)?;
            if !scope.is_staff && !scope.is_owner_of(cloud.customer_id) {
                return Err(IaasError::PermissionDenied(DENIED.to_string()).into());
            }
            cloud.available_for_all = available;
            cloud.clone()
        };
        self.send(Signal::saved(ResourceType::Cloud, cloud_id, false).with_actor(Some(actor_id)))
            .await?;
        Ok(cloud)
    }

    /// Schedule synchronization of a cloud.
    pub async fn sync_cloud(&self, user_id: Uuid, cloud_id: Uuid) -> ServiceResult<Cloud> {
        let structure = self.state.structure.read().await;
        let scope = UserScope::for_user(&structure, user_id, Utc::now())?;
        let mut inventory = self.state.inventory.write().await;
        Ok(inventory.sync_cloud(&structure, &scope, cloud_id)?.clone())
    }

    /// Link a cloud to a project of the same customer.
    pub async fn add_membership(
        &self,
        actor_id: Uuid,
        membership: CloudProjectMembership,
    ) -> ServiceResult<(CloudProjectMembership, SecurityGroup)> {
        let added = {
            let structure = self.state.structure.read().await;
            let mut inventory = self.state.inventory.write().await;
            let customer_id = inventory.cloud(membership.cloud_id)?.customer_id;
            if structure.project(membership.project_id)?.customer_id != customer_id {
                return Err(IaasError::Validation(
                    "Cloud and project must belong to the same customer.".to_string(),
                )
                .into());
            }
            let scope = UserScope::for_user(&structure, actor_id, Utc::now())?;
            if !scope.is_staff && !scope.is_owner_of(customer_id) {
                return Err(IaasError::PermissionDenied(DENIED.to_string()).into());
            }
            inventory.add_membership(membership)?
        };
        self.send(
            Signal::saved(ResourceType::CloudProjectMembership, added.0.id, true)
                .with_actor(Some(actor_id)),
        )
        .await?;
        Ok(added)
    }

    // ---------------------------------------------------------------------
    // Instances
    // ---------------------------------------------------------------------

    /// Check that the user may run `action` on an instance in its current state.
    async fn gate_instance(
        &self,
        user_id: Uuid,
        instance_id: Uuid,
        action: Action,
        valid_states: &[InstanceState],
    ) -> ServiceResult<()> {
        let structure = self.state.structure.read().await;
        let inventory = self.state.inventory.read().await;
        let scope = UserScope::for_user(&structure, user_id, Utc::now())?;
        let instance = inventory.instance(instance_id)?;
        let path = instance.scope_path(&inventory.view(&structure));
        check_operation(
            &scope,
            &path,
            ResourceType::Instance,
            instance_id,
            action,
            RoleRequirement::Administrator,
            instance.state,
            valid_states,
        )?;
        Ok(())
    }

    async fn send_transition(&self, actor: Option<Uuid>, change: StateChange) -> ServiceResult<()> {
        let signal = Signal::transitioned(
            ResourceType::Instance,
            change.instance_id,
            change.from.as_str(),
            change.to.as_str(),
            change.transition.as_str(),
        )
        .with_actor(actor);
        self.send(signal).await?;
        Ok(())
    }

    async fn register_instance(&self, user_id: Uuid, instance: Instance) -> ServiceResult<Instance> {
        let mut structure = self.state.structure.write().await;
        let mut inventory = self.state.inventory.write().await;
        let project_id = inventory.membership(instance.membership_id)?.project_id;

        let scope = UserScope::for_user(&structure, user_id, Utc::now())?;
        let path = inventory.view(&structure).membership_path(instance.membership_id);
        if !scope.can_see(&path) {
            return Err(IaasError::not_found("cloud_project_membership", instance.membership_id).into());
        }
        if !scope.can(&path, ResourceType::Instance, Action::Create) {
            return Err(IaasError::PermissionDenied(DENIED.to_string()).into());
        }

        let usage = instance.quota_usage();
        structure.project(project_id)?.quotas.validate_quota_change(&usage)?;
        let instance = inventory.add_instance(instance)?;
        let project = structure.project_mut(project_id)?;
        for (name, delta) in usage {
            project.quotas.add_usage(name, delta);
        }
        Ok(instance)
    }

    /// Schedule provisioning of a new instance.
    #[instrument(skip(self, instance), fields(hostname = %instance.hostname))]
    pub async fn provision_instance(&self, user_id: Uuid, instance: Instance) -> ServiceResult<Instance> {
        let instance = self.register_instance(user_id, instance).await?;
        self.state.orders.write().await.place(instance.id);
        self.send(Signal::saved(ResourceType::Instance, instance.id, true).with_actor(Some(user_id)))
            .await?;
        Ok(instance)
    }

    /// Register an instance that already exists in the backend.
    pub async fn import_instance(&self, user_id: Uuid, instance: Instance) -> ServiceResult<Instance> {
        let instance = self.register_instance(user_id, instance).await?;
        self.send(
            Signal::new(SignalKind::ResourceImported, ResourceType::Instance, instance.id)
                .with_actor(Some(user_id)),
        )
        .await?;
        Ok(instance)
    }

    /// Apply a transition reported by the backend.
    pub async fn transition_instance(&self, instance_id: Uuid, transition: Transition) -> ServiceResult<StateChange> {
        let change = self
            .state
            .inventory
            .write()
            .await
            .apply_transition(instance_id, transition, Utc::now())?;
        self.send_transition(None, change).await?;
        Ok(change)
    }

    async fn run_operation(&self, user_id: Uuid, instance_id: Uuid, action: Action) -> ServiceResult<OperationOutcome> {
        let valid = match action {
            Action::Start => &[InstanceState::Offline][..],
            Action::Stop | Action::Restart => &[InstanceState::Online][..],
            _ => &[InstanceState::Offline, InstanceState::Erred][..],
        };
        self.gate_instance(user_id, instance_id, action, valid).await?;
        let change = {
            let mut inventory = self.state.inventory.write().await;
            let instance = inventory.instance_mut(instance_id)?;
            let now = Utc::now();
            match action {
                Action::Start => instance.start(now)?,
                Action::Stop => instance.stop(now)?,
                Action::Restart => instance.restart(now)?,
                _ => instance.schedule_deletion(now)?,
            }
        };
        self.send_transition(Some(user_id), change).await?;
        let operation = match action {
            Action::Delete => "destroy",
            other => other.as_str(),
        };
        Ok(OperationOutcome::Scheduled(operation.to_string()))
    }

    /// Schedule a start of a stopped instance.
    pub async fn start_instance(&self, user_id: Uuid, instance_id: Uuid) -> ServiceResult<OperationOutcome> {
        self.run_operation(user_id, instance_id, Action::Start).await
    }

    /// Schedule a stop of a running instance.
    pub async fn stop_instance(&self, user_id: Uuid, instance_id: Uuid) -> ServiceResult<OperationOutcome> {
        self.run_operation(user_id, instance_id, Action::Stop).await
    }

    /// Schedule a restart of a running instance.
    pub async fn restart_instance(&self, user_id: Uuid, instance_id: Uuid) -> ServiceResult<OperationOutcome> {
        self.run_operation(user_id, instance_id, Action::Restart).await
    }

    /// Schedule deletion of a stopped or erred instance.
    pub async fn destroy_instance(&self, user_id: Uuid, instance_id: Uuid) -> ServiceResult<OperationOutcome> {
        self.run_operation(user_id, instance_id, Action::Delete).await
    }

    /// Validate and schedule a resize, charging the quota deltas to the project.
    pub async fn resize_instance(
        &self,
        user_id: Uuid,
        instance_id: Uuid,
        request: &ResizeRequest,
    ) -> ServiceResult<StateChange> {
        self.gate_instance(user_id, instance_id, Action::Resize, &[]).await?;
        let change = {
            let mut structure = self.state.structure.write().await;
            let mut inventory = self.state.inventory.write().await;
            let project_id = inventory.project_of_instance(instance_id)?;
            let quotas = structure.project(project_id)?.quotas.clone();
            let (change, deltas) = inventory.resize_instance(instance_id, request, &quotas, Utc::now())?;
            let project = structure.project_mut(project_id)?;
            for (name, delta) in deltas {
                project.quotas.add_usage(name, delta);
            }
            change
        };
        self.send_transition(Some(user_id), change).await?;
        Ok(change)
    }

    /// Forget an instance the backend has deleted and release its quota.
    pub async fn complete_instance_deletion(&self, instance_id: Uuid) -> ServiceResult<Instance> {
        self.state.inventory.read().await.instance(instance_id)?;
        self.send(Signal::deleting(ResourceType::Instance, instance_id)).await?;
        let instance = {
            let mut structure = self.state.structure.write().await;
            let mut inventory = self.state.inventory.write().await;
            let project_id = inventory.project_of_instance(instance_id)?;
            let instance = inventory.remove_instance(instance_id)?;
            if let Ok(project) = structure.project_mut(project_id) {
                for (name, delta) in instance.quota_usage() {
                    project.quotas.add_usage(name, -delta);
                }
            }
            instance
        };
        self.send(Signal::deleted(ResourceType::Instance, instance_id)).await?;
        Ok(instance)
    }

    // ---------------------------------------------------------------------
    // Billing and cost tracking
    // ---------------------------------------------------------------------

    /// Issue an invoice to a customer.
    pub async fn create_invoice(&self, customer_id: Uuid, amount: f64, date: NaiveDate) -> ServiceResult<Invoice> {
        self.state.structure.read().await.customer(customer_id)?;
        let (invoice, signal) = self.state.invoices.write().await.create(customer_id, amount, date);
        self.send(signal).await?;
        Ok(invoice)
    }

    /// Change the amount or state of an invoice.
    pub async fn update_invoice(
        &self,
        invoice_id: Uuid,
        amount: Option<f64>,
        state: Option<InvoiceState>,
    ) -> ServiceResult<Invoice> {
        let (invoice, signal) = self
            .state
            .invoices
            .write()
            .await
            .update(invoice_id, amount, state)?;
        self.send(signal).await?;
        Ok(invoice)
    }

    /// Delete an invoice.
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> ServiceResult<Invoice> {
        let signal = self.state.invoices.read().await.deleting(invoice_id)?;
        self.send(signal).await?;
        let (invoice, signal) = self.state.invoices.write().await.delete(invoice_id)?;
        self.send(signal).await?;
        Ok(invoice)
    }

    /// Store the monthly cost of every customer with a billing backend as
    /// its automatic estimate for `period`.
    pub async fn record_cost_estimates(
        &self,
        strategy: &dyn CostTrackingStrategy,
        period: YearMonth,
    ) -> ServiceResult<usize> {
        let customers: Vec<Customer> = self.state.structure.read().await.customers().cloned().collect();
        let mut estimates = self.state.estimates.write().await;
        let recorded = record_customer_estimates(strategy, &customers, &mut estimates, period).await;
        debug!(recorded, period = %period, "Customer cost estimates recorded");
        Ok(recorded)
    }

    // ---------------------------------------------------------------------
    // Events and alerts
    // ---------------------------------------------------------------------

    /// Audit events visible to a user.
    pub async fn events_for(&self, user_id: Uuid, query: &EventQuery) -> ServiceResult<Vec<Event>> {
        let permitted = {
            let structure = self.state.structure.read().await;
            let scope = UserScope::for_user(&structure, user_id, Utc::now())?;
            permitted_object_ids(&structure, &scope)
        };
        Ok(self.state.events.query(query, permitted.as_ref()).await?)
    }

    /// Raise an alert, or refresh the open alert of the same type and scope.
    pub async fn raise_alert(&self, request: AlertRequest) -> (Alert, bool) {
        self.state.alerts.write().await.raise(request, Utc::now())
    }

    /// Close the open alert of a type on a scope.
    pub async fn close_alert(&self, alert_type: &str, scope: &EventScope) -> Option<Alert> {
        self.state.alerts.write().await.close(alert_type, scope, Utc::now())
    }

    /// Alerts visible to a user.
    pub async fn alerts_for(&self, user_id: Uuid, query: &AlertQuery) -> ServiceResult<Vec<Alert>> {
        let permitted = {
            let structure = self.state.structure.read().await;
            let scope = UserScope::for_user(&structure, user_id, Utc::now())?;
            permitted_object_ids(&structure, &scope)
        };
        let alerts = self.state.alerts.read().await;
        Ok(alerts
            .query(query, permitted.as_ref())?
            .into_iter()
            .cloned()
            .collect())
    }

    // ---------------------------------------------------------------------
    // Reports
    // ---------------------------------------------------------------------

    /// Table of every user with their organizations and projects.
    pub async fn dump_users(&self) -> String {
        report::dump_users(&*self.state.structure.read().await, Utc::now())
    }
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("state", &self.state)
            .field("signals", &self.signals)
            .finish()
    }
}

#[async_trait]
impl UserDirectory for Conductor {
    async fn find_user(&self, id: Uuid) -> Option<User> {
        self.state.structure.read().await.user(id).ok().cloned()
    }
}

fn target_project(target: &InvitationTarget) -> Option<Uuid> {
    match target {
        InvitationTarget::Customer { .. } => None,
        InvitationTarget::Project { project_id, .. } => Some(*project_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_events::{AlertSeverity, Receiver, SignalHandler, SignalName, SignalResult};

    async fn conductor() -> (Conductor, Uuid, Uuid) {
        let conductor = Conductor::new(ConductorState::new(ConductorConfig::default())).await;
        let staff = conductor
            .register_user(User::new("staff", "staff@example.com").staff())
            .await
            .unwrap();
        let customer = conductor
            .create_customer(staff, Customer::new("Acme"))
            .await
            .unwrap()
            .id;
        (conductor, staff, customer)
    }

    #[tokio::test]
    async fn test_user_directory_lookup() {
        let (conductor, staff, _) = conductor().await;
        let user = conductor.find_user(staff).await.unwrap();
        assert_eq!(user.username, "staff");
        assert!(conductor.find_user(Uuid::now_v7()).await.is_none());
    }

    #[tokio::test]
    async fn test_account_changes_are_logged() {
        let (conductor, staff, customer) = conductor().await;
        conductor.credit_account(customer, 100.0).await.unwrap();
        let change = conductor.debit_account(customer, 30.0).await.unwrap();
        assert_eq!(change.balance, 70.0);

        let events = conductor
            .events_for(staff, &EventQuery::new().with_event_types(&["customer_account_debited"]))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_only_staff_deletes_customers() {
        let (conductor, staff, customer) = conductor().await;
        let user = conductor
            .register_user(User::new("alice", "alice@example.com"))
            .await
            .unwrap();
        let err = conductor.delete_customer(user, customer).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        conductor.delete_customer(staff, customer).await.unwrap();
    }

    /// Adds an instance to the project while its deletion is being vetted.
    struct LateInstance {
        membership_id: Uuid,
        flavor: Flavor,
    }

    #[async_trait]
    impl SignalHandler<ConductorState> for LateInstance {
        async fn handle(&self, ctx: &ConductorState, _signal: &Signal) -> SignalResult<()> {
            ctx.inventory
                .write()
                .await
                .add_instance(Instance::new(self.membership_id, "late-1", &self.flavor))
                .unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_project_delete_rechecks_instances_after_receivers() {
        let (conductor, staff, customer) = conductor().await;
        let project = conductor
            .create_project(staff, Project::new(customer, "Web"))
            .await
            .unwrap()
            .id;
        let cloud = Cloud::new(customer, "Private cloud", "https://keystone.example.com:5000/v2.0")
            .available_for_all();
        let (cloud, flavors) = conductor.add_cloud(staff, cloud).await.unwrap();
        let membership_id = conductor
            .state
            .inventory
            .read()
            .await
            .membership_for(cloud.id, project)
            .unwrap()
            .id;

        let late = LateInstance {
            membership_id,
            flavor: flavors[0].clone(),
        };
        conductor
            .signals
            .connect(
                Receiver::new("tests.late_instance", SignalName::PreDelete, Arc::new(late))
                    .from_sender(ResourceType::Project),
            )
            .await;

        let err = conductor.delete_project(staff, project).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert!(conductor.state.structure.read().await.project(project).is_ok());
    }

    #[tokio::test]
    async fn test_alerts_are_scoped() {
        let (conductor, staff, customer) = conductor().await;
        let scope = EventScope::new(ResourceType::Customer, customer);
        let request = AlertRequest::new(
            "customer_has_zero_projects",
            "Customer has no projects",
            AlertSeverity::Warning,
            scope.clone(),
        )
        .with_customer(customer);
        let (_, created) = conductor.raise_alert(request).await;
        assert!(created);

        let alice = conductor
            .register_user(User::new("alice", "alice@example.com"))
            .await
            .unwrap();
        assert!(conductor.alerts_for(alice, &AlertQuery::default()).await.unwrap().is_empty());
        assert_eq!(conductor.alerts_for(staff, &AlertQuery::default()).await.unwrap().len(), 1);

        assert!(conductor.close_alert("customer_has_zero_projects", &scope).await.is_some());
    }
}
