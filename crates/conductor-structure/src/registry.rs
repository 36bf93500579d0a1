//! In-memory structure registry
//!
//! [`Structure`] owns users, customers, projects, project groups, role grants
//! and invitations. It enforces the hierarchy rules: who may create what,
//! which quotas apply, who may grant which role, and what may be deleted.
//! It emits nothing on its own; callers turn the returned values into
//! signals.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::customer::Customer;
use crate::error::{StructureError, StructureResult};
use crate::invitation::{Invitation, InvitationState, InvitationTarget};
use crate::permission::{
    CustomerPermission, ProjectGroupPermission, ProjectPermission, RoleTable,
};
use crate::project::{Project, ProjectGroup};
use crate::quotas::QuotaName;
use crate::roles::{CustomerRole, ProjectGroupRole, ProjectRole, RoleType, ScopeKind};
use crate::user::{SshPublicKey, User};

const DENIED: &str = "You do not have permission to perform this action.";

/// Registry of the organizational hierarchy.
///
/// # Examples
///
/// ```
/// use conductor_structure::{Customer, Project, ProjectRole, Structure, User};
///
/// let mut structure = Structure::new();
/// let staff = structure.add_user_account(User::new("admin", "admin@example.com").staff()).unwrap();
/// let alice = structure.add_user_account(User::new("alice", "alice@example.com")).unwrap();
///
/// let customer = structure.create_customer(staff, Customer::new("Acme")).unwrap();
/// let project = structure.create_project(staff, Project::new(customer.id, "Web")).unwrap();
///
/// let (grant, created) = structure
///     .grant_project_role(staff, project.id, alice, ProjectRole::Manager, None)
///     .unwrap();
/// assert!(created);
/// assert_eq!(grant.role, ProjectRole::Manager);
/// ```
#[derive(Debug, Default)]
pub struct Structure {
    users: BTreeMap<Uuid, User>,
    ssh_keys: BTreeMap<Uuid, SshPublicKey>,
    customers: BTreeMap<Uuid, Customer>,
    projects: BTreeMap<Uuid, Project>,
    project_groups: BTreeMap<Uuid, ProjectGroup>,
    role_slots: HashMap<Uuid, Vec<RoleType>>,
    customer_roles: RoleTable<CustomerRole>,
    project_roles: RoleTable<ProjectRole>,
    project_group_roles: RoleTable<ProjectGroupRole>,
    invitations: BTreeMap<Uuid, Invitation>,
}

impl Structure {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    /// Register a user account. Usernames are unique.
    pub fn add_user_account(&mut self, user: User) -> StructureResult<Uuid> {
        if self.find_user_by_username(&user.username).is_some() {
            return Err(StructureError::AlreadyExists(format!(
                "User with username {} already exists",
                user.username
            )));
        }
        let id = user.id;
        self.users.insert(id, user);
        Ok(id)
    }

    /// Get a user.
    pub fn user(&self, id: Uuid) -> StructureResult<&User> {
        self.users.get(&id).ok_or(StructureError::not_found("user", id))
    }

    /// Get a user for modification.
    pub fn user_mut(&mut self, id: Uuid) -> StructureResult<&mut User> {
        self.users
            .get_mut(&id)
            .ok_or(StructureError::not_found("user", id))
    }

    /// Every user in registration order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Look a user up by username.
    pub fn find_user_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    /// Look a user up by email (case-insensitive).
    pub fn find_user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    /// Register an SSH key. A user cannot register the same key twice.
    pub fn add_ssh_key(&mut self, key: SshPublicKey) -> StructureResult<SshPublicKey> {
        self.user(key.user_id)?;
        if self
            .ssh_keys
            .values()
            .any(|k| k.user_id == key.user_id && k.fingerprint == key.fingerprint)
        {
            return Err(StructureError::AlreadyExists(
                "Key with same fingerprint already exists".to_string(),
            ));
        }
        self.ssh_keys.insert(key.id, key.clone());
        Ok(key)
    }

    /// Get an SSH key.
    pub fn ssh_key(&self, id: Uuid) -> StructureResult<&SshPublicKey> {
        self.ssh_keys
            .get(&id)
            .ok_or(StructureError::not_found("ssh_key", id))
    }

    /// Keys of a user.
    pub fn ssh_keys_of(&self, user_id: Uuid) -> Vec<&SshPublicKey> {
        self.ssh_keys
            .values()
            .filter(|k| k.user_id == user_id)
            .collect()
    }

    /// Remove an SSH key.
    pub fn remove_ssh_key(&mut self, id: Uuid) -> StructureResult<SshPublicKey> {
        self.ssh_keys
            .remove(&id)
            .ok_or(StructureError::not_found("ssh_key", id))
    }

    // ---------------------------------------------------------------------
    // Customers
    // ---------------------------------------------------------------------

    /// Create a customer. Only staff can create customers.
    pub fn create_customer(&mut self, actor_id: Uuid, customer: Customer) -> StructureResult<Customer> {
        if !self.user(actor_id)?.is_staff {
            return Err(StructureError::PermissionDenied(
                "Only staff users can create customers.".to_string(),
            ));
        }
        if customer.name.trim().is_empty() {
            return Err(StructureError::validation("name", "This field may not be blank."));
        }
        self.ensure_role_slots(ScopeKind::Customer, customer.id);
        info!(customer_id = %customer.id, name = %customer.name, "Customer created");
        self.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    /// Get a customer.
    pub fn customer(&self, id: Uuid) -> StructureResult<&Customer> {
        self.customers
            .get(&id)
            .ok_or(StructureError::not_found("customer", id))
    }

    /// Get a customer for modification.
    pub fn customer_mut(&mut self, id: Uuid) -> StructureResult<&mut Customer> {
        self.customers
            .get_mut(&id)
            .ok_or(StructureError::not_found("customer", id))
    }

    /// Every customer in creation order.
    pub fn customers(&self) -> impl Iterator<Item = &Customer> {
        self.customers.values()
    }

    /// Delete a customer without projects. Only staff can delete customers.
    ///
    /// Empty project groups of the customer and every customer role grant
    /// are removed with it.
    pub fn delete_customer(&mut self, actor_id: Uuid, id: Uuid) -> StructureResult<Customer> {
        if !self.user(actor_id)?.is_staff {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        self.customer(id)?;
        if self.projects.values().any(|p| p.customer_id == id) {
            return Err(StructureError::Conflict(
                "Cannot delete customer with existing projects".to_string(),
            ));
        }
        let group_ids: Vec<Uuid> = self
            .project_groups
            .values()
            .filter(|g| g.customer_id == id)
            .map(|g| g.id)
            .collect();
        for group_id in group_ids {
            self.project_group_roles.revoke_scope(group_id);
            self.role_slots.remove(&group_id);
            self.project_groups.remove(&group_id);
        }
        self.customer_roles.revoke_scope(id);
        self.role_slots.remove(&id);
        let customer = self
            .customers
            .remove(&id)
            .ok_or(StructureError::not_found("customer", id))?;
        info!(customer_id = %id, "Customer deleted");
        Ok(customer)
    }

    // ---------------------------------------------------------------------
    // Projects
    // ---------------------------------------------------------------------

    /// Whether the actor may create projects for the customer.
    pub fn can_create_project(&self, actor_id: Uuid, customer_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.user(actor_id) {
            Ok(actor) if actor.is_staff => true,
            Ok(_) => self.has_customer_user(customer_id, actor_id, Some(CustomerRole::Owner), now),
            Err(_) => false,
        }
    }

    /// Create a project under its customer.
    ///
    /// The actor must be staff or a customer owner and the customer's
    /// `nc_project_count` quota must allow one more project.
    pub fn create_project(&mut self, actor_id: Uuid, project: Project) -> StructureResult<Project> {
        let customer = self.customer(project.customer_id)?;
        if !self.can_create_project(actor_id, project.customer_id, Utc::now()) {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        customer
            .quotas
            .validate_quota_change(&[(QuotaName::NcProjectCount, 1.0)])?;
        if project.name.trim().is_empty() {
            return Err(StructureError::validation("name", "This field may not be blank."));
        }

        self.customer_mut(project.customer_id)?
            .quotas
            .add_usage(QuotaName::NcProjectCount, 1.0);
        self.ensure_role_slots(ScopeKind::Project, project.id);
        info!(project_id = %project.id, customer_id = %project.customer_id, "Project created");
        self.projects.insert(project.id, project.clone());
        Ok(project)
    }

    /// Get a project.
    pub fn project(&self, id: Uuid) -> StructureResult<&Project> {
        self.projects
            .get(&id)
            .ok_or(StructureError::not_found("project", id))
    }

    /// Get a project for modification.
    pub fn project_mut(&mut self, id: Uuid) -> StructureResult<&mut Project> {
        self.projects
            .get_mut(&id)
            .ok_or(StructureError::not_found("project", id))
    }

    /// Every project in creation order.
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    /// Projects of a customer.
    pub fn projects_of_customer(&self, customer_id: Uuid) -> Vec<&Project> {
        self.projects
            .values()
            .filter(|p| p.customer_id == customer_id)
            .collect()
    }

    /// Revoke every project role. Runs before project deletion.
    pub fn revoke_project_roles(&mut self, project_id: Uuid) -> Vec<ProjectPermission> {
        let revoked = self.project_roles.revoke_scope(project_id);
        debug!(project_id = %project_id, count = revoked.len(), "Project roles revoked");
        revoked
    }

    /// Delete a project.
    ///
    /// The project leaves every group, remaining roles are revoked and the
    /// customer's `nc_project_count` usage is released.
    pub fn delete_project(&mut self, id: Uuid) -> StructureResult<Project> {
        let project = self
            .projects
            .remove(&id)
            .ok_or(StructureError::not_found("project", id))?;
        self.project_roles.revoke_scope(id);
        self.role_slots.remove(&id);
        for group in self.project_groups.values_mut() {
            group.project_ids.remove(&id);
        }
        if let Some(customer) = self.customers.get_mut(&project.customer_id) {
            customer.quotas.add_usage(QuotaName::NcProjectCount, -1.0);
        }
        info!(project_id = %id, "Project deleted");
        Ok(project)
    }

    // ---------------------------------------------------------------------
    // Project groups
    // ---------------------------------------------------------------------

    /// Create a project group. The actor must be staff or a customer owner.
    pub fn create_project_group(
        &mut self,
        actor_id: Uuid,
        group: ProjectGroup,
    ) -> StructureResult<ProjectGroup> {
        self.customer(group.customer_id)?;
        if !self.can_create_project(actor_id, group.customer_id, Utc::now()) {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        for project_id in &group.project_ids {
            self.check_same_customer(group.customer_id, *project_id)?;
        }
        self.ensure_role_slots(ScopeKind::ProjectGroup, group.id);
        info!(project_group_id = %group.id, "Project group created");
        self.project_groups.insert(group.id, group.clone());
        Ok(group)
    }

    /// Get a project group.
    pub fn project_group(&self, id: Uuid) -> StructureResult<&ProjectGroup> {
        self.project_groups
            .get(&id)
            .ok_or(StructureError::not_found("project_group", id))
    }

    /// Every project group in creation order.
    pub fn project_groups(&self) -> impl Iterator<Item = &ProjectGroup> {
        self.project_groups.values()
    }

    /// Groups containing a project.
    pub fn groups_of_project(&self, project_id: Uuid) -> Vec<Uuid> {
        self.project_groups
            .values()
            .filter(|g| g.contains(project_id))
            .map(|g| g.id)
            .collect()
    }

    /// Put a project into a group of the same customer.
    pub fn add_project_to_group(&mut self, group_id: Uuid, project_id: Uuid) -> StructureResult<()> {
        let customer_id = self.project_group(group_id)?.customer_id;
        self.check_same_customer(customer_id, project_id)?;
        if let Some(group) = self.project_groups.get_mut(&group_id) {
            group.project_ids.insert(project_id);
        }
        Ok(())
    }

    /// Take a project out of a group.
    pub fn remove_project_from_group(&mut self, group_id: Uuid, project_id: Uuid) -> StructureResult<()> {
        let group = self
            .project_groups
            .get_mut(&group_id)
            .ok_or(StructureError::not_found("project_group", group_id))?;
        group.project_ids.remove(&project_id);
        Ok(())
    }

    /// Veto deletion of a group that still has projects.
    pub fn ensure_project_group_empty(&self, group_id: Uuid) -> StructureResult<()> {
        if !self.project_group(group_id)?.is_empty() {
            return Err(StructureError::Conflict(
                "Cannot delete project group with existing projects".to_string(),
            ));
        }
        Ok(())
    }

    /// Delete an empty project group.
    pub fn delete_project_group(&mut self, group_id: Uuid) -> StructureResult<ProjectGroup> {
        self.ensure_project_group_empty(group_id)?;
        self.project_group_roles.revoke_scope(group_id);
        self.role_slots.remove(&group_id);
        let group = self
            .project_groups
            .remove(&group_id)
            .ok_or(StructureError::not_found("project_group", group_id))?;
        info!(project_group_id = %group_id, "Project group deleted");
        Ok(group)
    }

    fn check_same_customer(&self, customer_id: Uuid, project_id: Uuid) -> StructureResult<()> {
        if self.project(project_id)?.customer_id != customer_id {
            return Err(StructureError::validation(
                "project",
                "Project and project group must belong to the same customer.",
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Role slots
    // ---------------------------------------------------------------------

    /// Create the role slots of a scope if missing.
    ///
    /// # Returns
    ///
    /// `true` if the slots were created by this call
    pub fn ensure_role_slots(&mut self, kind: ScopeKind, scope_id: Uuid) -> bool {
        if self.role_slots.contains_key(&scope_id) {
            return false;
        }
        self.role_slots.insert(scope_id, RoleType::all_for(kind));
        debug!(scope = %kind, scope_id = %scope_id, "Role slots created");
        true
    }

    /// Roles that can be granted on a scope.
    pub fn role_slots(&self, scope_id: Uuid) -> &[RoleType] {
        self.role_slots
            .get(&scope_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn check_slot(&self, scope_id: Uuid, role: RoleType) -> StructureResult<()> {
        if !self.role_slots(scope_id).contains(&role) {
            return Err(StructureError::validation(
                "role",
                format!("Role {role} is not available for this {}.", role.scope_kind()),
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Low level grants
    // ---------------------------------------------------------------------

    /// Grant a customer role without permission checks.
    pub fn add_customer_user(
        &mut self,
        customer_id: Uuid,
        user_id: Uuid,
        role: CustomerRole,
        created_by: Option<Uuid>,
        expiration_time: Option<DateTime<Utc>>,
    ) -> StructureResult<(CustomerPermission, bool)> {
        self.customer(customer_id)?;
        self.user(user_id)?;
        self.check_slot(customer_id, role.into())?;
        Ok(self
            .customer_roles
            .add(customer_id, user_id, role, created_by, expiration_time))
    }

    /// Revoke customer roles of a user without permission checks.
    pub fn remove_customer_user(
        &mut self,
        customer_id: Uuid,
        user_id: Uuid,
        role: Option<CustomerRole>,
    ) -> Vec<CustomerPermission> {
        self.customer_roles.remove(customer_id, user_id, role)
    }

    /// Whether the user holds a valid customer role.
    pub fn has_customer_user(
        &self,
        customer_id: Uuid,
        user_id: Uuid,
        role: Option<CustomerRole>,
        now: DateTime<Utc>,
    ) -> bool {
        self.customer_roles.has(customer_id, user_id, role, now)
    }

    /// Grant a project role without permission checks.
    pub fn add_project_user(
        &mut self,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
        created_by: Option<Uuid>,
        expiration_time: Option<DateTime<Utc>>,
    ) -> StructureResult<(ProjectPermission, bool)> {
        self.project(project_id)?;
        self.user(user_id)?;
        self.check_slot(project_id, role.into())?;
        Ok(self
            .project_roles
            .add(project_id, user_id, role, created_by, expiration_time))
    }

    /// Revoke project roles of a user without permission checks.
    pub fn remove_project_user(
        &mut self,
        project_id: Uuid,
        user_id: Uuid,
        role: Option<ProjectRole>,
    ) -> Vec<ProjectPermission> {
        self.project_roles.remove(project_id, user_id, role)
    }

    /// Whether the user holds a valid project role.
    pub fn has_project_user(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        role: Option<ProjectRole>,
        now: DateTime<Utc>,
    ) -> bool {
        self.project_roles.has(project_id, user_id, role, now)
    }

    /// Grant a project group role without permission checks.
    pub fn add_project_group_user(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        role: ProjectGroupRole,
        created_by: Option<Uuid>,
    ) -> StructureResult<(ProjectGroupPermission, bool)> {
        self.project_group(group_id)?;
        self.user(user_id)?;
        self.check_slot(group_id, role.into())?;
        Ok(self
            .project_group_roles
            .add(group_id, user_id, role, created_by, None))
    }

    /// Revoke project group roles of a user without permission checks.
    pub fn remove_project_group_user(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        role: Option<ProjectGroupRole>,
    ) -> Vec<ProjectGroupPermission> {
        self.project_group_roles.remove(group_id, user_id, role)
    }

    /// Whether the user holds a valid project group role.
    pub fn has_project_group_user(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        role: Option<ProjectGroupRole>,
        now: DateTime<Utc>,
    ) -> bool {
        self.project_group_roles.has(group_id, user_id, role, now)
    }

    /// Customer role grants, including the revoked ones.
    pub fn customer_roles(&self) -> &RoleTable<CustomerRole> {
        &self.customer_roles
    }

    /// Project role grants, including the revoked ones.
    pub fn project_roles(&self) -> &RoleTable<ProjectRole> {
        &self.project_roles
    }

    /// Project group role grants, including the revoked ones.
    pub fn project_group_roles(&self) -> &RoleTable<ProjectGroupRole> {
        &self.project_group_roles
    }

    // ---------------------------------------------------------------------
    // Membership queries
    // ---------------------------------------------------------------------

    /// Users holding a valid role on the customer, its projects or its groups.
    pub fn customer_users(&self, customer_id: Uuid, now: DateTime<Utc>) -> Vec<&User> {
        let mut ids: BTreeSet<Uuid> = self
            .customer_roles
            .valid_for_scope(customer_id, now)
            .map(|g| g.user_id)
            .collect();
        for project in self.projects_of_customer(customer_id) {
            ids.extend(
                self.project_roles
                    .valid_for_scope(project.id, now)
                    .map(|g| g.user_id),
            );
        }
        for group in self
            .project_groups
            .values()
            .filter(|g| g.customer_id == customer_id)
        {
            ids.extend(
                self.project_group_roles
                    .valid_for_scope(group.id, now)
                    .map(|g| g.user_id),
            );
        }
        ids.iter().filter_map(|id| self.users.get(id)).collect()
    }

    /// Users holding a valid role on the project.
    pub fn project_users(&self, project_id: Uuid, now: DateTime<Utc>) -> Vec<&User> {
        let ids: BTreeSet<Uuid> = self
            .project_roles
            .valid_for_scope(project_id, now)
            .map(|g| g.user_id)
            .collect();
        ids.iter().filter_map(|id| self.users.get(id)).collect()
    }

    /// Recount `nc_user_count` of a customer from its valid grants.
    ///
    /// # Returns
    ///
    /// The new usage
    pub fn sync_customer_user_count(&mut self, customer_id: Uuid, now: DateTime<Utc>) -> StructureResult<f64> {
        let count = self.customer_users(customer_id, now).len() as f64;
        self.customer_mut(customer_id)?
            .quotas
            .set_usage(QuotaName::NcUserCount, count);
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // Role management
    // ---------------------------------------------------------------------

    /// Whether the actor may grant or revoke customer roles.
    ///
    /// Staff always can. A customer owner can if their own grant lasts at
    /// least until `expiration_time`.
    pub fn can_manage_customer_role(
        &self,
        actor_id: Uuid,
        customer_id: Uuid,
        expiration_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.user(actor_id).map(|u| u.is_staff).unwrap_or(false) {
            return true;
        }
        self.customer_roles
            .valid_for_scope(customer_id, now)
            .any(|g| g.user_id == actor_id && g.covers(expiration_time))
    }

    /// Whether the actor may grant or revoke `role` on the project.
    ///
    /// Staff and customer owners always can. A project manager can manage
    /// the administrator role when their own grant lasts at least until
    /// `expiration_time`.
    pub fn can_manage_project_role(
        &self,
        actor_id: Uuid,
        project_id: Uuid,
        role: ProjectRole,
        expiration_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let Ok(project) = self.project(project_id) else {
            return false;
        };
        if self.can_manage_customer_role(actor_id, project.customer_id, expiration_time, now) {
            return true;
        }
        role == ProjectRole::Administrator
            && self
                .project_roles
                .valid_for_scope(project_id, now)
                .any(|g| {
                    g.user_id == actor_id
                        && g.role == ProjectRole::Manager
                        && g.covers(expiration_time)
                })
    }

    /// Whether the actor may grant or revoke project group roles.
    pub fn can_manage_project_group_role(&self, actor_id: Uuid, group_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.project_group(group_id) {
            Ok(group) => self.can_manage_customer_role(actor_id, group.customer_id, None, now),
            Err(_) => false,
        }
    }

    fn check_expiration(expiration_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> StructureResult<()> {
        match expiration_time {
            Some(exp) if exp <= now => Err(StructureError::validation(
                "expiration_time",
                "Expiration time should be greater than current time",
            )),
            _ => Ok(()),
        }
    }

    fn check_user_quota(&self, customer_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> StructureResult<()> {
        let is_member = self
            .customer_users(customer_id, now)
            .iter()
            .any(|u| u.id == user_id);
        if !is_member {
            self.customer(customer_id)?
                .quotas
                .validate_quota_change(&[(QuotaName::NcUserCount, 1.0)])?;
        }
        Ok(())
    }

    /// Grant a customer role on behalf of the actor.
    pub fn grant_customer_role(
        &mut self,
        actor_id: Uuid,
        customer_id: Uuid,
        user_id: Uuid,
        role: CustomerRole,
        expiration_time: Option<DateTime<Utc>>,
    ) -> StructureResult<(CustomerPermission, bool)> {
        let now = Utc::now();
        self.customer(customer_id)?;
        if !self.can_manage_customer_role(actor_id, customer_id, expiration_time, now) {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        Self::check_expiration(expiration_time, now)?;
        self.check_user_quota(customer_id, user_id, now)?;
        self.add_customer_user(customer_id, user_id, role, Some(actor_id), expiration_time)
    }

    /// Grant a project role on behalf of the actor.
    pub fn grant_project_role(
        &mut self,
        actor_id: Uuid,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
        expiration_time: Option<DateTime<Utc>>,
    ) -> StructureResult<(ProjectPermission, bool)> {
        let now = Utc::now();
        let customer_id = self.project(project_id)?.customer_id;
        if !self.can_manage_project_role(actor_id, project_id, role, expiration_time, now) {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        Self::check_expiration(expiration_time, now)?;
        self.check_user_quota(customer_id, user_id, now)?;
        self.add_project_user(project_id, user_id, role, Some(actor_id), expiration_time)
    }

    /// Grant a project group role on behalf of the actor.
    pub fn grant_project_group_role(
        &mut self,
        actor_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
        role: ProjectGroupRole,
    ) -> StructureResult<(ProjectGroupPermission, bool)> {
        let now = Utc::now();
        let customer_id = self.project_group(group_id)?.customer_id;
        if !self.can_manage_project_group_role(actor_id, group_id, now) {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        self.check_user_quota(customer_id, user_id, now)?;
        self.add_project_group_user(group_id, user_id, role, Some(actor_id))
    }

    /// Change the expiration of a customer grant. Users cannot change their own grants.
    pub fn update_customer_permission_expiration(
        &mut self,
        actor_id: Uuid,
        permission_id: Uuid,
        expiration_time: Option<DateTime<Utc>>,
    ) -> StructureResult<CustomerPermission> {
        let now = Utc::now();
        let grant = self
            .customer_roles
            .get(permission_id)
            .ok_or(StructureError::not_found("customer_permission", permission_id))?;
        if grant.user_id == actor_id
            || !self.can_manage_customer_role(actor_id, grant.scope_id, expiration_time, now)
        {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        Self::check_expiration(expiration_time, now)?;
        let grant = self
            .customer_roles
            .get_mut(permission_id)
            .ok_or(StructureError::not_found("customer_permission", permission_id))?;
        grant.expiration_time = expiration_time;
        Ok(grant.clone())
    }

    /// Change the expiration of a project grant. Users cannot change their own grants.
    pub fn update_project_permission_expiration(
        &mut self,
        actor_id: Uuid,
        permission_id: Uuid,
        expiration_time: Option<DateTime<Utc>>,
    ) -> StructureResult<ProjectPermission> {
        let now = Utc::now();
        let grant = self
            .project_roles
            .get(permission_id)
            .ok_or(StructureError::not_found("project_permission", permission_id))?;
        if grant.user_id == actor_id
            || !self.can_manage_project_role(actor_id, grant.scope_id, grant.role, expiration_time, now)
        {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        Self::check_expiration(expiration_time, now)?;
        let grant = self
            .project_roles
            .get_mut(permission_id)
            .ok_or(StructureError::not_found("project_permission", permission_id))?;
        grant.expiration_time = expiration_time;
        Ok(grant.clone())
    }

    /// Revoke customer roles on behalf of the actor.
    pub fn revoke_customer_role(
        &mut self,
        actor_id: Uuid,
        customer_id: Uuid,
        user_id: Uuid,
        role: Option<CustomerRole>,
    ) -> StructureResult<Vec<CustomerPermission>> {
        self.customer(customer_id)?;
        if !self.can_manage_customer_role(actor_id, customer_id, None, Utc::now()) {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        Ok(self.remove_customer_user(customer_id, user_id, role))
    }

    /// Revoke a project role on behalf of the actor.
    pub fn revoke_project_role(
        &mut self,
        actor_id: Uuid,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> StructureResult<Vec<ProjectPermission>> {
        self.project(project_id)?;
        let now = Utc::now();
        // a finite manager grant still allows revoking administrators
        let allowed = self.can_manage_project_role(actor_id, project_id, role, Some(now), now);
        if !allowed {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        Ok(self.remove_project_user(project_id, user_id, Some(role)))
    }

    /// Revoke project group roles on behalf of the actor.
    pub fn revoke_project_group_role(
        &mut self,
        actor_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
        role: Option<ProjectGroupRole>,
    ) -> StructureResult<Vec<ProjectGroupPermission>> {
        if !self.can_manage_project_group_role(actor_id, group_id, Utc::now()) {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        Ok(self.remove_project_group_user(group_id, user_id, role))
    }

    // ---------------------------------------------------------------------
    // Invitations
    // ---------------------------------------------------------------------

    /// Register an invitation created by the actor.
    ///
    /// The actor must be allowed to grant the offered role and a project
    /// target must belong to the invitation's customer.
    pub fn add_invitation(&mut self, actor_id: Uuid, invitation: Invitation) -> StructureResult<Invitation> {
        let now = Utc::now();
        self.customer(invitation.customer_id)?;
        let allowed = match invitation.target {
            InvitationTarget::Customer { .. } => {
                self.can_manage_customer_role(actor_id, invitation.customer_id, None, now)
            }
            InvitationTarget::Project { project_id, role } => {
                if self.project(project_id)?.customer_id != invitation.customer_id {
                    return Err(StructureError::validation(
                        "project",
                        "Project and customer mismatch.",
                    ));
                }
                self.can_manage_project_role(actor_id, project_id, role, None, now)
            }
        };
        if !allowed {
            return Err(StructureError::PermissionDenied(DENIED.to_string()));
        }
        if !invitation.email.contains('@') {
            return Err(StructureError::validation("email", "Enter a valid email address."));
        }
        let invitation = Invitation {
            created_by: Some(actor_id),
            ..invitation
        };
        self.invitations.insert(invitation.id, invitation.clone());
        Ok(invitation)
    }

    /// Get an invitation.
    pub fn invitation(&self, id: Uuid) -> StructureResult<&Invitation> {
        self.invitations
            .get(&id)
            .ok_or(StructureError::not_found("invitation", id))
    }

    /// Every invitation in creation order.
    pub fn invitations(&self) -> impl Iterator<Item = &Invitation> {
        self.invitations.values()
    }

    /// Store the last delivery error of an invitation.
    pub fn set_invitation_error(&mut self, id: Uuid, message: impl Into<String>) -> StructureResult<()> {
        let invitation = self
            .invitations
            .get_mut(&id)
            .ok_or(StructureError::not_found("invitation", id))?;
        invitation.error_message = message.into();
        Ok(())
    }

    /// Accept a pending invitation and grant the offered role to the user.
    ///
    /// The grant goes through the same user quota check as a direct grant.
    ///
    /// # Returns
    ///
    /// The accepted invitation, the offered role and whether a new grant
    /// was created
    pub fn accept_invitation(
        &mut self,
        id: Uuid,
        user_id: Uuid,
    ) -> StructureResult<(Invitation, RoleType, bool)> {
        let invitation = self.invitation(id)?.clone();
        if invitation.state != InvitationState::Pending {
            return Err(StructureError::Conflict(format!(
                "Invitation is {} and cannot be accepted.",
                invitation.state.as_str()
            )));
        }
        self.user(user_id)?;
        self.check_user_quota(invitation.customer_id, user_id, Utc::now())?;
        let created = match invitation.target {
            InvitationTarget::Customer { role } => {
                self.add_customer_user(invitation.customer_id, user_id, role, invitation.created_by, None)?
                    .1
            }
            InvitationTarget::Project { project_id, role } => {
                self.add_project_user(project_id, user_id, role, invitation.created_by, None)?
                    .1
            }
        };
        let stored = self
            .invitations
            .get_mut(&id)
            .ok_or(StructureError::not_found("invitation", id))?;
        stored.accept()?;
        info!(invitation_id = %id, user_id = %user_id, created, "Invitation accepted");
        Ok((stored.clone(), invitation.target.role_type(), created))
    }

    /// Expire every pending invitation older than `lifetime`.
    ///
    /// # Returns
    ///
    /// The invitations that were expired by this call
    pub fn expire_invitations(&mut self, now: DateTime<Utc>, lifetime: Duration) -> Vec<Invitation> {
        let mut expired = Vec::new();
        for invitation in self.invitations.values_mut() {
            if invitation.is_expired(now, lifetime) && invitation.expire().is_ok() {
                expired.push(invitation.clone());
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        structure: Structure,
        staff: Uuid,
        owner: Uuid,
        manager: Uuid,
        admin: Uuid,
        outsider: Uuid,
        customer: Uuid,
        project: Uuid,
    }

    fn fixture() -> Fixture {
        let mut structure = Structure::new();
        let staff = structure
            .add_user_account(User::new("staff", "staff@example.com").staff())
            .unwrap();
        let owner = structure.add_user_account(User::new("owner", "owner@example.com")).unwrap();
        let manager = structure
            .add_user_account(User::new("manager", "manager@example.com"))
            .unwrap();
        let admin = structure.add_user_account(User::new("admin", "admin@example.com")).unwrap();
        let outsider = structure
            .add_user_account(User::new("outsider", "outsider@example.com"))
            .unwrap();

        let customer = structure.create_customer(staff, Customer::new("Acme")).unwrap().id;
        structure
            .grant_customer_role(staff, customer, owner, CustomerRole::Owner, None)
            .unwrap();
        let project = structure
            .create_project(owner, Project::new(customer, "Web"))
            .unwrap()
            .id;
        structure
            .grant_project_role(owner, project, manager, ProjectRole::Manager, None)
            .unwrap();

        Fixture {
            structure,
            staff,
            owner,
            manager,
            admin,
            outsider,
            customer,
            project,
        }
    }

    #[test]
    fn test_username_is_unique() {
        let mut structure = Structure::new();
        structure.add_user_account(User::new("alice", "a@x")).unwrap();
        assert!(matches!(
            structure.add_user_account(User::new("alice", "b@x")),
            Err(StructureError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_only_staff_creates_customers() {
        let mut f = fixture();
        let err = f
            .structure
            .create_customer(f.owner, Customer::new("Other"))
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_project_creation_rules() {
        let mut f = fixture();
        let err = f
            .structure
            .create_project(f.manager, Project::new(f.customer, "Nope"))
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        assert_eq!(
            f.structure
                .customer(f.customer)
                .unwrap()
                .quotas
                .usage(QuotaName::NcProjectCount),
            1.0
        );
        f.structure
            .customer_mut(f.customer)
            .unwrap()
            .quotas
            .set_limit(QuotaName::NcProjectCount, 1.0);
        let err = f
            .structure
            .create_project(f.staff, Project::new(f.customer, "Second"))
            .unwrap_err();
        assert!(matches!(err, StructureError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_project_gets_role_slots() {
        let f = fixture();
        assert_eq!(
            f.structure.role_slots(f.project),
            &[
                RoleType::Project(ProjectRole::Administrator),
                RoleType::Project(ProjectRole::Manager)
            ]
        );
    }

    #[test]
    fn test_manager_grants_administrator_only() {
        let mut f = fixture();
        let (_, created) = f
            .structure
            .grant_project_role(f.manager, f.project, f.admin, ProjectRole::Administrator, None)
            .unwrap();
        assert!(created);

        let err = f
            .structure
            .grant_project_role(f.manager, f.project, f.outsider, ProjectRole::Manager, None)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let err = f
            .structure
            .grant_project_role(f.admin, f.project, f.outsider, ProjectRole::Administrator, None)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_finite_manager_cannot_grant_longer() {
        let mut f = fixture();
        let now = Utc::now();
        let temp = f
            .structure
            .add_user_account(User::new("temp", "temp@example.com"))
            .unwrap();
        f.structure
            .grant_project_role(
                f.owner,
                f.project,
                temp,
                ProjectRole::Manager,
                Some(now + Duration::days(1)),
            )
            .unwrap();

        assert!(f.structure.can_manage_project_role(
            temp,
            f.project,
            ProjectRole::Administrator,
            Some(now + Duration::hours(1)),
            now
        ));
        assert!(!f.structure.can_manage_project_role(
            temp,
            f.project,
            ProjectRole::Administrator,
            None,
            now
        ));
        assert!(!f.structure.can_manage_project_role(
            temp,
            f.project,
            ProjectRole::Administrator,
            Some(now + Duration::days(2)),
            now
        ));
    }

    #[test]
    fn test_grant_is_unique() {
        let mut f = fixture();
        let (first, _) = f
            .structure
            .grant_project_role(f.owner, f.project, f.admin, ProjectRole::Administrator, None)
            .unwrap();
        let (second, created) = f
            .structure
            .grant_project_role(f.staff, f.project, f.admin, ProjectRole::Administrator, None)
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_expiration_in_past_is_rejected() {
        let mut f = fixture();
        let err = f
            .structure
            .grant_customer_role(
                f.staff,
                f.customer,
                f.admin,
                CustomerRole::Owner,
                Some(Utc::now() - Duration::hours(1)),
            )
            .unwrap_err();
        assert!(matches!(err, StructureError::Validation { field: "expiration_time", .. }));
    }

    #[test]
    fn test_user_quota() {
        let mut f = fixture();
        // owner and manager already count
        f.structure
            .customer_mut(f.customer)
            .unwrap()
            .quotas
            .set_limit(QuotaName::NcUserCount, 2.0);
        f.structure.sync_customer_user_count(f.customer, Utc::now()).unwrap();

        let err = f
            .structure
            .grant_project_role(f.owner, f.project, f.admin, ProjectRole::Administrator, None)
            .unwrap_err();
        assert!(matches!(err, StructureError::QuotaExceeded { name: QuotaName::NcUserCount, .. }));

        // existing members do not consume quota
        f.structure
            .grant_project_role(f.owner, f.project, f.manager, ProjectRole::Administrator, None)
            .unwrap();
    }

    #[test]
    fn test_cannot_update_own_permission() {
        let mut f = fixture();
        let grant_id = f
            .structure
            .project_roles()
            .find(f.project, f.manager, Some(ProjectRole::Manager))
            .unwrap()
            .id;
        let err = f
            .structure
            .update_project_permission_expiration(f.manager, grant_id, None)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let later = Utc::now() + Duration::days(3);
        let updated = f
            .structure
            .update_project_permission_expiration(f.owner, grant_id, Some(later))
            .unwrap();
        assert_eq!(updated.expiration_time, Some(later));
    }

    #[test]
    fn test_customer_users_includes_project_members() {
        let f = fixture();
        let mut names: Vec<&str> = f
            .structure
            .customer_users(f.customer, Utc::now())
            .iter()
            .map(|u| u.username.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["manager", "owner"]);
        assert_eq!(f.structure.project_users(f.project, Utc::now()).len(), 1);
    }

    #[test]
    fn test_revoke_project_role_keeps_log() {
        let mut f = fixture();
        let revoked = f
            .structure
            .revoke_project_role(f.owner, f.project, f.manager, ProjectRole::Manager)
            .unwrap();
        assert_eq!(revoked.len(), 1);
        assert!(!f
            .structure
            .has_project_user(f.project, f.manager, None, Utc::now()));
        assert_eq!(f.structure.project_roles().log(Some(f.project)).count(), 1);
    }

    #[test]
    fn test_project_group_deletion() {
        let mut f = fixture();
        let group = f
            .structure
            .create_project_group(f.owner, ProjectGroup::new(f.customer, "Ops"))
            .unwrap();
        f.structure.add_project_to_group(group.id, f.project).unwrap();
        assert_eq!(f.structure.groups_of_project(f.project), vec![group.id]);

        let err = f.structure.delete_project_group(group.id).unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete project group with existing projects");

        f.structure.remove_project_from_group(group.id, f.project).unwrap();
        f.structure.delete_project_group(group.id).unwrap();
    }

    #[test]
    fn test_group_rejects_foreign_project() {
        let mut f = fixture();
        let other = f.structure.create_customer(f.staff, Customer::new("Other")).unwrap();
        let group = f
            .structure
            .create_project_group(f.staff, ProjectGroup::new(other.id, "Ops"))
            .unwrap();
        assert!(f.structure.add_project_to_group(group.id, f.project).is_err());
    }

    #[test]
    fn test_delete_customer_with_projects() {
        let mut f = fixture();
        let err = f.structure.delete_customer(f.staff, f.customer).unwrap_err();
        assert_eq!(err.status_code(), 409);

        f.structure.revoke_project_roles(f.project);
        f.structure.delete_project(f.project).unwrap();
        assert_eq!(
            f.structure
                .customer(f.customer)
                .unwrap()
                .quotas
                .usage(QuotaName::NcProjectCount),
            0.0
        );
        f.structure.delete_customer(f.staff, f.customer).unwrap();
        assert!(f.structure.customer(f.customer).is_err());
    }

    #[test]
    fn test_invitation_accept_grants_role() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.manager,
                Invitation::for_project(
                    f.customer,
                    f.project,
                    ProjectRole::Administrator,
                    "admin@example.com",
                    "https://example.com/{uuid}",
                ),
            )
            .unwrap();
        assert_eq!(invitation.created_by, Some(f.manager));

        let (accepted, role, created) = f.structure.accept_invitation(invitation.id, f.admin).unwrap();
        assert_eq!(accepted.state, InvitationState::Accepted);
        assert_eq!(role, RoleType::Project(ProjectRole::Administrator));
        assert!(created);
        assert!(f.structure.has_project_user(
            f.project,
            f.admin,
            Some(ProjectRole::Administrator),
            Utc::now()
        ));

        assert!(f.structure.accept_invitation(invitation.id, f.admin).is_err());
    }

    #[test]
    fn test_invitation_accept_checks_user_quota() {
        let mut f = fixture();
        // owner and manager already count
        f.structure
            .customer_mut(f.customer)
            .unwrap()
            .quotas
            .set_limit(QuotaName::NcUserCount, 2.0);
        f.structure.sync_customer_user_count(f.customer, Utc::now()).unwrap();
        let invitation = f
            .structure
            .add_invitation(
                f.owner,
                Invitation::for_customer(f.customer, CustomerRole::Owner, "admin@example.com", "{uuid}"),
            )
            .unwrap();

        let err = f.structure.accept_invitation(invitation.id, f.admin).unwrap_err();
        assert!(matches!(err, StructureError::QuotaExceeded { .. }));
        assert!(!f.structure.has_customer_user(f.customer, f.admin, None, Utc::now()));
        assert_eq!(
            f.structure.invitation(invitation.id).unwrap().state,
            InvitationState::Pending
        );

        // existing members do not need a free slot
        let (_, _, created) = f.structure.accept_invitation(invitation.id, f.manager).unwrap();
        assert!(created);
    }

    #[test]
    fn test_accepting_held_role_creates_nothing() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.staff,
                Invitation::for_customer(f.customer, CustomerRole::Owner, "owner@example.com", "{uuid}"),
            )
            .unwrap();
        let (_, _, created) = f.structure.accept_invitation(invitation.id, f.owner).unwrap();
        assert!(!created);
        assert_eq!(
            f.structure
                .customer_roles()
                .valid_for_scope(f.customer, Utc::now())
                .filter(|g| g.user_id == f.owner)
                .count(),
            1
        );
    }

    #[test]
    fn test_manager_cannot_invite_owner() {
        let mut f = fixture();
        let err = f
            .structure
            .add_invitation(
                f.manager,
                Invitation::for_customer(f.customer, CustomerRole::Owner, "x@example.com", "{uuid}"),
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_expire_invitations() {
        let mut f = fixture();
        let invitation = f
            .structure
            .add_invitation(
                f.owner,
                Invitation::for_customer(f.customer, CustomerRole::Owner, "x@example.com", "{uuid}"),
            )
            .unwrap();
        let lifetime = Duration::days(7);

        assert!(f.structure.expire_invitations(Utc::now(), lifetime).is_empty());
        let expired = f
            .structure
            .expire_invitations(invitation.created_at + Duration::days(8), lifetime);
        assert_eq!(expired.len(), 1);
        assert_eq!(
            f.structure.invitation(invitation.id).unwrap().state,
            InvitationState::Expired
        );
    }

    #[test]
    fn test_duplicate_ssh_key() {
        let mut f = fixture();
        let line = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGFiY2RlZmdoaWprbG1ub3BxcnN0dXZ3eHl6MDEyMzQ1";
        f.structure
            .add_ssh_key(SshPublicKey::new(f.admin, "a", line).unwrap())
            .unwrap();
        assert!(f
            .structure
            .add_ssh_key(SshPublicKey::new(f.admin, "b", line).unwrap())
            .is_err());
        assert_eq!(f.structure.ssh_keys_of(f.admin).len(), 1);
    }
}
