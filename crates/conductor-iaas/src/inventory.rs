//! In-memory IaaS inventory
//!
//! [`Inventory`] owns clouds, their project links, flavors, security groups,
//! instances and IP mappings. [`InventoryView`] pairs it with the structure
//! registry so every entity can derive its permission scope:
//!
//! ```text
//! Cloud ───────────── customer, linked projects, groups of customer projects
//! Membership ──────── cloud.customer, project, project groups
//! Flavor ──────────── linked projects of the cloud (and their customers/groups)
//! SecurityGroup ──┐
//! Instance ───────┴── membership.project
//! IpMapping ───────── project
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use conductor_rbac::{Action, ResourceType, ScopePath, ScopeResolver, Scoped, UserScope};
use conductor_structure::{Project, Structure};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cloud::{
    validate_auth_url, Cloud, CloudProjectMembership, Flavor, SharedCloudSettings, SyncState,
};
use crate::error::{IaasError, IaasResult};
use crate::instance::{Instance, StateChange, Transition};
use crate::security::{IpMapping, SecurityGroup};

/// Registry of clouds and the resources provisioned through them.
///
/// # Examples
///
/// ```
/// use conductor_iaas::{Cloud, CloudProjectMembership, Inventory};
/// use uuid::Uuid;
///
/// let mut inventory = Inventory::new();
/// let customer_id = Uuid::now_v7();
/// let (cloud, flavors) = inventory
///     .add_cloud(Cloud::new(customer_id, "Private", "https://keystone.example.com"))
///     .unwrap();
/// assert_eq!(flavors.len(), 4);
///
/// let (membership, group) = inventory
///     .add_membership(CloudProjectMembership::new(cloud.id, Uuid::now_v7()))
///     .unwrap();
/// assert_eq!(group.membership_id, membership.id);
/// ```
#[derive(Debug, Default)]
pub struct Inventory {
    clouds: BTreeMap<Uuid, Cloud>,
    memberships: BTreeMap<Uuid, CloudProjectMembership>,
    flavors: BTreeMap<Uuid, Flavor>,
    security_groups: BTreeMap<Uuid, SecurityGroup>,
    instances: BTreeMap<Uuid, Instance>,
    ip_mappings: BTreeMap<Uuid, IpMapping>,
    shared_settings: BTreeMap<Uuid, SharedCloudSettings>,
}

impl Inventory {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Clouds
    // ---------------------------------------------------------------------

    /// Register a cloud and create its default flavors.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank name or an invalid auth URL
    /// - `AlreadyExists` when the customer has a cloud with the same name
    pub fn add_cloud(&mut self, cloud: Cloud) -> IaasResult<(Cloud, Vec<Flavor>)> {
        if cloud.name.trim().is_empty() {
            return Err(IaasError::Validation("This field may not be blank.".to_string()));
        }
        validate_auth_url(&cloud.auth_url)?;
        if self
            .clouds
            .values()
            .any(|c| c.customer_id == cloud.customer_id && c.name == cloud.name)
        {
            return Err(IaasError::AlreadyExists(
                "Cloud with this Customer and Name already exists.".to_string(),
            ));
        }

        let flavors = Flavor::defaults(cloud.id);
        for flavor in &flavors {
            self.flavors.insert(flavor.id, flavor.clone());
        }
        info!(cloud_id = %cloud.id, customer_id = %cloud.customer_id, name = %cloud.name, "Cloud added");
        self.clouds.insert(cloud.id, cloud.clone());
        Ok((cloud, flavors))
    }

    /// Get a cloud.
    pub fn cloud(&self, id: Uuid) -> IaasResult<&Cloud> {
        self.clouds.get(&id).ok_or(IaasError::not_found("cloud", id))
    }

    /// Get a cloud for modification.
    pub fn cloud_mut(&mut self, id: Uuid) -> IaasResult<&mut Cloud> {
        self.clouds.get_mut(&id).ok_or(IaasError::not_found("cloud", id))
    }

    /// Every cloud.
    pub fn clouds(&self) -> impl Iterator<Item = &Cloud> {
        self.clouds.values()
    }

    /// Clouds of a customer.
    pub fn clouds_of_customer(&self, customer_id: Uuid) -> Vec<&Cloud> {
        self.clouds
            .values()
            .filter(|c| c.customer_id == customer_id)
            .collect()
    }

    /// Register settings shared with every customer.
    ///
    /// Existing customers are not connected; only customers created later.
    pub fn add_shared_settings(&mut self, settings: SharedCloudSettings) -> IaasResult<SharedCloudSettings> {
        if settings.name.trim().is_empty() {
            return Err(IaasError::Validation("This field may not be blank.".to_string()));
        }
        validate_auth_url(&settings.auth_url)?;
        info!(settings_id = %settings.id, name = %settings.name, "Shared cloud settings added");
        self.shared_settings.insert(settings.id, settings.clone());
        Ok(settings)
    }

    /// Every shared settings entry.
    pub fn shared_settings(&self) -> impl Iterator<Item = &SharedCloudSettings> {
        self.shared_settings.values()
    }

    /// Give a customer its own cloud on every shared settings entry.
    ///
    /// Settings the customer already has a cloud for are skipped.
    pub fn connect_customer_to_shared_settings(&mut self, customer_id: Uuid) -> IaasResult<Vec<Cloud>> {
        let pending: Vec<SharedCloudSettings> = self
            .shared_settings
            .values()
            .filter(|settings| {
                !self
                    .clouds
                    .values()
                    .any(|c| c.customer_id == customer_id && c.settings_id == Some(settings.id))
            })
            .cloned()
            .collect();

        let mut created = Vec::new();
        for settings in &pending {
            let (cloud, _) = self.add_cloud(Cloud::from_shared(customer_id, settings))?;
            created.push(cloud);
        }
        Ok(created)
    }

    /// Request synchronization of a cloud with its backend.
    ///
    /// Only customer owners and staff may trigger it.
    pub fn sync_cloud(
        &mut self,
        structure: &Structure,
        scope: &UserScope,
        cloud_id: Uuid,
    ) -> IaasResult<&Cloud> {
        let cloud = self.cloud(cloud_id)?;
        let path = cloud.scope_path(&self.view(structure));
        if !scope.can_see(&path) {
            return Err(IaasError::not_found("cloud", cloud_id));
        }
        if !scope.can(&path, ResourceType::Cloud, Action::Update) {
            return Err(IaasError::PermissionDenied(
                "Only customer owners can synchronize clouds.".to_string(),
            ));
        }

        let cloud = self.cloud_mut(cloud_id)?;
        cloud.state.schedule_syncing()?;
        info!(cloud_id = %cloud_id, user_id = %scope.user_id, "Cloud synchronization scheduled");
        Ok(cloud)
    }

    /// Mark a cloud available for every project of its customer and link
    /// the projects that are not linked yet.
    ///
    /// # Returns
    ///
    /// The memberships created, empty when `available` is false
    pub fn set_cloud_available_for_all(
        &mut self,
        structure: &Structure,
        cloud_id: Uuid,
        available: bool,
    ) -> IaasResult<Vec<CloudProjectMembership>> {
        let cloud = self.cloud_mut(cloud_id)?;
        cloud.available_for_all = available;
        if !available {
            return Ok(Vec::new());
        }
        let customer_id = cloud.customer_id;

        let mut created = Vec::new();
        for project in structure.projects_of_customer(customer_id) {
            if self.membership_for(cloud_id, project.id).is_none() {
                let (membership, _) =
                    self.add_membership(CloudProjectMembership::new(cloud_id, project.id))?;
                created.push(membership);
            }
        }
        debug!(cloud_id = %cloud_id, linked = created.len(), "Cloud linked to customer projects");
        Ok(created)
    }

    // ---------------------------------------------------------------------
    // Memberships
    // ---------------------------------------------------------------------

    /// Link a cloud to a project and create the default security group.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown cloud
    /// - `AlreadyExists` when the pair is already linked or the tenant is
    ///   already used in the cloud
    pub fn add_membership(
        &mut self,
        membership: CloudProjectMembership,
    ) -> IaasResult<(CloudProjectMembership, SecurityGroup)> {
        self.cloud(membership.cloud_id)?;
        if self
            .membership_for(membership.cloud_id, membership.project_id)
            .is_some()
        {
            return Err(IaasError::AlreadyExists(
                "Project is already linked to this cloud.".to_string(),
            ));
        }
        if !membership.tenant_id.is_empty()
            && self
                .memberships
                .values()
                .any(|m| m.cloud_id == membership.cloud_id && m.tenant_id == membership.tenant_id)
        {
            return Err(IaasError::AlreadyExists(
                "Cloud project membership with this Cloud and Tenant id already exists.".to_string(),
            ));
        }

        let group = SecurityGroup::http(membership.id);
        self.security_groups.insert(group.id, group.clone());
        info!(
            membership_id = %membership.id,
            cloud_id = %membership.cloud_id,
            project_id = %membership.project_id,
            "Cloud linked to project"
        );
        self.memberships.insert(membership.id, membership.clone());
        Ok((membership, group))
    }

    /// Get a membership.
    pub fn membership(&self, id: Uuid) -> IaasResult<&CloudProjectMembership> {
        self.memberships
            .get(&id)
            .ok_or(IaasError::not_found("cloud_project_membership", id))
    }

    /// Get a membership for modification.
    pub fn membership_mut(&mut self, id: Uuid) -> IaasResult<&mut CloudProjectMembership> {
        self.memberships
            .get_mut(&id)
            .ok_or(IaasError::not_found("cloud_project_membership", id))
    }

    /// Every membership.
    pub fn memberships(&self) -> impl Iterator<Item = &CloudProjectMembership> {
        self.memberships.values()
    }

    /// Membership linking the cloud and the project.
    pub fn membership_for(&self, cloud_id: Uuid, project_id: Uuid) -> Option<&CloudProjectMembership> {
        self.memberships
            .values()
            .find(|m| m.cloud_id == cloud_id && m.project_id == project_id)
    }

    /// Link a new project to every cloud of its customer that is available
    /// for all projects.
    pub fn connect_project_to_available_clouds(
        &mut self,
        project: &Project,
    ) -> IaasResult<Vec<CloudProjectMembership>> {
        let cloud_ids: Vec<Uuid> = self
            .clouds
            .values()
            .filter(|c| c.customer_id == project.customer_id && c.available_for_all)
            .map(|c| c.id)
            .collect();

        let mut created = Vec::new();
        for cloud_id in cloud_ids {
            if self.membership_for(cloud_id, project.id).is_none() {
                let (membership, _) =
                    self.add_membership(CloudProjectMembership::new(cloud_id, project.id))?;
                created.push(membership);
            }
        }
        Ok(created)
    }

    /// Drop the links of a deleted project together with their security groups.
    pub fn remove_project_links(&mut self, project_id: Uuid) -> Vec<CloudProjectMembership> {
        let ids: Vec<Uuid> = self
            .memberships
            .values()
            .filter(|m| m.project_id == project_id)
            .map(|m| m.id)
            .collect();
        self.security_groups
            .retain(|_, g| !ids.contains(&g.membership_id));
        self.ip_mappings.retain(|_, m| m.project_id != project_id);
        ids.iter()
            .filter_map(|id| self.memberships.remove(id))
            .collect()
    }

    /// In-sync memberships the user can see.
    pub fn in_sync_memberships_visible_to(
        &self,
        structure: &Structure,
        scope: &UserScope,
    ) -> Vec<&CloudProjectMembership> {
        let view = self.view(structure);
        self.memberships
            .values()
            .filter(|m| m.state == SyncState::InSync)
            .filter(|m| scope.can_see(&m.scope_path(&view)))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Flavors and security groups
    // ---------------------------------------------------------------------

    /// Add a flavor to an existing cloud.
    pub fn add_flavor(&mut self, flavor: Flavor) -> IaasResult<Flavor> {
        self.cloud(flavor.cloud_id)?;
        self.flavors.insert(flavor.id, flavor.clone());
        Ok(flavor)
    }

    /// Get a flavor.
    pub fn flavor(&self, id: Uuid) -> IaasResult<&Flavor> {
        self.flavors.get(&id).ok_or(IaasError::not_found("flavor", id))
    }

    /// Every flavor.
    pub fn flavors(&self) -> impl Iterator<Item = &Flavor> {
        self.flavors.values()
    }

    /// Flavors of a cloud.
    pub fn flavors_of_cloud(&self, cloud_id: Uuid) -> Vec<&Flavor> {
        self.flavors.values().filter(|f| f.cloud_id == cloud_id).collect()
    }

    /// Add a security group to an existing membership.
    pub fn add_security_group(&mut self, group: SecurityGroup) -> IaasResult<SecurityGroup> {
        self.membership(group.membership_id)?;
        self.security_groups.insert(group.id, group.clone());
        Ok(group)
    }

    /// Get a security group.
    pub fn security_group(&self, id: Uuid) -> IaasResult<&SecurityGroup> {
        self.security_groups
            .get(&id)
            .ok_or(IaasError::not_found("security_group", id))
    }

    /// Every security group.
    pub fn security_groups(&self) -> impl Iterator<Item = &SecurityGroup> {
        self.security_groups.values()
    }

    /// Security groups of a membership.
    pub fn security_groups_of(&self, membership_id: Uuid) -> Vec<&SecurityGroup> {
        self.security_groups
            .values()
            .filter(|g| g.membership_id == membership_id)
            .collect()
    }

    // ---------------------------------------------------------------------
    // Instances
    // ---------------------------------------------------------------------

    /// Register an instance under an existing membership.
    pub fn add_instance(&mut self, instance: Instance) -> IaasResult<Instance> {
        self.membership(instance.membership_id)?;
        if instance.hostname.trim().is_empty() {
            return Err(IaasError::Validation("This field may not be blank.".to_string()));
        }
        info!(instance_id = %instance.id, hostname = %instance.hostname, "Instance added");
        self.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    /// Get an instance.
    pub fn instance(&self, id: Uuid) -> IaasResult<&Instance> {
        self.instances.get(&id).ok_or(IaasError::not_found("instance", id))
    }

    /// Get an instance for modification.
    pub fn instance_mut(&mut self, id: Uuid) -> IaasResult<&mut Instance> {
        self.instances
            .get_mut(&id)
            .ok_or(IaasError::not_found("instance", id))
    }

    /// Every instance.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Project an instance runs in.
    pub fn project_of_instance(&self, id: Uuid) -> IaasResult<Uuid> {
        let instance = self.instance(id)?;
        Ok(self.membership(instance.membership_id)?.project_id)
    }

    /// Instances running in a project.
    pub fn instances_of_project(&self, project_id: Uuid) -> Vec<&Instance> {
        self.instances
            .values()
            .filter(|i| {
                self.memberships
                    .get(&i.membership_id)
                    .is_some_and(|m| m.project_id == project_id)
            })
            .collect()
    }

    /// Apply a lifecycle transition to an instance.
    pub fn apply_transition(
        &mut self,
        id: Uuid,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> IaasResult<StateChange> {
        let change = self.instance_mut(id)?.apply(transition, now)?;
        debug!(
            instance_id = %id,
            transition = transition.as_str(),
            from = change.from.as_str(),
            to = change.to.as_str(),
            "Instance transition"
        );
        Ok(change)
    }

    /// Remove an instance once the backend has deleted it.
    pub fn remove_instance(&mut self, id: Uuid) -> IaasResult<Instance> {
        let instance = self
            .instances
            .remove(&id)
            .ok_or(IaasError::not_found("instance", id))?;
        info!(instance_id = %id, "Instance removed");
        Ok(instance)
    }

    // ---------------------------------------------------------------------
    // IP mappings
    // ---------------------------------------------------------------------

    /// Add an IP mapping.
    pub fn add_ip_mapping(&mut self, mapping: IpMapping) -> IaasResult<IpMapping> {
        if self
            .ip_mappings
            .values()
            .any(|m| m.project_id == mapping.project_id && m.public_ip == mapping.public_ip)
        {
            return Err(IaasError::AlreadyExists(format!(
                "Public IP {} is already mapped in this project.",
                mapping.public_ip
            )));
        }
        self.ip_mappings.insert(mapping.id, mapping.clone());
        Ok(mapping)
    }

    /// Every IP mapping.
    pub fn ip_mappings(&self) -> impl Iterator<Item = &IpMapping> {
        self.ip_mappings.values()
    }

    /// Pair the inventory with the structure registry for scoping.
    pub fn view<'a>(&'a self, structure: &'a Structure) -> InventoryView<'a> {
        InventoryView {
            structure,
            inventory: self,
        }
    }
}

/// Inventory joined with the structure registry.
#[derive(Debug, Clone, Copy)]
pub struct InventoryView<'a> {
    /// Organizational hierarchy
    pub structure: &'a Structure,
    /// IaaS inventory
    pub inventory: &'a Inventory,
}

impl<'a> InventoryView<'a> {
    /// Projects linked to a cloud.
    pub fn projects_of_cloud(&self, cloud_id: Uuid) -> Vec<Uuid> {
        self.inventory
            .memberships
            .values()
            .filter(|m| m.cloud_id == cloud_id)
            .map(|m| m.project_id)
            .collect()
    }

    /// Get a membership.
    pub fn membership(&self, id: Uuid) -> Option<&'a CloudProjectMembership> {
        self.inventory.memberships.get(&id)
    }

    /// Path of anything owned by a membership.
    pub fn membership_path(&self, membership_id: Uuid) -> ScopePath {
        self.membership(membership_id)
            .map(|m| self.project_path(m.project_id))
            .unwrap_or_default()
    }
}

impl ScopeResolver for InventoryView<'_> {
    fn customer_of_project(&self, project_id: Uuid) -> Option<Uuid> {
        self.structure.customer_of_project(project_id)
    }

    fn customer_of_group(&self, group_id: Uuid) -> Option<Uuid> {
        self.structure.customer_of_group(group_id)
    }

    fn projects_of_customer(&self, customer_id: Uuid) -> Vec<Uuid> {
        ScopeResolver::projects_of_customer(self.structure, customer_id)
    }

    fn groups_of_customer(&self, customer_id: Uuid) -> Vec<Uuid> {
        self.structure.groups_of_customer(customer_id)
    }

    fn projects_of_group(&self, group_id: Uuid) -> Vec<Uuid> {
        self.structure.projects_of_group(group_id)
    }

    fn groups_of_project(&self, project_id: Uuid) -> Vec<Uuid> {
        ScopeResolver::groups_of_project(self.structure, project_id)
    }
}

impl<'a> Scoped<InventoryView<'a>> for Cloud {
    fn scope_path(&self, view: &InventoryView<'a>) -> ScopePath {
        let groups = ScopeResolver::projects_of_customer(view, self.customer_id)
            .into_iter()
            .flat_map(|p| view.groups_of_project(p));
        ScopePath::new()
            .with_customer(self.customer_id)
            .with_projects(view.projects_of_cloud(self.id))
            .with_project_groups(groups)
    }
}

impl<'a> Scoped<InventoryView<'a>> for CloudProjectMembership {
    fn scope_path(&self, view: &InventoryView<'a>) -> ScopePath {
        let mut path = ScopePath::new()
            .with_project(self.project_id)
            .with_project_groups(view.groups_of_project(self.project_id));
        if let Some(cloud) = view.inventory.clouds.get(&self.cloud_id) {
            path.customers.insert(cloud.customer_id);
        }
        path
    }
}

impl<'a> Scoped<InventoryView<'a>> for Flavor {
    fn scope_path(&self, view: &InventoryView<'a>) -> ScopePath {
        let mut path = ScopePath::new();
        for project_id in view.projects_of_cloud(self.cloud_id) {
            path.extend(view.project_path(project_id));
        }
        path
    }
}

impl<'a> Scoped<InventoryView<'a>> for SecurityGroup {
    fn scope_path(&self, view: &InventoryView<'a>) -> ScopePath {
        view.membership_path(self.membership_id)
    }
}

impl<'a> Scoped<InventoryView<'a>> for Instance {
    fn scope_path(&self, view: &InventoryView<'a>) -> ScopePath {
        view.membership_path(self.membership_id)
    }
}

impl<'a> Scoped<InventoryView<'a>> for IpMapping {
    fn scope_path(&self, view: &InventoryView<'a>) -> ScopePath {
        view.project_path(self.project_id)
    }
}
