//! # Permission scoping
//!
//! Every scoped entity reaches Customer, Project and ProjectGroup through a
//! fixed relational path. A user sees an entity when they hold a valid role on
//! any customer, project or project group of that path.
//!
//! ```text
//! Instance → membership → project ─┬→ customer
//!                                  └→ project groups
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conductor_structure::{
    Customer, CustomerPermission, CustomerRole, Project, ProjectGroup, ProjectGroupPermission,
    ProjectGroupRole, ProjectPermission, ProjectRole, RoleType, Structure, StructureResult, User,
};

use crate::actions::Action;
use crate::permissions::{role_permissions, PermissionSet};
use crate::resources::ResourceType;

/// Customers, projects and project groups reached from an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePath {
    /// Customers on the path
    pub customers: BTreeSet<Uuid>,
    /// Projects on the path
    pub projects: BTreeSet<Uuid>,
    /// Project groups on the path
    pub project_groups: BTreeSet<Uuid>,
}

impl ScopePath {
    /// Empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a customer.
    pub fn with_customer(mut self, id: Uuid) -> Self {
        self.customers.insert(id);
        self
    }

    /// Add a project.
    pub fn with_project(mut self, id: Uuid) -> Self {
        self.projects.insert(id);
        self
    }

    /// Add projects.
    pub fn with_projects(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.projects.extend(ids);
        self
    }

    /// Add project groups.
    pub fn with_project_groups(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.project_groups.extend(ids);
        self
    }

    /// Union with another path.
    pub fn extend(&mut self, other: ScopePath) {
        self.customers.extend(other.customers);
        self.projects.extend(other.projects);
        self.project_groups.extend(other.project_groups);
    }

    /// Whether the path reaches nothing.
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty() && self.projects.is_empty() && self.project_groups.is_empty()
    }
}

/// Navigation over the customer/project/group hierarchy.
pub trait ScopeResolver {
    /// Owning customer of a project.
    fn customer_of_project(&self, project_id: Uuid) -> Option<Uuid>;

    /// Owning customer of a project group.
    fn customer_of_group(&self, group_id: Uuid) -> Option<Uuid>;

    /// Projects of a customer.
    fn projects_of_customer(&self, customer_id: Uuid) -> Vec<Uuid>;

    /// Groups of a customer.
    fn groups_of_customer(&self, customer_id: Uuid) -> Vec<Uuid>;

    /// Projects of a group.
    fn projects_of_group(&self, group_id: Uuid) -> Vec<Uuid>;

    /// Groups containing a project.
    fn groups_of_project(&self, project_id: Uuid) -> Vec<Uuid>;

    /// Path of anything that belongs to a project: the project, its
    /// customer and its groups.
    fn project_path(&self, project_id: Uuid) -> ScopePath {
        let mut path = ScopePath::new()
            .with_project(project_id)
            .with_project_groups(self.groups_of_project(project_id));
        if let Some(customer_id) = self.customer_of_project(project_id) {
            path.customers.insert(customer_id);
        }
        path
    }
}

impl ScopeResolver for Structure {
    fn customer_of_project(&self, project_id: Uuid) -> Option<Uuid> {
        self.project(project_id).ok().map(|p| p.customer_id)
    }

    fn customer_of_group(&self, group_id: Uuid) -> Option<Uuid> {
        self.project_group(group_id).ok().map(|g| g.customer_id)
    }

    fn projects_of_customer(&self, customer_id: Uuid) -> Vec<Uuid> {
        Structure::projects_of_customer(self, customer_id)
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    fn groups_of_customer(&self, customer_id: Uuid) -> Vec<Uuid> {
        self.project_groups()
            .filter(|g| g.customer_id == customer_id)
            .map(|g| g.id)
            .collect()
    }

    fn projects_of_group(&self, group_id: Uuid) -> Vec<Uuid> {
        self.project_group(group_id)
            .map(|g| g.project_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn groups_of_project(&self, project_id: Uuid) -> Vec<Uuid> {
        Structure::groups_of_project(self, project_id)
    }
}

/// Entity with a derivable permission scope.
pub trait Scoped<R: ?Sized> {
    /// Walk the entity's relational path.
    fn scope_path(&self, resolver: &R) -> ScopePath;
}

impl<R: ScopeResolver + ?Sized> Scoped<R> for Customer {
    fn scope_path(&self, resolver: &R) -> ScopePath {
        ScopePath::new()
            .with_customer(self.id)
            .with_project_groups(resolver.groups_of_customer(self.id))
            .with_projects(resolver.projects_of_customer(self.id))
    }
}

impl<R: ScopeResolver + ?Sized> Scoped<R> for Project {
    fn scope_path(&self, resolver: &R) -> ScopePath {
        ScopePath::new()
            .with_customer(self.customer_id)
            .with_project(self.id)
            .with_project_groups(resolver.groups_of_project(self.id))
    }
}

impl<R: ScopeResolver + ?Sized> Scoped<R> for ProjectGroup {
    fn scope_path(&self, _resolver: &R) -> ScopePath {
        ScopePath::new()
            .with_customer(self.customer_id)
            .with_project_groups([self.id])
            .with_projects(self.project_ids.iter().copied())
    }
}

impl<R: ScopeResolver + ?Sized> Scoped<R> for CustomerPermission {
    fn scope_path(&self, _resolver: &R) -> ScopePath {
        ScopePath::new().with_customer(self.scope_id)
    }
}

impl<R: ScopeResolver + ?Sized> Scoped<R> for ProjectPermission {
    fn scope_path(&self, resolver: &R) -> ScopePath {
        resolver.project_path(self.scope_id)
    }
}

impl<R: ScopeResolver + ?Sized> Scoped<R> for ProjectGroupPermission {
    fn scope_path(&self, resolver: &R) -> ScopePath {
        let mut path = ScopePath::new().with_project_groups([self.scope_id]);
        if let Some(customer_id) = resolver.customer_of_group(self.scope_id) {
            path.customers.insert(customer_id);
        }
        path
    }
}

/// Valid role grants of one user, computed at a point in time.
///
/// # Example
///
/// ```rust,no_run
/// use chrono::Utc;
/// use conductor_rbac::{filter_for_user, UserScope};
/// use conductor_structure::Structure;
/// # let structure = Structure::new();
/// # let user_id = uuid::Uuid::now_v7();
///
/// let scope = UserScope::for_user(&structure, user_id, Utc::now()).unwrap();
/// let projects = filter_for_user(structure.projects(), &structure, &scope);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserScope {
    /// The user
    pub user_id: Uuid,
    /// Staff users see and manage everything
    pub is_staff: bool,
    /// Support users see everything
    pub is_support: bool,
    /// Customer roles
    pub customers: BTreeMap<Uuid, BTreeSet<CustomerRole>>,
    /// Project roles
    pub projects: BTreeMap<Uuid, BTreeSet<ProjectRole>>,
    /// Project group roles
    pub project_groups: BTreeMap<Uuid, BTreeSet<ProjectGroupRole>>,
}

impl UserScope {
    /// Collect the valid grants of a user.
    pub fn for_user(structure: &Structure, user_id: Uuid, now: DateTime<Utc>) -> StructureResult<Self> {
        let user = structure.user(user_id)?;
        Ok(Self::from_grants(structure, user, now))
    }

    fn from_grants(structure: &Structure, user: &User, now: DateTime<Utc>) -> Self {
        let mut scope = Self {
            user_id: user.id,
            is_staff: user.is_staff,
            is_support: user.is_support,
            ..Self::default()
        };
        for grant in structure.customer_roles().valid_for_user(user.id, now) {
            scope.customers.entry(grant.scope_id).or_default().insert(grant.role);
        }
        for grant in structure.project_roles().valid_for_user(user.id, now) {
            scope.projects.entry(grant.scope_id).or_default().insert(grant.role);
        }
        for grant in structure.project_group_roles().valid_for_user(user.id, now) {
            scope
                .project_groups
                .entry(grant.scope_id)
                .or_default()
                .insert(grant.role);
        }
        scope
    }

    /// Staff and support bypass scoping.
    pub fn is_unrestricted(&self) -> bool {
        self.is_staff || self.is_support
    }

    /// Whether any role of the user lies on the path.
    pub fn can_see(&self, path: &ScopePath) -> bool {
        self.is_unrestricted()
            || path.customers.iter().any(|id| self.customers.contains_key(id))
            || path.projects.iter().any(|id| self.projects.contains_key(id))
            || path
                .project_groups
                .iter()
                .any(|id| self.project_groups.contains_key(id))
    }

    /// Roles of the user that lie on the path.
    pub fn roles_on(&self, path: &ScopePath) -> Vec<RoleType> {
        let mut roles = BTreeSet::new();
        for id in &path.customers {
            if let Some(r) = self.customers.get(id) {
                roles.extend(r.iter().map(|r| RoleType::Customer(*r)));
            }
        }
        for id in &path.projects {
            if let Some(r) = self.projects.get(id) {
                roles.extend(r.iter().map(|r| RoleType::Project(*r)));
            }
        }
        for id in &path.project_groups {
            if let Some(r) = self.project_groups.get(id) {
                roles.extend(r.iter().map(|r| RoleType::ProjectGroup(*r)));
            }
        }
        roles.into_iter().collect()
    }

    /// Union of the default permissions of every role on the path.
    pub fn permissions_on(&self, path: &ScopePath) -> PermissionSet {
        let mut set = PermissionSet::new();
        for role in self.roles_on(path) {
            set.merge(&role_permissions(role));
        }
        set
    }

    /// Whether the user may perform `action` on a `resource` reached by `path`.
    ///
    /// Staff may do everything, support may only read.
    pub fn can(&self, path: &ScopePath, resource: ResourceType, action: Action) -> bool {
        if self.is_staff {
            return true;
        }
        if self.is_support && action.is_read_only() {
            return true;
        }
        self.permissions_on(path).allows(resource, action)
    }

    /// Whether the user owns the customer.
    pub fn is_owner_of(&self, customer_id: Uuid) -> bool {
        self.customers
            .get(&customer_id)
            .is_some_and(|r| r.contains(&CustomerRole::Owner))
    }

    /// Whether the user holds the project role.
    pub fn has_project_role(&self, project_id: Uuid, role: ProjectRole) -> bool {
        self.projects
            .get(&project_id)
            .is_some_and(|r| r.contains(&role))
    }

    /// Customers on which the user holds any role directly or via a
    /// project or project group.
    pub fn connected_customers<R: ScopeResolver + ?Sized>(&self, resolver: &R) -> BTreeSet<Uuid> {
        let mut ids: BTreeSet<Uuid> = self.customers.keys().copied().collect();
        ids.extend(
            self.projects
                .keys()
                .filter_map(|p| resolver.customer_of_project(*p)),
        );
        ids.extend(
            self.project_groups
                .keys()
                .filter_map(|g| resolver.customer_of_group(*g)),
        );
        ids
    }
}

/// Keep the items visible to the user, preserving order.
pub fn filter_for_user<'a, T, R, I>(items: I, resolver: &R, scope: &UserScope) -> Vec<&'a T>
where
    T: Scoped<R> + 'a,
    R: ?Sized,
    I: IntoIterator<Item = &'a T>,
{
    items
        .into_iter()
        .filter(|item| scope.is_unrestricted() || scope.can_see(&item.scope_path(resolver)))
        .collect()
}

/// Project list narrowing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFilter {
    /// Only projects the user can manage: customer owner or project manager
    pub can_manage: bool,
    /// Only projects the user administers
    pub can_admin: bool,
}

/// Visible projects narrowed by the manage/admin flags.
pub fn filter_projects<'a>(
    structure: &'a Structure,
    scope: &UserScope,
    filter: ProjectFilter,
) -> Vec<&'a Project> {
    filter_for_user(structure.projects(), structure, scope)
        .into_iter()
        .filter(|p| {
            !filter.can_manage
                || scope.is_owner_of(p.customer_id)
                || scope.has_project_role(p.id, ProjectRole::Manager)
        })
        .filter(|p| !filter.can_admin || scope.has_project_role(p.id, ProjectRole::Administrator))
        .collect()
}

/// IDs of the customers, projects and groups visible to a user.
///
/// `None` for unrestricted users, meaning no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermittedIds {
    /// Visible customers
    pub customers: BTreeSet<Uuid>,
    /// Visible projects
    pub projects: BTreeSet<Uuid>,
    /// Visible project groups
    pub project_groups: BTreeSet<Uuid>,
}

impl PermittedIds {
    /// Whether any ID of the path is permitted.
    pub fn allows(&self, path: &ScopePath) -> bool {
        path.customers.iter().any(|id| self.customers.contains(id))
            || path.projects.iter().any(|id| self.projects.contains(id))
            || path
                .project_groups
                .iter()
                .any(|id| self.project_groups.contains(id))
    }

    /// IDs of one scope level.
    pub fn for_resource(&self, resource: ResourceType) -> Option<&BTreeSet<Uuid>> {
        match resource {
            ResourceType::Customer => Some(&self.customers),
            ResourceType::Project => Some(&self.projects),
            ResourceType::ProjectGroup => Some(&self.project_groups),
            _ => None,
        }
    }
}

/// Collect the permitted object IDs used to narrow event and alert queries.
pub fn permitted_object_ids(structure: &Structure, scope: &UserScope) -> Option<PermittedIds> {
    if scope.is_unrestricted() {
        return None;
    }
    Some(PermittedIds {
        customers: filter_for_user(structure.customers(), structure, scope)
            .into_iter()
            .map(|c| c.id)
            .collect(),
        projects: filter_for_user(structure.projects(), structure, scope)
            .into_iter()
            .map(|p| p.id)
            .collect(),
        project_groups: filter_for_user(structure.project_groups(), structure, scope)
            .into_iter()
            .map(|g| g.id)
            .collect(),
    })
}

/// Users visible to the actor.
///
/// Unrestricted actors, or everyone when `show_all` is set, see every user.
/// Others see themselves and the users holding roles within their connected
/// customers.
pub fn visible_users<'a>(
    structure: &'a Structure,
    scope: &UserScope,
    show_all: bool,
    now: DateTime<Utc>,
) -> Vec<&'a User> {
    if show_all || scope.is_unrestricted() {
        return structure.users().collect();
    }
    let mut ids: BTreeSet<Uuid> = BTreeSet::from([scope.user_id]);
    for customer_id in scope.connected_customers(structure) {
        ids.extend(structure.customer_users(customer_id, now).iter().map(|u| u.id));
    }
    structure.users().filter(|u| ids.contains(&u.id)).collect()
}

/// Customer grants visible to the actor: their own grants and the grants of
/// customers they are connected to through a customer or project role.
pub fn visible_customer_permissions<'a>(
    structure: &'a Structure,
    scope: &UserScope,
) -> Vec<&'a CustomerPermission> {
    let all = structure.customer_roles().iter().filter(|g| g.is_active);
    if scope.is_unrestricted() {
        return all.collect();
    }
    let mut customers: BTreeSet<Uuid> = scope.customers.keys().copied().collect();
    customers.extend(
        scope
            .projects
            .keys()
            .filter_map(|p| structure.customer_of_project(*p)),
    );
    all.filter(|g| g.user_id == scope.user_id || customers.contains(&g.scope_id))
        .collect()
}
