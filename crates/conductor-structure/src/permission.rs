//! Role grants
//!
//! A grant links a user to a scope (customer, project or project group) with
//! a role. Revoked grants are kept inactive and form the permission log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::{CustomerRole, ProjectGroupRole, ProjectRole};

/// Role grant of a user on a scope.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use uuid::Uuid;
/// use conductor_structure::{ProjectPermission, ProjectRole};
///
/// let now = Utc::now();
/// let grant = ProjectPermission::new(Uuid::now_v7(), Uuid::now_v7(), ProjectRole::Manager)
///     .with_expiration(Some(now + Duration::days(1)));
/// assert!(grant.is_valid_at(now));
/// assert!(!grant.is_valid_at(now + Duration::days(2)));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Permission<R> {
    /// Unique grant ID
    pub id: Uuid,

    /// Customer, project or project group ID
    pub scope_id: Uuid,

    /// Grantee
    pub user_id: Uuid,

    /// Granted role
    pub role: R,

    /// Who granted the role
    pub created_by: Option<Uuid>,

    /// When the role was granted
    pub created_at: DateTime<Utc>,

    /// When the grant stops being valid; `None` means never
    pub expiration_time: Option<DateTime<Utc>>,

    /// Revoked grants stay in the log as inactive
    pub is_active: bool,
}

impl<R: Copy + PartialEq> Permission<R> {
    /// Creates an active grant without expiration.
    pub fn new(scope_id: Uuid, user_id: Uuid, role: R) -> Self {
        Self {
            id: Uuid::now_v7(),
            scope_id,
            user_id,
            role,
            created_by: None,
            created_at: Utc::now(),
            expiration_time: None,
            is_active: true,
        }
    }

    /// Record the granting user.
    pub fn with_created_by(mut self, created_by: Option<Uuid>) -> Self {
        self.created_by = created_by;
        self
    }

    /// Set the expiration time.
    pub fn with_expiration(mut self, expiration_time: Option<DateTime<Utc>>) -> Self {
        self.expiration_time = expiration_time;
        self
    }

    /// Active and not expired at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expiration_time.map_or(true, |exp| exp > now)
    }

    /// Whether this grant lasts at least until `requested`.
    ///
    /// A grant without expiration covers everything. A finite grant covers
    /// only finite requests that end no later than itself.
    pub fn covers(&self, requested: Option<DateTime<Utc>>) -> bool {
        match (self.expiration_time, requested) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(own), Some(requested)) => own >= requested,
        }
    }

    /// Match user and, if given, role.
    pub fn matches(&self, user_id: Uuid, role: Option<R>) -> bool {
        self.user_id == user_id && role.map_or(true, |r| r == self.role)
    }

    /// Deactivate the grant.
    pub fn revoke(&mut self) {
        self.is_active = false;
    }
}

/// Role grant on a customer.
pub type CustomerPermission = Permission<CustomerRole>;

/// Role grant on a project.
pub type ProjectPermission = Permission<ProjectRole>;

/// Role grant on a project group.
pub type ProjectGroupPermission = Permission<ProjectGroupRole>;

/// Grants of one role kind, unique per active (scope, user, role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTable<R> {
    grants: Vec<Permission<R>>,
}

impl<R> Default for RoleTable<R> {
    fn default() -> Self {
        Self { grants: Vec::new() }
    }
}

impl<R: Copy + PartialEq> RoleTable<R> {
    /// Add a grant unless a valid one already exists.
    ///
    /// An active grant that has already expired is deactivated first, so
    /// the role can be granted again.
    ///
    /// # Returns
    ///
    /// The valid grant and whether it was created by this call
    pub fn add(
        &mut self,
        scope_id: Uuid,
        user_id: Uuid,
        role: R,
        created_by: Option<Uuid>,
        expiration_time: Option<DateTime<Utc>>,
    ) -> (Permission<R>, bool) {
        let now = Utc::now();
        for stale in self.grants.iter_mut().filter(|g| {
            g.is_active
                && !g.is_valid_at(now)
                && g.scope_id == scope_id
                && g.matches(user_id, Some(role))
        }) {
            stale.revoke();
        }
        if let Some(existing) = self
            .grants
            .iter()
            .find(|g| g.is_active && g.scope_id == scope_id && g.matches(user_id, Some(role)))
        {
            return (existing.clone(), false);
        }
        let grant = Permission::new(scope_id, user_id, role)
            .with_created_by(created_by)
            .with_expiration(expiration_time);
        self.grants.push(grant.clone());
        (grant, true)
    }

    /// Deactivate the active grants of a user, optionally only one role.
    pub fn remove(&mut self, scope_id: Uuid, user_id: Uuid, role: Option<R>) -> Vec<Permission<R>> {
        let mut removed = Vec::new();
        for grant in self
            .grants
            .iter_mut()
            .filter(|g| g.is_active && g.scope_id == scope_id && g.matches(user_id, role))
        {
            grant.revoke();
            removed.push(grant.clone());
        }
        removed
    }

    /// Deactivate every active grant on a scope.
    pub fn revoke_scope(&mut self, scope_id: Uuid) -> Vec<Permission<R>> {
        let mut removed = Vec::new();
        for grant in self
            .grants
            .iter_mut()
            .filter(|g| g.is_active && g.scope_id == scope_id)
        {
            grant.revoke();
            removed.push(grant.clone());
        }
        removed
    }

    /// Find the active grant of a user with the given role.
    pub fn find(&self, scope_id: Uuid, user_id: Uuid, role: Option<R>) -> Option<&Permission<R>> {
        self.grants
            .iter()
            .find(|g| g.is_active && g.scope_id == scope_id && g.matches(user_id, role))
    }

    /// Find a grant by ID.
    pub fn get(&self, id: Uuid) -> Option<&Permission<R>> {
        self.grants.iter().find(|g| g.id == id)
    }

    /// Find a grant by ID for modification.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Permission<R>> {
        self.grants.iter_mut().find(|g| g.id == id)
    }

    /// Whether the user holds a valid grant on the scope.
    pub fn has(&self, scope_id: Uuid, user_id: Uuid, role: Option<R>, now: DateTime<Utc>) -> bool {
        self.grants
            .iter()
            .any(|g| g.scope_id == scope_id && g.matches(user_id, role) && g.is_valid_at(now))
    }

    /// Valid grants on a scope.
    pub fn valid_for_scope(
        &self,
        scope_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &Permission<R>> {
        self.grants
            .iter()
            .filter(move |g| g.scope_id == scope_id && g.is_valid_at(now))
    }

    /// Valid grants of a user.
    pub fn valid_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &Permission<R>> {
        self.grants
            .iter()
            .filter(move |g| g.user_id == user_id && g.is_valid_at(now))
    }

    /// Revoked grants, optionally limited to a scope.
    pub fn log(&self, scope_id: Option<Uuid>) -> impl Iterator<Item = &Permission<R>> {
        self.grants
            .iter()
            .filter(move |g| !g.is_active && scope_id.map_or(true, |s| s == g.scope_id))
    }

    /// Every grant, active or not.
    pub fn iter(&self) -> impl Iterator<Item = &Permission<R>> {
        self.grants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_add_is_unique_per_user_role_scope() {
        let mut table = RoleTable::default();
        let (scope, user) = (Uuid::now_v7(), Uuid::now_v7());

        let (first, created) = table.add(scope, user, ProjectRole::Manager, None, None);
        assert!(created);
        let (second, created) = table.add(scope, user, ProjectRole::Manager, None, None);
        assert!(!created);
        assert_eq!(first.id, second.id);

        let (_, created) = table.add(scope, user, ProjectRole::Administrator, None, None);
        assert!(created);
        assert_eq!(table.iter().count(), 2);
    }

    #[test]
    fn test_remove_keeps_log() {
        let mut table = RoleTable::default();
        let (scope, user) = (Uuid::now_v7(), Uuid::now_v7());
        table.add(scope, user, ProjectRole::Manager, None, None);
        table.add(scope, user, ProjectRole::Administrator, None, None);

        let removed = table.remove(scope, user, Some(ProjectRole::Manager));
        assert_eq!(removed.len(), 1);
        assert!(!table.has(scope, user, Some(ProjectRole::Manager), Utc::now()));
        assert!(table.has(scope, user, None, Utc::now()));
        assert_eq!(table.log(Some(scope)).count(), 1);

        // re-granting after revocation creates a new row
        let (_, created) = table.add(scope, user, ProjectRole::Manager, None, None);
        assert!(created);
    }

    #[test]
    fn test_expired_grant_is_not_valid() {
        let now = Utc::now();
        let mut table = RoleTable::default();
        let (scope, user) = (Uuid::now_v7(), Uuid::now_v7());
        table.add(scope, user, CustomerRole::Owner, None, Some(now - Duration::hours(1)));
        assert!(!table.has(scope, user, None, now));
        assert_eq!(table.valid_for_user(user, now).count(), 0);
    }

    #[test]
    fn test_regrant_after_expiry_creates_new_grant() {
        let now = Utc::now();
        let mut table = RoleTable::default();
        let (scope, user) = (Uuid::now_v7(), Uuid::now_v7());
        let (expired, created) =
            table.add(scope, user, CustomerRole::Owner, None, Some(now - Duration::minutes(5)));
        assert!(created);
        assert!(!table.has(scope, user, Some(CustomerRole::Owner), now));

        let (fresh, created) = table.add(scope, user, CustomerRole::Owner, None, None);
        assert!(created);
        assert_ne!(fresh.id, expired.id);
        assert_eq!(fresh.expiration_time, None);
        assert!(table.has(scope, user, Some(CustomerRole::Owner), Utc::now()));

        // the stale grant moves to the log
        let logged: Vec<Uuid> = table.log(Some(scope)).map(|g| g.id).collect();
        assert_eq!(logged, vec![expired.id]);
        assert_eq!(table.iter().filter(|g| g.is_active).count(), 1);
    }

    #[test]
    fn test_covers() {
        let now = Utc::now();
        let unlimited = ProjectPermission::new(Uuid::nil(), Uuid::nil(), ProjectRole::Manager);
        assert!(unlimited.covers(None));
        assert!(unlimited.covers(Some(now)));

        let finite = unlimited.clone().with_expiration(Some(now + Duration::days(1)));
        assert!(!finite.covers(None));
        assert!(finite.covers(Some(now)));
        assert!(!finite.covers(Some(now + Duration::days(2))));
    }
}
