//! Gating of operations on scoped resources

use conductor_rbac::{Action, ResourceType, ScopePath, UserScope};
use uuid::Uuid;

use crate::error::{IaasError, IaasResult};
use crate::instance::InstanceState;

/// Role a user needs beyond seeing the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleRequirement {
    /// Seeing the resource is enough
    #[default]
    Viewer,
    /// The user's roles on the path must grant the action
    Administrator,
}

/// Check that a user may run `operation` on a resource in `state`.
///
/// Checks run in order: visibility (404), role (403), state (409). An empty
/// `valid_states` accepts any state.
///
/// # Examples
///
/// ```
/// use conductor_iaas::{check_operation, InstanceState, RoleRequirement};
/// use conductor_rbac::{Action, ResourceType, ScopePath, UserScope};
/// use uuid::Uuid;
///
/// let staff = UserScope { is_staff: true, ..UserScope::default() };
/// let result = check_operation(
///     &staff,
///     &ScopePath::new(),
///     ResourceType::Instance,
///     Uuid::nil(),
///     Action::Stop,
///     RoleRequirement::Administrator,
///     InstanceState::Offline,
///     &[InstanceState::Online],
/// );
/// assert_eq!(result.unwrap_err().status_code(), 409);
/// ```
#[allow(clippy::too_many_arguments)]
pub fn check_operation(
    scope: &UserScope,
    path: &ScopePath,
    resource: ResourceType,
    resource_id: Uuid,
    operation: Action,
    requirement: RoleRequirement,
    state: InstanceState,
    valid_states: &[InstanceState],
) -> IaasResult<()> {
    if !scope.can_see(path) {
        return Err(IaasError::not_found(resource.as_str(), resource_id));
    }
    if requirement == RoleRequirement::Administrator && !scope.can(path, resource, operation) {
        return Err(IaasError::PermissionDenied(
            "You do not have permission to perform this action.".to_string(),
        ));
    }
    if !valid_states.is_empty() && !valid_states.contains(&state) {
        return Err(if operation.is_runtime_operation() {
            IaasError::operation_not_allowed(operation.as_str())
        } else {
            IaasError::incorrect_state()
        });
    }
    Ok(())
}

/// Response of a safe operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Work was handed to the backend
    Scheduled(String),
    /// The resource is gone
    Deleted,
    /// Scheduling failed
    NotScheduled(String),
}

impl OperationOutcome {
    /// Outcome of a scheduling attempt.
    pub fn from_result<T, E>(operation: &str, result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => OperationOutcome::Scheduled(operation.to_string()),
            Err(_) => OperationOutcome::NotScheduled(operation.to_string()),
        }
    }

    /// HTTP status of the outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            OperationOutcome::Scheduled(_) => 202,
            OperationOutcome::Deleted => 204,
            OperationOutcome::NotScheduled(_) => 400,
        }
    }

    /// Response detail, if any.
    pub fn detail(&self) -> Option<String> {
        match self {
            OperationOutcome::Scheduled(op) => Some(format!("{} was scheduled.", op)),
            OperationOutcome::Deleted => None,
            OperationOutcome::NotScheduled(op) => Some(format!("{} was not scheduled.", op)),
        }
    }
}
