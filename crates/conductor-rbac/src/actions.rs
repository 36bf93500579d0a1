//! # Actions
//!
//! Operations that can be performed on resources, including the runtime
//! operations of virtual machines.

use serde::{Deserialize, Serialize};

/// Actions that can be performed on resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// View a single resource
    Read,

    /// Browse resources
    List,

    /// Create new resources
    Create,

    /// Modify existing resources
    Update,

    /// Remove resources
    Delete,

    /// Full administrative access
    Manage,

    /// Import resources from a backend
    Import,

    /// Export resource data
    Export,

    /// Start a stopped resource
    Start,

    /// Stop a running resource
    Stop,

    /// Restart a running resource
    Restart,

    /// Change flavor or disk size
    Resize,
}

impl Action {
    /// Get the string representation of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::List => "list",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
            Action::Import => "import",
            Action::Export => "export",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Resize => "resize",
        }
    }

    /// Parse action from string representation.
    ///
    /// # Arguments
    ///
    /// * `s` - String to parse (case-insensitive, supports aliases)
    ///
    /// # Example
    ///
    /// ```
    /// use conductor_rbac::Action;
    ///
    /// assert_eq!(Action::parse("view"), Some(Action::Read));
    /// assert_eq!(Action::parse("destroy"), Some(Action::Delete));
    /// assert_eq!(Action::parse("reboot"), Some(Action::Restart));
    /// assert_eq!(Action::parse("invalid"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "read" | "view" | "retrieve" => Some(Action::Read),
            "list" => Some(Action::List),
            "create" | "add" => Some(Action::Create),
            "update" | "edit" | "partial_update" => Some(Action::Update),
            "delete" | "destroy" | "remove" => Some(Action::Delete),
            "manage" | "admin" => Some(Action::Manage),
            "import" => Some(Action::Import),
            "export" => Some(Action::Export),
            "start" => Some(Action::Start),
            "stop" => Some(Action::Stop),
            "restart" | "reboot" => Some(Action::Restart),
            "resize" => Some(Action::Resize),
            _ => None,
        }
    }

    /// Get all actions.
    pub fn all() -> Vec<Self> {
        vec![
            Action::Read,
            Action::List,
            Action::Create,
            Action::Update,
            Action::Delete,
            Action::Manage,
            Action::Import,
            Action::Export,
            Action::Start,
            Action::Stop,
            Action::Restart,
            Action::Resize,
        ]
    }

    /// Check if this action implies another action.
    ///
    /// - `Manage` implies every action
    /// - `Create`, `Update` and `Delete` imply `Read` and `List`
    ///
    /// # Example
    ///
    /// ```
    /// use conductor_rbac::Action;
    ///
    /// assert!(Action::Manage.implies(Action::Resize));
    /// assert!(Action::Update.implies(Action::Read));
    /// assert!(!Action::Read.implies(Action::Update));
    /// ```
    pub fn implies(&self, other: Action) -> bool {
        match self {
            Action::Manage => true,
            Action::Create | Action::Update | Action::Delete => {
                matches!(other, Action::Read | Action::List)
            }
            _ => false,
        }
    }

    /// Runtime operations change the state of a running resource.
    pub fn is_runtime_operation(&self) -> bool {
        matches!(
            self,
            Action::Start | Action::Stop | Action::Restart | Action::Resize
        )
    }

    /// Check if this is a read-only action.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Action::Read | Action::List | Action::Export)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing() {
        assert_eq!(Action::parse("retrieve"), Some(Action::Read));
        assert_eq!(Action::parse("partial_update"), Some(Action::Update));
        assert_eq!(Action::parse("STOP"), Some(Action::Stop));
        assert_eq!(Action::parse("fly"), None);
    }

    #[test]
    fn test_action_round_trip() {
        for action in Action::all() {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
        assert_eq!(Action::all().len(), 12);
    }

    #[test]
    fn test_action_implies() {
        for action in Action::all() {
            assert!(Action::Manage.implies(action));
        }
        assert!(Action::Delete.implies(Action::List));
        assert!(!Action::Update.implies(Action::Delete));
        assert!(!Action::Start.implies(Action::Read));
    }

    #[test]
    fn test_runtime_operations() {
        assert!(Action::Resize.is_runtime_operation());
        assert!(!Action::Update.is_runtime_operation());
        assert!(Action::List.is_read_only());
        assert!(!Action::Stop.is_read_only());
    }
}
