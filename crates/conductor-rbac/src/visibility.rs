//! # Field visibility
//!
//! Role-based field filtering applied when rendering entities. Customer owners
//! and staff see every field of a cloud; project roles only see its public
//! fields. Write-only fields are never rendered.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::resources::ResourceType;
use crate::scope::{ScopePath, UserScope};

/// How much of an entity a viewer may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every readable field
    Full,
    /// Only the public fields
    Public,
}

/// Field rules of a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    /// Fields visible to the public audience; `None` means every field
    pub public_fields: Option<&'static [&'static str]>,
    /// Fields accepted on input but never rendered
    pub write_only: &'static [&'static str],
}

const CLOUD_PUBLIC: &[&str] = &["url", "uuid", "name"];

/// Get the field rule of a resource type.
pub fn field_rule(resource: ResourceType) -> FieldRule {
    match resource {
        ResourceType::Cloud => FieldRule {
            public_fields: Some(CLOUD_PUBLIC),
            write_only: &[],
        },
        ResourceType::CloudProjectMembership => FieldRule {
            public_fields: None,
            write_only: &["password"],
        },
        _ => FieldRule {
            public_fields: None,
            write_only: &[],
        },
    }
}

/// Decide the audience of a viewer for an entity reached by `path`.
///
/// Staff and owners of a customer on the path get the full view.
pub fn audience_for(scope: &UserScope, path: &ScopePath) -> Audience {
    if scope.is_staff || path.customers.iter().any(|c| scope.is_owner_of(*c)) {
        Audience::Full
    } else {
        Audience::Public
    }
}

/// Drop the fields the audience may not see from a rendered object.
///
/// Non-object values are returned unchanged.
pub fn redact(resource: ResourceType, value: Value, audience: Audience) -> Value {
    let rule = field_rule(resource);
    let Value::Object(map) = value else {
        return value;
    };
    let filtered: Map<String, Value> = map
        .into_iter()
        .filter(|(key, _)| !rule.write_only.contains(&key.as_str()))
        .filter(|(key, _)| match (audience, rule.public_fields) {
            (Audience::Public, Some(public)) => public.contains(&key.as_str()),
            _ => true,
        })
        .collect();
    Value::Object(filtered)
}

/// Serialize an entity and redact it for the viewer.
///
/// # Example
///
/// ```
/// use conductor_rbac::{render_for, ResourceType, ScopePath, UserScope};
/// use serde_json::json;
///
/// let viewer = UserScope::default();
/// let cloud = json!({"uuid": "c1", "name": "Main", "auth_url": "http://keystone:5000"});
/// let rendered = render_for(ResourceType::Cloud, &cloud, &viewer, &ScopePath::new()).unwrap();
/// assert_eq!(rendered, json!({"uuid": "c1", "name": "Main"}));
/// ```
pub fn render_for<T: Serialize>(
    resource: ResourceType,
    item: &T,
    scope: &UserScope,
    path: &ScopePath,
) -> serde_json::Result<Value> {
    let value = serde_json::to_value(item)?;
    Ok(redact(resource, value, audience_for(scope, path)))
}
