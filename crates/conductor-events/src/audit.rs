//! # Audit log
//!
//! Stores every published [`Event`] and answers filtered queries. Restricted
//! users only see events tied to a customer, project or project group they
//! may see.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_rbac::{PermittedIds, ResourceType};
use tokio::sync::RwLock;

use crate::bus::{EventBusResult, EventHandler};
use crate::error::{LoggingError, LoggingResult};
use crate::types::{expand_event_groups, Event, EventScope};

/// Scope types accepted by the `scope_type` filter.
pub const EVENT_SCOPE_TYPES: &[ResourceType] = &[
    ResourceType::Customer,
    ResourceType::Project,
    ResourceType::ProjectGroup,
];

/// Sort order of event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOrdering {
    /// Newest first (`-@timestamp`)
    #[default]
    NewestFirst,
    /// Oldest first (`@timestamp`)
    OldestFirst,
}

impl EventOrdering {
    /// Parse the `o` query value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "-@timestamp" => Some(Self::NewestFirst),
            "@timestamp" => Some(Self::OldestFirst),
            _ => None,
        }
    }
}

/// Event query filters. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Only these event types
    pub event_types: Vec<String>,
    /// Only event types of these feature groups; replaces `event_types`
    pub features: Vec<String>,
    /// Drop event types of these feature groups
    pub exclude_features: Vec<String>,
    /// Drop update events
    pub exclude_extra: bool,
    /// Only events shown with this username
    pub user_username: Option<String>,
    /// Only events about this object
    pub scope: Option<EventScope>,
    /// Only events of permitted objects of this scope type
    pub scope_type: Option<String>,
    /// Case-insensitive substring of the message
    pub search: Option<String>,
    /// Not older than
    pub from: Option<DateTime<Utc>>,
    /// Not newer than
    pub to: Option<DateTime<Utc>>,
    /// Sort order
    pub ordering: EventOrdering,
}

impl EventQuery {
    /// Create an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by feature groups.
    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.features = features.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Filter by event types.
    pub fn with_event_types(mut self, types: &[&str]) -> Self {
        self.event_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Filter by object.
    pub fn with_scope(mut self, resource_type: ResourceType, id: uuid::Uuid) -> Self {
        self.scope = Some(EventScope::new(resource_type, id));
        self
    }

    /// Filter by scope type.
    pub fn with_scope_type(mut self, scope_type: impl Into<String>) -> Self {
        self.scope_type = Some(scope_type.into());
        self
    }

    /// Filter by message text.
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }
}

fn parse_scope_type(value: &str) -> LoggingResult<ResourceType> {
    EVENT_SCOPE_TYPES
        .iter()
        .copied()
        .find(|t| t.as_str() == value)
        .ok_or_else(|| LoggingError::InvalidScopeType {
            value: value.to_string(),
            choices: EVENT_SCOPE_TYPES
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn field_of(event: &Event, resource_type: ResourceType) -> Option<uuid::Uuid> {
    match resource_type {
        ResourceType::Customer => event.customer_id,
        ResourceType::Project => event.project_id,
        ResourceType::ProjectGroup => event.project_group_id,
        _ => None,
    }
}

fn matches_scope(event: &Event, scope: &EventScope) -> bool {
    match scope.resource_type {
        ResourceType::Customer | ResourceType::Project | ResourceType::ProjectGroup => {
            field_of(event, scope.resource_type) == Some(scope.id)
        }
        _ => event.scope.as_ref() == Some(scope),
    }
}

fn permitted_by(event: &Event, permitted: &PermittedIds) -> bool {
    event
        .customer_id
        .map_or(false, |id| permitted.customers.contains(&id))
        || event
            .project_id
            .map_or(false, |id| permitted.projects.contains(&id))
        || event
            .project_group_id
            .map_or(false, |id| permitted.project_groups.contains(&id))
}

/// Apply a query to a list of events.
///
/// `permitted` is `None` for unrestricted viewers.
pub fn filter_events<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    query: &EventQuery,
    permitted: Option<&PermittedIds>,
) -> LoggingResult<Vec<Event>> {
    let scope_type = query.scope_type.as_deref().map(parse_scope_type).transpose()?;

    let wanted_types = if !query.features.is_empty() {
        expand_event_groups(&query.features)
    } else {
        query.event_types.clone()
    };
    let type_filter = !query.features.is_empty() || !query.event_types.is_empty();

    let mut excluded = expand_event_groups(&query.exclude_features);
    if query.exclude_extra {
        excluded.extend(expand_event_groups(&["update".to_string()]));
    }
    let search = query.search.as_ref().map(|s| s.to_lowercase());

    let mut result: Vec<Event> = events
        .into_iter()
        .filter(|e| !type_filter || wanted_types.contains(&e.event_type))
        .filter(|e| !excluded.contains(&e.event_type))
        .filter(|e| match &query.user_username {
            Some(username) => e.user_username.as_deref() == Some(username.as_str()),
            None => true,
        })
        .filter(|e| match (&query.scope, scope_type) {
            (Some(scope), _) => {
                matches_scope(e, scope) && permitted.map_or(true, |p| permitted_by(e, p))
            }
            (None, Some(kind)) => match field_of(e, kind) {
                Some(id) => permitted
                    .and_then(|p| p.for_resource(kind))
                    .map_or(true, |ids| ids.contains(&id)),
                None => false,
            },
            (None, None) => permitted.map_or(true, |p| permitted_by(e, p)),
        })
        .filter(|e| match &search {
            Some(text) => e.message.to_lowercase().contains(text),
            None => true,
        })
        .filter(|e| query.from.map_or(true, |from| e.timestamp >= from))
        .filter(|e| query.to.map_or(true, |to| e.timestamp <= to))
        .cloned()
        .collect();

    match query.ordering {
        EventOrdering::NewestFirst => result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        EventOrdering::OldestFirst => result.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
    }
    Ok(result)
}

/// In-memory audit log.
///
/// Cloning shares the underlying storage, so one clone can be registered on
/// the bus while another answers queries.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event.
    pub async fn record(&self, event: Event) {
        tracing::info!(
            event_type = %event.event_type,
            customer_id = ?event.customer_id,
            project_id = ?event.project_id,
            "{}",
            event.message
        );
        self.events.write().await.push(event);
    }

    /// Number of stored events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Check if the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Query the log.
    ///
    /// # Errors
    ///
    /// `InvalidScopeType` for an unknown `scope_type`
    pub async fn query(
        &self,
        query: &EventQuery,
        permitted: Option<&PermittedIds>,
    ) -> LoggingResult<Vec<Event>> {
        let events = self.events.read().await;
        filter_events(events.iter(), query, permitted)
    }
}

#[async_trait]
impl EventHandler for EventLog {
    async fn handle(&self, event: Event) -> EventBusResult<()> {
        self.record(event).await;
        Ok(())
    }

    fn topics(&self) -> Vec<String> {
        vec!["#".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, MemoryEventBus};
    use crate::types::{InvoiceEvent, StructureEvent, UserEvent};
    use chrono::Duration;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    struct Fixture {
        acme: Uuid,
        globex: Uuid,
        web: Uuid,
        events: Vec<Event>,
    }

    fn fixture() -> Fixture {
        let acme = Uuid::now_v7();
        let globex = Uuid::now_v7();
        let web = Uuid::now_v7();
        let base = Utc::now() - Duration::hours(10);
        let events = vec![
            StructureEvent::CustomerCreated {
                customer_id: acme,
                customer_name: "Acme".to_string(),
            }
            .to_event()
            .at(base),
            StructureEvent::ProjectCreated {
                project_id: web,
                project_name: "Web".to_string(),
                customer_id: acme,
            }
            .to_event()
            .at(base + Duration::hours(1)),
            StructureEvent::ProjectUpdated {
                project_id: web,
                project_name: "Web".to_string(),
                customer_id: acme,
            }
            .to_event()
            .at(base + Duration::hours(2)),
            StructureEvent::CustomerCreated {
                customer_id: globex,
                customer_name: "Globex".to_string(),
            }
            .to_event()
            .at(base + Duration::hours(3)),
            InvoiceEvent::Created {
                invoice_id: Uuid::now_v7(),
                customer_id: globex,
                customer_name: "Globex".to_string(),
                invoice_date: "2026-09".to_string(),
            }
            .to_event()
            .at(base + Duration::hours(4)),
            UserEvent::OrganizationClaimed {
                user_id: Uuid::now_v7(),
                username: "alice".to_string(),
                organization: "Acme".to_string(),
            }
            .to_event()
            .at(base + Duration::hours(5)),
        ];
        Fixture {
            acme,
            globex,
            web,
            events,
        }
    }

    fn types(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.event_type.as_str()).collect()
    }

    #[test]
    fn test_default_ordering_is_newest_first() {
        let f = fixture();
        let all = filter_events(&f.events, &EventQuery::new(), None).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].event_type, "user_organization_claimed");

        let query = EventQuery {
            ordering: EventOrdering::OldestFirst,
            ..EventQuery::new()
        };
        let all = filter_events(&f.events, &query, None).unwrap();
        assert_eq!(all[0].message, "Customer Acme has been created.");
        assert_eq!(EventOrdering::parse("@timestamp"), Some(EventOrdering::OldestFirst));
    }

    #[test]
    fn test_feature_filters() {
        let f = fixture();
        let projects = filter_events(&f.events, &EventQuery::new().with_features(&["projects"]), None).unwrap();
        assert_eq!(
            types(&projects),
            vec!["project_update_succeeded", "project_creation_succeeded"]
        );

        let query = EventQuery {
            exclude_features: vec!["customers".to_string()],
            exclude_extra: true,
            ..EventQuery::new()
        };
        let rest = filter_events(&f.events, &query, None).unwrap();
        assert_eq!(
            types(&rest),
            vec![
                "user_organization_claimed",
                "invoice_creation_succeeded",
                "project_creation_succeeded"
            ]
        );
    }

    #[test]
    fn test_permitted_ids_restrict_results() {
        let f = fixture();
        let permitted = PermittedIds {
            customers: BTreeSet::from([f.acme]),
            ..PermittedIds::default()
        };
        let visible = filter_events(&f.events, &EventQuery::new(), Some(&permitted)).unwrap();
        assert_eq!(visible.len(), 3);
        assert!(visible.iter().all(|e| e.customer_id == Some(f.acme)));
    }

    #[test]
    fn test_scope_filters() {
        let f = fixture();
        let by_project =
            filter_events(&f.events, &EventQuery::new().with_scope(ResourceType::Project, f.web), None).unwrap();
        assert_eq!(by_project.len(), 2);

        let by_customer =
            filter_events(&f.events, &EventQuery::new().with_scope(ResourceType::Customer, f.globex), None)
                .unwrap();
        assert_eq!(by_customer.len(), 2);

        let permitted = PermittedIds {
            customers: BTreeSet::from([f.acme, f.globex]),
            projects: BTreeSet::new(),
            ..PermittedIds::default()
        };
        let projects = filter_events(
            &f.events,
            &EventQuery::new().with_scope_type("project"),
            Some(&permitted),
        )
        .unwrap();
        assert!(projects.is_empty());
    }

    #[test]
    fn test_scope_filter_stays_within_permitted() {
        let f = fixture();
        let permitted = PermittedIds {
            customers: BTreeSet::from([f.acme]),
            ..PermittedIds::default()
        };
        let foreign = filter_events(
            &f.events,
            &EventQuery::new().with_scope(ResourceType::Customer, f.globex),
            Some(&permitted),
        )
        .unwrap();
        assert!(foreign.is_empty());

        let own = filter_events(
            &f.events,
            &EventQuery::new().with_scope(ResourceType::Customer, f.acme),
            Some(&permitted),
        )
        .unwrap();
        assert_eq!(own.len(), 3);

        let nobody = PermittedIds::default();
        let scoped = filter_events(
            &f.events,
            &EventQuery::new().with_scope(ResourceType::Project, f.web),
            Some(&nobody),
        )
        .unwrap();
        assert!(scoped.is_empty());
    }

    #[test]
    fn test_invalid_scope_type() {
        let f = fixture();
        let err = filter_events(&f.events, &EventQuery::new().with_scope_type("widget"), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Scope type \"widget\" is not valid. Has to be one from list: customer, project, project_group"
        );
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_search_and_time_window() {
        let f = fixture();
        let found = filter_events(&f.events, &EventQuery::new().with_search("GLOBEX"), None).unwrap();
        assert_eq!(found.len(), 2);

        let query = EventQuery {
            from: Some(f.events[1].timestamp),
            to: Some(f.events[3].timestamp),
            ..EventQuery::new()
        };
        assert_eq!(filter_events(&f.events, &query, None).unwrap().len(), 3);

        let query = EventQuery {
            user_username: Some("alice".to_string()),
            ..EventQuery::new()
        };
        assert_eq!(filter_events(&f.events, &query, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_event_log_records_from_bus() {
        let bus = MemoryEventBus::new();
        let log = EventLog::new();
        bus.register_handler(Arc::new(log.clone())).await.unwrap();

        let f = fixture();
        for event in f.events {
            bus.publish(event).await.unwrap();
        }
        for _ in 0..100 {
            if log.len().await == 6 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(log.len().await, 6);
        let invoices = log
            .query(&EventQuery::new().with_event_types(&["invoice_creation_succeeded"]), None)
            .await
            .unwrap();
        assert_eq!(invoices.len(), 1);
    }
}
