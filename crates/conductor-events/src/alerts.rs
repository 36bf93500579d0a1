//! # Alerts
//!
//! Alerts are raised on a scope (a service, a resource, a customer) and stay
//! open until closed. Raising an alert that is already open for the same type
//! and scope refreshes it instead of creating a duplicate.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use conductor_rbac::{PermittedIds, ResourceType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LoggingError, LoggingResult};
use crate::types::{expand_alert_groups, EventScope};

/// Alert types raised by Conductor itself.
pub mod alert_types {
    /// A cloud backend could not be reached during sync
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
    /// A customer reached its project quota
    pub const CUSTOMER_PROJECTS_QUOTA_EXCEEDED: &str = "customer_projects_quota_exceeded";
    /// A resource is no longer known to its backend
    pub const RESOURCE_DISAPPEARED_FROM_BACKEND: &str = "resource_disappeared_from_backend";
}

/// Severity of an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Diagnostic
    Debug,
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Broken
    Error,
}

impl AlertSeverity {
    /// All severities in ascending order.
    pub const ALL: [AlertSeverity; 4] = [
        AlertSeverity::Debug,
        AlertSeverity::Info,
        AlertSeverity::Warning,
        AlertSeverity::Error,
    ];

    /// Get the string representation of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Debug => "debug",
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
        }
    }

    /// Parse a severity name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s.to_lowercase())
    }
}

/// An alert raised on a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Unique alert ID
    pub id: Uuid,
    /// Alert type (e.g., "service_unavailable")
    pub alert_type: String,
    /// Rendered message
    pub message: String,
    /// Severity
    pub severity: AlertSeverity,
    /// Object the alert is about
    pub scope: EventScope,
    /// Customer context
    pub customer_id: Option<Uuid>,
    /// Project context
    pub project_id: Option<Uuid>,
    /// When the alert was first raised
    pub created: DateTime<Utc>,
    /// When the alert was closed
    pub closed: Option<DateTime<Utc>>,
    /// Whether staff acknowledged the alert
    pub acknowledged: bool,
    /// Additional context
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl Alert {
    /// Check if the alert is still open.
    pub fn is_open(&self) -> bool {
        self.closed.is_none()
    }
}

/// Everything needed to raise an alert.
#[derive(Debug, Clone)]
pub struct AlertRequest {
    /// Alert type
    pub alert_type: String,
    /// Rendered message
    pub message: String,
    /// Severity
    pub severity: AlertSeverity,
    /// Object the alert is about
    pub scope: EventScope,
    /// Customer context
    pub customer_id: Option<Uuid>,
    /// Project context
    pub project_id: Option<Uuid>,
    /// Additional context
    pub context: HashMap<String, serde_json::Value>,
}

impl AlertRequest {
    /// Create a request.
    pub fn new(
        alert_type: impl Into<String>,
        message: impl Into<String>,
        severity: AlertSeverity,
        scope: EventScope,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            message: message.into(),
            severity,
            scope,
            customer_id: None,
            project_id: None,
            context: HashMap::new(),
        }
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

    /// Add context.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Sort order of alert queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertOrdering {
    /// `severity`
    Severity,
    /// `-severity`
    SeverityDesc,
    /// `created`
    Created,
    /// `-created`
    #[default]
    CreatedDesc,
}

impl AlertOrdering {
    /// Parse the `o` query value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "severity" => Some(Self::Severity),
            "-severity" => Some(Self::SeverityDesc),
            "created" => Some(Self::Created),
            "-created" => Some(Self::CreatedDesc),
            _ => None,
        }
    }
}

/// Alert query filters. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    /// Only acknowledged or only unacknowledged alerts
    pub acknowledged: Option<bool>,
    /// Only open alerts
    pub opened: bool,
    /// Only closed alerts
    pub closed: bool,
    /// Only these severity names
    pub severities: Vec<String>,
    /// Only these alert types
    pub alert_types: Vec<String>,
    /// Drop alert types of these feature groups
    pub exclude_features: Vec<String>,
    /// Only alerts about this object
    pub scope: Option<EventScope>,
    /// Only alerts about objects of this type
    pub scope_type: Option<String>,
    /// Case-insensitive substring of the message
    pub message: Option<String>,
    /// Closed at or after
    pub closed_from: Option<DateTime<Utc>>,
    /// Closed before
    pub closed_to: Option<DateTime<Utc>>,
    /// Created at or after
    pub created_from: Option<DateTime<Utc>>,
    /// Created before
    pub created_to: Option<DateTime<Utc>>,
    /// Open at or after this time
    pub from: Option<DateTime<Utc>>,
    /// Created at or before this time
    pub to: Option<DateTime<Utc>>,
    /// Sort order
    pub ordering: AlertOrdering,
}

fn parse_alert_scope_type(value: &str) -> LoggingResult<ResourceType> {
    ResourceType::all()
        .into_iter()
        .find(|t| t.as_str() == value)
        .ok_or_else(|| LoggingError::InvalidScopeType {
            value: value.to_string(),
            choices: ResourceType::all()
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn within(value: Option<DateTime<Utc>>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    match value {
        Some(v) => from.map_or(true, |f| v >= f) && to.map_or(true, |t| v < t),
        None => false,
    }
}

/// In-memory alert store.
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    alerts: Vec<Alert>,
}

impl AlertLog {
    /// Create an empty alert log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise an alert or refresh the open one of the same type and scope.
    ///
    /// # Returns
    ///
    /// The alert and whether it was newly created
    pub fn raise(&mut self, request: AlertRequest, now: DateTime<Utc>) -> (Alert, bool) {
        if let Some(alert) = self.alerts.iter_mut().find(|a| {
            a.is_open() && a.alert_type == request.alert_type && a.scope == request.scope
        }) {
            alert.message = request.message;
            alert.severity = request.severity;
            alert.context = request.context;
            tracing::debug!(alert_id = %alert.id, alert_type = %alert.alert_type, "Alert refreshed");
            return (alert.clone(), false);
        }

        let alert = Alert {
            id: Uuid::now_v7(),
            alert_type: request.alert_type,
            message: request.message,
            severity: request.severity,
            scope: request.scope,
            customer_id: request.customer_id,
            project_id: request.project_id,
            created: now,
            closed: None,
            acknowledged: false,
            context: request.context,
        };
        tracing::warn!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            scope = %alert.scope,
            "{}",
            alert.message
        );
        self.alerts.push(alert.clone());
        (alert, true)
    }

    /// Close the open alert of a type on a scope.
    ///
    /// # Returns
    ///
    /// The closed alert, or `None` if none was open
    pub fn close(&mut self, alert_type: &str, scope: &EventScope, now: DateTime<Utc>) -> Option<Alert> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.is_open() && a.alert_type == alert_type && a.scope == *scope)?;
        alert.closed = Some(now);
        tracing::info!(alert_id = %alert.id, alert_type, "Alert closed");
        Some(alert.clone())
    }

    /// Get an alert by ID.
    pub fn get(&self, id: Uuid) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> LoggingResult<&mut Alert> {
        self.alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(LoggingError::AlertNotFound(id))
    }

    /// Acknowledge an alert.
    pub fn acknowledge(&mut self, id: Uuid) -> LoggingResult<()> {
        let alert = self.get_mut(id)?;
        if alert.acknowledged {
            return Err(LoggingError::AlreadyAcknowledged);
        }
        alert.acknowledged = true;
        Ok(())
    }

    /// Withdraw an acknowledgment.
    pub fn cancel_acknowledgment(&mut self, id: Uuid) -> LoggingResult<()> {
        let alert = self.get_mut(id)?;
        if !alert.acknowledged {
            return Err(LoggingError::NotAcknowledged);
        }
        alert.acknowledged = false;
        Ok(())
    }

    /// All stored alerts.
    pub fn all(&self) -> &[Alert] {
        &self.alerts
    }

    /// Query the alerts.
    ///
    /// `permitted` is `None` for unrestricted viewers.
    ///
    /// # Errors
    ///
    /// `InvalidScopeType` for an unknown `scope_type`
    pub fn query(&self, query: &AlertQuery, permitted: Option<&PermittedIds>) -> LoggingResult<Vec<&Alert>> {
        let scope_type = query
            .scope_type
            .as_deref()
            .map(parse_alert_scope_type)
            .transpose()?;
        let severities: Vec<AlertSeverity> = query
            .severities
            .iter()
            .filter_map(|s| AlertSeverity::parse(s))
            .collect();
        let excluded = expand_alert_groups(&query.exclude_features);
        let message = query.message.as_ref().map(|m| m.to_lowercase());

        let mut result: Vec<&Alert> = self
            .alerts
            .iter()
            .filter(|a| permitted.map_or(true, |p| {
                a.customer_id.map_or(false, |id| p.customers.contains(&id))
                    || a.project_id.map_or(false, |id| p.projects.contains(&id))
            }))
            .filter(|a| query.acknowledged.map_or(true, |ack| a.acknowledged == ack))
            .filter(|a| !query.opened || a.is_open())
            .filter(|a| !query.closed || !a.is_open())
            .filter(|a| query.severities.is_empty() || severities.contains(&a.severity))
            .filter(|a| query.alert_types.is_empty() || query.alert_types.contains(&a.alert_type))
            .filter(|a| !excluded.contains(&a.alert_type))
            .filter(|a| query.scope.map_or(true, |s| a.scope == s))
            .filter(|a| scope_type.map_or(true, |t| a.scope.resource_type == t))
            .filter(|a| match &message {
                Some(text) => a.message.to_lowercase().contains(text),
                None => true,
            })
            .filter(|a| within(a.closed, query.closed_from, query.closed_to))
            .filter(|a| within(Some(a.created), query.created_from, query.created_to))
            .filter(|a| query.from.map_or(true, |start| a.closed.map_or(true, |c| c >= start)))
            .filter(|a| query.to.map_or(true, |end| a.created <= end))
            .collect();

        match query.ordering {
            AlertOrdering::Severity => result.sort_by(|a, b| a.severity.cmp(&b.severity)),
            AlertOrdering::SeverityDesc => result.sort_by(|a, b| b.severity.cmp(&a.severity)),
            AlertOrdering::Created => result.sort_by(|a, b| a.created.cmp(&b.created)),
            AlertOrdering::CreatedDesc => result.sort_by(|a, b| b.created.cmp(&a.created)),
        }
        Ok(result)
    }
}

/// Count alerts per severity. Every severity is present in the result.
pub fn alert_stats<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> BTreeMap<&'static str, usize> {
    let mut stats: BTreeMap<&'static str, usize> =
        AlertSeverity::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for alert in alerts {
        *stats.entry(alert.severity.as_str()).or_default() += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn cloud_scope() -> EventScope {
        EventScope::new(ResourceType::Cloud, Uuid::now_v7())
    }

    #[test]
    fn test_raise_refreshes_open_alert() {
        let mut log = AlertLog::new();
        let scope = cloud_scope();
        let now = Utc::now();

        let (first, created) = log.raise(
            AlertRequest::new(alert_types::SERVICE_UNAVAILABLE, "Timeout", AlertSeverity::Warning, scope),
            now,
        );
        assert!(created);

        let (second, created) = log.raise(
            AlertRequest::new(alert_types::SERVICE_UNAVAILABLE, "Refused", AlertSeverity::Error, scope),
            now + Duration::minutes(5),
        );
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.message, "Refused");
        assert_eq!(second.severity, AlertSeverity::Error);
        assert_eq!(second.created, now);
        assert_eq!(log.all().len(), 1);
    }

    #[test]
    fn test_close_then_raise_creates_new_alert() {
        let mut log = AlertLog::new();
        let scope = cloud_scope();
        let now = Utc::now();
        log.raise(
            AlertRequest::new(alert_types::SERVICE_UNAVAILABLE, "Down", AlertSeverity::Error, scope),
            now,
        );
        let closed = log
            .close(alert_types::SERVICE_UNAVAILABLE, &scope, now + Duration::hours(1))
            .unwrap();
        assert!(!closed.is_open());
        assert!(log.close(alert_types::SERVICE_UNAVAILABLE, &scope, now).is_none());

        let (_, created) = log.raise(
            AlertRequest::new(alert_types::SERVICE_UNAVAILABLE, "Down again", AlertSeverity::Error, scope),
            now + Duration::hours(2),
        );
        assert!(created);
        assert_eq!(log.all().len(), 2);
    }

    #[test]
    fn test_acknowledgment() {
        let mut log = AlertLog::new();
        let (alert, _) = log.raise(
            AlertRequest::new("quota_usage_is_over_threshold", "90%", AlertSeverity::Info, cloud_scope()),
            Utc::now(),
        );
        assert!(matches!(log.cancel_acknowledgment(alert.id), Err(LoggingError::NotAcknowledged)));
        log.acknowledge(alert.id).unwrap();
        assert!(log.get(alert.id).unwrap().acknowledged);
        let err = log.acknowledge(alert.id).unwrap_err();
        assert_eq!(err.status_code(), 409);
        log.cancel_acknowledgment(alert.id).unwrap();
        assert!(matches!(log.acknowledge(Uuid::now_v7()), Err(LoggingError::AlertNotFound(_))));
    }

    fn populated() -> (AlertLog, Uuid, DateTime<Utc>) {
        let mut log = AlertLog::new();
        let customer = Uuid::now_v7();
        let base = Utc::now() - Duration::days(1);
        log.raise(
            AlertRequest::new(alert_types::SERVICE_UNAVAILABLE, "Cloud Main is down", AlertSeverity::Error, cloud_scope())
                .with_customer(customer),
            base,
        );
        let instance = EventScope::new(ResourceType::Instance, Uuid::now_v7());
        log.raise(
            AlertRequest::new(
                alert_types::RESOURCE_DISAPPEARED_FROM_BACKEND,
                "Instance web-1 is gone",
                AlertSeverity::Warning,
                instance,
            )
            .with_customer(customer),
            base + Duration::hours(1),
        );
        log.raise(
            AlertRequest::new(
                alert_types::CUSTOMER_PROJECTS_QUOTA_EXCEEDED,
                "Globex reached its project limit",
                AlertSeverity::Info,
                EventScope::new(ResourceType::Customer, Uuid::now_v7()),
            ),
            base + Duration::hours(2),
        );
        log.close(alert_types::RESOURCE_DISAPPEARED_FROM_BACKEND, &instance, base + Duration::hours(3));
        (log, customer, base)
    }

    #[test]
    fn test_alert_query_filters() {
        let (log, customer, base) = populated();

        let open = log.query(&AlertQuery { opened: true, ..Default::default() }, None).unwrap();
        assert_eq!(open.len(), 2);

        let closed = log.query(&AlertQuery { closed: true, ..Default::default() }, None).unwrap();
        assert_eq!(closed[0].alert_type, alert_types::RESOURCE_DISAPPEARED_FROM_BACKEND);

        let severe = log
            .query(
                &AlertQuery {
                    severities: vec!["Error".to_string(), "Warning".to_string()],
                    ordering: AlertOrdering::SeverityDesc,
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(severe.len(), 2);
        assert_eq!(severe[0].severity, AlertSeverity::Error);

        let no_resources = log
            .query(
                &AlertQuery {
                    exclude_features: vec!["resources".to_string()],
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(no_resources.len(), 2);

        let by_type = log
            .query(&AlertQuery { scope_type: Some("cloud".to_string()), ..Default::default() }, None)
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert!(log
            .query(&AlertQuery { scope_type: Some("planet".to_string()), ..Default::default() }, None)
            .is_err());

        let matched = log
            .query(&AlertQuery { message: Some("LIMIT".to_string()), ..Default::default() }, None)
            .unwrap();
        assert_eq!(matched.len(), 1);

        // open at or after base+4h: the closed alert drops out
        let window = log
            .query(&AlertQuery { from: Some(base + Duration::hours(4)), ..Default::default() }, None)
            .unwrap();
        assert_eq!(window.len(), 2);

        let early = log
            .query(&AlertQuery { to: Some(base + Duration::minutes(30)), ..Default::default() }, None)
            .unwrap();
        assert_eq!(early.len(), 1);

        let created = log
            .query(
                &AlertQuery {
                    created_from: Some(base + Duration::hours(1)),
                    created_to: Some(base + Duration::hours(2)),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(created.len(), 1);

        let permitted = PermittedIds {
            customers: BTreeSet::from([customer]),
            ..PermittedIds::default()
        };
        assert_eq!(log.query(&AlertQuery::default(), Some(&permitted)).unwrap().len(), 2);
    }

    #[test]
    fn test_alert_stats() {
        let (log, _, _) = populated();
        let stats = alert_stats(log.all());
        assert_eq!(stats["error"], 1);
        assert_eq!(stats["warning"], 1);
        assert_eq!(stats["info"], 1);
        assert_eq!(stats["debug"], 0);
    }
}
