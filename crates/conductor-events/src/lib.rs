//! # Conductor Events
//!
//! Signal fan-out, audit events and alerts for Conductor.
//!
//! ## Overview
//!
//! The conductor-events crate handles:
//! - **Signals**: Ordered, awaited dispatch of post-save, pre/post-delete,
//!   transition, role and balance signals to connected receivers
//! - **Event Types**: Typed audit events per module with rendered messages
//! - **Event Bus**: Publish/subscribe delivery of audit events
//! - **Audit Log**: Storage and filtered, permission-aware queries
//! - **Alerts**: Raise, refresh, close and acknowledge alerts on a scope
//!
//! ## Architecture
//!
//! ```text
//! mutating operation
//!        │ Signal
//!        ▼
//! SignalDispatcher ──→ receivers (quotas, role slots, billing, ...)
//!        │ typed event
//!        ▼
//! MemoryEventBus ──→ EventLog (topic "#") ──→ EventQuery
//!                └──→ other subscribers
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_events::{EventBus, EventLog, EventQuery, MemoryEventBus, StructureEvent};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! async fn publish_example() {
//!     let bus = MemoryEventBus::new();
//!     let log = EventLog::new();
//!     bus.register_handler(Arc::new(log.clone())).await.unwrap();
//!
//!     let event = StructureEvent::CustomerCreated {
//!         customer_id: Uuid::now_v7(),
//!         customer_name: "Acme".to_string(),
//!     };
//!     bus.publish(event.to_event()).await.unwrap();
//!
//!     let customers = log
//!         .query(&EventQuery::new().with_features(&["customers"]), None)
//!         .await
//!         .unwrap();
//!     println!("{} customer events", customers.len());
//! }
//! ```
//!
//! ## Topic Patterns
//!
//! Topics are structured as `{module}.{event_type}`:
//! - `structure.role_granted` - Specific event
//! - `iaas.*` - All resource events
//! - `#` - All events

pub mod alerts;
pub mod audit;
pub mod bus;
pub mod error;
pub mod signals;
pub mod types;

// Re-export main types
pub use alerts::{
    alert_stats, alert_types, Alert, AlertLog, AlertOrdering, AlertQuery, AlertRequest,
    AlertSeverity,
};
pub use audit::{filter_events, EventLog, EventOrdering, EventQuery, EVENT_SCOPE_TYPES};
pub use bus::{
    EventBus, EventBusError, EventBusResult, EventBusStats, EventHandler, MemoryEventBus,
    Subscription, TopicPattern,
};
pub use error::{LoggingError, LoggingResult};
pub use signals::{
    Receiver, Signal, SignalDispatcher, SignalError, SignalHandler, SignalKind, SignalName,
    SignalResult,
};
pub use types::{
    event_groups, expand_alert_groups, expand_event_groups, Event, EventLevel, EventScope,
    InvitationEvent, InvoiceEvent, ResourceEvent, ResourceRef, StructureEvent, UserEvent,
    RESOURCE_ACTIONS,
};
