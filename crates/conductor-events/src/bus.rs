//! Event bus
//!
//! Audit events are published on topics `{module}.{event_type}` (for
//! example `structure.role_granted`). Subscribers and handlers select
//! events with topic patterns:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments

use crate::types::Event;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Event bus errors.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Topic pattern cannot be parsed
    #[error("Invalid topic pattern '{0}'")]
    InvalidPattern(String),

    /// Subscriber fell behind and missed events
    #[error("Subscriber lagged behind by {0} events")]
    Lagged(u64),

    /// A handler rejected an event
    #[error("Handler error: {0}")]
    Handler(String),

    /// Bus dropped
    #[error("Event bus closed")]
    Closed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Any,
}

/// Parsed topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Parse a pattern such as `iaas.*` or `#.role_granted`.
    pub fn parse(pattern: &str) -> EventBusResult<Self> {
        if pattern.is_empty() {
            return Err(EventBusError::InvalidPattern(pattern.to_string()));
        }
        let segments = pattern
            .split('.')
            .map(|segment| match segment {
                "" => Err(EventBusError::InvalidPattern(pattern.to_string())),
                "*" => Ok(Segment::One),
                "#" => Ok(Segment::Any),
                literal => Ok(Segment::Literal(literal.to_string())),
            })
            .collect::<EventBusResult<Vec<_>>>()?;
        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Pattern text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a topic matches.
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('.').collect();
        matches_from(&self.segments, &parts)
    }
}

fn matches_from(segments: &[Segment], parts: &[&str]) -> bool {
    match segments.split_first() {
        None => parts.is_empty(),
        Some((Segment::Any, rest)) => (0..=parts.len()).any(|skip| matches_from(rest, &parts[skip..])),
        Some((Segment::One, rest)) => !parts.is_empty() && matches_from(rest, &parts[1..]),
        Some((Segment::Literal(literal), rest)) => {
            parts.first() == Some(&literal.as_str()) && matches_from(rest, &parts[1..])
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Stream of events matching one pattern. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    /// Subscription ID
    pub id: Uuid,
    pattern: TopicPattern,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Pattern this subscription was created with.
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Next matching event.
    ///
    /// # Errors
    ///
    /// `Lagged` when events were dropped for this subscriber, `Closed`
    /// once the bus is gone.
    pub async fn recv(&mut self) -> EventBusResult<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.pattern.matches(&event.topic()) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Err(EventBusError::Lagged(missed))
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::Closed),
            }
        }
    }
}

/// Consumer of published events, run off the publishing task.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: Event) -> EventBusResult<()>;

    /// Patterns of the events this handler wants.
    fn topics(&self) -> Vec<String>;
}

/// Publish/subscribe access to audit events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to subscribers and handlers.
    async fn publish(&self, event: Event) -> EventBusResult<()>;

    /// Subscribe to a topic pattern.
    async fn subscribe(&self, pattern: &str) -> EventBusResult<Subscription>;

    /// Register a handler; its patterns are validated up front.
    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()>;

    /// Delivery counters.
    async fn stats(&self) -> EventBusStats;
}

/// Event bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusStats {
    /// Events published
    pub published: u64,
    /// Handler invocations started
    pub handler_runs: u64,
    /// Handler invocations that returned an error
    pub handler_failures: u64,
    /// Live subscriptions
    pub subscribers: usize,
    /// Registered handlers
    pub handlers: usize,
}

struct RegisteredHandler {
    patterns: Vec<TopicPattern>,
    handler: Arc<dyn EventHandler>,
}

impl RegisteredHandler {
    fn wants(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(topic))
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    handler_runs: AtomicU64,
    handler_failures: AtomicU64,
}

/// In-process event bus.
///
/// All subscriptions share one broadcast channel and filter on receipt.
/// Each matching handler runs once per event on a spawned task.
pub struct MemoryEventBus {
    sender: broadcast::Sender<Event>,
    handlers: RwLock<Vec<RegisteredHandler>>,
    counters: Arc<Counters>,
}

impl fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl MemoryEventBus {
    /// Bus buffering up to 1024 events per subscriber.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Bus with a custom per-subscriber buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            handlers: RwLock::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        let topic = event.topic();
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        // No receivers is not an error.
        let subscribers = self.sender.send(event.clone()).unwrap_or(0);

        let handlers = self.handlers.read().await;
        for registered in handlers.iter().filter(|h| h.wants(&topic)) {
            let handler = registered.handler.clone();
            let counters = self.counters.clone();
            let event = event.clone();
            counters.handler_runs.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                let event_id = event.id;
                if let Err(e) = handler.handle(event).await {
                    counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(%event_id, error = %e, "Event handler failed");
                }
            });
        }

        tracing::debug!(%topic, event_id = %event.id, subscribers, "Event published");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> EventBusResult<Subscription> {
        let pattern = TopicPattern::parse(pattern)?;
        Ok(Subscription {
            id: Uuid::now_v7(),
            pattern,
            receiver: self.sender.subscribe(),
        })
    }

    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()> {
        let patterns = handler
            .topics()
            .iter()
            .map(|t| TopicPattern::parse(t))
            .collect::<EventBusResult<Vec<_>>>()?;
        tracing::debug!(topics = ?handler.topics(), "Registering event handler");
        self.handlers
            .write()
            .await
            .push(RegisteredHandler { patterns, handler });
        Ok(())
    }

    async fn stats(&self) -> EventBusStats {
        EventBusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            handler_runs: self.counters.handler_runs.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
            handlers: self.handlers.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_rbac::Module;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn event(event_type: &str, source: Module) -> Event {
        Event::new(event_type, source, "", serde_json::json!({}))
    }

    fn matches(pattern: &str, topic: &str) -> bool {
        TopicPattern::parse(pattern).unwrap().matches(topic)
    }

    #[test]
    fn test_topic_patterns() {
        assert!(matches("structure.role_granted", "structure.role_granted"));
        assert!(matches("structure.*", "structure.role_granted"));
        assert!(matches("*.role_granted", "structure.role_granted"));
        assert!(matches("#", "iaas.resource_start_succeeded"));
        assert!(matches("structure.#", "structure.role_granted"));
        assert!(matches("#.role_granted", "structure.role_granted"));

        assert!(!matches("structure.role_revoked", "structure.role_granted"));
        assert!(!matches("billing.*", "structure.role_granted"));
        assert!(!matches("structure", "structure.role_granted"));
        assert!(!matches("*", "structure.role_granted"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(TopicPattern::parse("").is_err());
        assert!(TopicPattern::parse("iaas..x").is_err());
        assert!(TopicPattern::parse("iaas.").is_err());
        assert_eq!(TopicPattern::parse("iaas.*").unwrap().to_string(), "iaas.*");
    }

    #[tokio::test]
    async fn test_subscription_only_sees_matching_events() {
        let bus = MemoryEventBus::new();
        let mut sub = bus.subscribe("structure.*").await.unwrap();

        bus.publish(event("resource_import_succeeded", Module::Iaas))
            .await
            .unwrap();
        bus.publish(event("project_creation_succeeded", Module::Structure))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type, "project_creation_succeeded");
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let bus = MemoryEventBus::with_capacity(2);
        let mut sub = bus.subscribe("#").await.unwrap();
        for _ in 0..4 {
            bus.publish(event("role_granted", Module::Structure))
                .await
                .unwrap();
        }
        assert!(matches!(sub.recv().await, Err(EventBusError::Lagged(2))));
        assert!(sub.recv().await.is_ok());
    }

    struct Counter {
        seen: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: Event) -> EventBusResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EventBusError::Handler("rejected".to_string()));
            }
            Ok(())
        }

        fn topics(&self) -> Vec<String> {
            vec!["billing.#".to_string(), "billing.*".to_string()]
        }
    }

    async fn wait_for(seen: &AtomicUsize, count: usize) {
        for _ in 0..50 {
            if seen.load(Ordering::SeqCst) >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_handler_runs_once_per_event() {
        let bus = MemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.register_handler(Arc::new(Counter { seen: seen.clone(), fail: false }))
            .await
            .unwrap();

        bus.publish(event("invoice_creation_succeeded", Module::Billing))
            .await
            .unwrap();
        bus.publish(event("role_granted", Module::Structure))
            .await
            .unwrap();

        wait_for(&seen, 1).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let stats = bus.stats().await;
        assert_eq!(stats.published, 2);
        assert_eq!(stats.handler_runs, 1);
        assert_eq!(stats.handlers, 1);
    }

    #[tokio::test]
    async fn test_handler_failures_are_counted() {
        let bus = MemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.register_handler(Arc::new(Counter { seen: seen.clone(), fail: true }))
            .await
            .unwrap();

        bus.publish(event("invoice_deletion_succeeded", Module::Billing))
            .await
            .unwrap();
        wait_for(&seen, 1).await;
        for _ in 0..50 {
            if bus.stats().await.handler_failures == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.stats().await.handler_failures, 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = MemoryEventBus::new();
        let sub = bus.subscribe("iaas.*").await.unwrap();
        assert_eq!(sub.pattern().as_str(), "iaas.*");
        assert_eq!(bus.stats().await.subscribers, 1);
        drop(sub);
        assert_eq!(bus.stats().await.subscribers, 0);
        assert!(bus.subscribe("").await.is_err());
    }
}
