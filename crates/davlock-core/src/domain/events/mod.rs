//! Lock event sinks
//!
//! The lock manager hands every [`LockEvent`] to an optional
//! [`EventPublisher`] once its write lock is released. [`InMemoryEventStore`]
//! keeps an audit trail that can be filtered by token, subtree, forest,
//! owner or event type.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use crate::dav::path::distance;
use crate::domain::locking::{LockEvent, LockEventType, LockKind};
use crate::error::Result;

/// Receives lock events from the lock manager
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &LockEvent) -> Result<()>;
}

/// Filter over recorded lock events; unset criteria match everything
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    token: Option<String>,
    subtree: Option<String>,
    kind: Option<LockKind>,
    owner: Option<String>,
    event_type: Option<LockEventType>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events about the lock behind `token`
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Events on `path` or any path below it
    pub fn under(mut self, path: impl Into<String>) -> Self {
        self.subtree = Some(path.into());
        self
    }

    pub fn kind(mut self, kind: LockKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Events involving `owner`
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn event_type(mut self, event_type: LockEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn matches(&self, event: &LockEvent) -> bool {
        self.token
            .as_ref()
            .is_none_or(|token| event.token.as_ref() == Some(token))
            && self
                .subtree
                .as_ref()
                .is_none_or(|root| distance(root, &event.path).is_some())
            && self.kind.is_none_or(|kind| event.kind == kind)
            && self.owner.as_ref().is_none_or(|owner| event.involves(owner))
            && self.event_type.is_none_or(|event_type| event.event_type == event_type)
    }
}

/// Audit trail of lock events kept in memory.
///
/// With a capacity set, the oldest events are dropped once it is reached.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<VecDeque<LockEvent>>,
    capacity: Option<usize>,
}

impl InMemoryEventStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store keeping at most the `capacity` most recent events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }

    pub fn record(&self, event: LockEvent) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return;
            }
            while events.len() >= capacity {
                events.pop_front();
            }
        }
        events.push_back(event);
    }

    /// Events matching `query`, oldest first
    pub fn query(&self, query: &EventQuery) -> Vec<LockEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect()
    }

    /// Lifecycle of the lock behind `token`
    pub fn events_for(&self, token: &str) -> Vec<LockEvent> {
        self.query(&EventQuery::new().token(token))
    }

    /// Everything that happened at or below `path` in one forest
    pub fn history(&self, kind: LockKind, path: &str) -> Vec<LockEvent> {
        self.query(&EventQuery::new().kind(kind).under(path))
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventStore {
    async fn publish(&self, event: &LockEvent) -> Result<()> {
        self.record(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::{Depth, LockInfo};
    use std::collections::BTreeSet;

    fn grant(kind: LockKind, path: &str, token: &str, owner: &str) -> LockEvent {
        let info = LockInfo {
            token: token.to_string(),
            path: path.to_string(),
            kind,
            owners: BTreeSet::from([owner.to_string()]),
            exclusive: true,
            depth: Depth::Infinity,
            expires_at: None,
            subtree_expires_at: None,
        };
        LockEvent::lock_acquired(&info, owner)
    }

    fn sample_store() -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        store.record(grant(LockKind::Real, "/docs", "1", "alice"));
        store.record(grant(LockKind::Real, "/docs/plan.md", "2", "bob"));
        store.record(grant(LockKind::Real, "/docsets", "3", "alice"));
        store.record(grant(LockKind::Temporary, "/docs/tmp", "4", "copy-job"));
        store.record(LockEvent::lock_conflict(LockKind::Real, "/docs/plan.md", "carol", true));
        store.record(LockEvent::lock_released(LockKind::Real, "1", "/docs", "alice"));
        store
    }

    #[test]
    fn test_query_by_token() {
        let store = sample_store();
        let lifecycle = store.events_for("1");

        assert_eq!(lifecycle.len(), 2);
        assert_eq!(lifecycle[0].event_type, LockEventType::LockAcquired);
        assert_eq!(lifecycle[1].event_type, LockEventType::LockReleased);
    }

    #[test]
    fn test_history_is_scoped_to_subtree_and_forest() {
        let store = sample_store();
        let history = store.history(LockKind::Real, "/docs");

        // "/docsets" shares the prefix but is not below "/docs"
        assert_eq!(history.len(), 4);
        assert!(history.iter().all(|e| e.path.starts_with("/docs") && e.path != "/docsets"));
        assert!(history.iter().all(|e| e.kind == LockKind::Real));

        assert_eq!(store.history(LockKind::Temporary, "/").len(), 1);
    }

    #[test]
    fn test_query_by_owner_and_type() {
        let store = sample_store();

        let alice = store.query(&EventQuery::new().owner("alice"));
        assert_eq!(alice.len(), 3);

        let refused = store.query(&EventQuery::new().event_type(LockEventType::LockConflict));
        assert_eq!(refused.len(), 1);
        assert!(refused[0].involves("carol"));

        let alice_grants = store.query(
            &EventQuery::new()
                .owner("alice")
                .event_type(LockEventType::LockAcquired)
                .under("/docs"),
        );
        assert_eq!(alice_grants.len(), 1);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let store = InMemoryEventStore::with_capacity(2);
        store.record(grant(LockKind::Real, "/a", "1", "alice"));
        store.record(grant(LockKind::Real, "/b", "2", "alice"));
        store.record(grant(LockKind::Real, "/c", "3", "alice"));

        assert_eq!(store.len(), 2);
        assert!(store.events_for("1").is_empty());
        assert_eq!(store.events_for("3").len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_as_publisher() {
        let store = InMemoryEventStore::new();
        let event = LockEvent::lock_conflict(LockKind::Temporary, "/upload", "job-2", true);

        store.publish(&event).await.unwrap();

        assert_eq!(store.query(&EventQuery::new().kind(LockKind::Temporary)), vec![event]);
    }
}
