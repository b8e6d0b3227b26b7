//! Side-effect notifications.
//!
//! Mutating tools announce what they changed through a [`Broadcaster`]. The
//! in-process [`EventBus`] fans each event out to every subscriber of its
//! type; transports forward subscriptions to browsers or other processes.
//! Delivery is fire-and-forget: a closed subscriber never fails a tool call.

use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Event published after a successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_type: String,
    pub payload: Value,
    pub timestamp_ms: i64,
    /// Bot the change belongs to, when known.
    pub bot_id: Option<String>,
}

impl BusEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            bot_id: None,
        }
    }

    pub fn for_bot(mut self, bot_id: Option<String>) -> Self {
        self.bot_id = bot_id;
        self
    }
}

/// Sink for side-effect notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Returns the number of subscribers reached.
    async fn broadcast(&self, event: BusEvent) -> Result<usize>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

#[async_trait]
impl Broadcaster for NullBroadcaster {
    async fn broadcast(&self, _event: BusEvent) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug)]
struct Subscriber {
    id: String,
    tx: mpsc::UnboundedSender<BusEvent>,
}

/// Subscription receipt, used to unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub event_types: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub active_subscribers: usize,
}

/// In-memory pub/sub bus.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    /// event_type -> subscribers
    subscribers: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
    stats: Arc<RwLock<BusStats>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish to every subscriber of `event.event_type`.
    pub async fn publish(&self, event: BusEvent) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let mut delivered = 0;
        if let Some(subs) = subscribers.get_mut(&event.event_type) {
            // Closed receivers are pruned on the way.
            subs.retain(|s| {
                let ok = s.tx.send(event.clone()).is_ok();
                if ok {
                    delivered += 1;
                }
                ok
            });
        }
        let active = subscribers.values().map(Vec::len).sum();
        drop(subscribers);

        let mut stats = self.stats.write().await;
        stats.events_published += 1;
        stats.events_delivered += delivered as u64;
        stats.active_subscribers = active;

        tracing::debug!(event_type = %event.event_type, delivered, "published event");
        delivered
    }

    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        event_types: Vec<String>,
    ) -> (Subscription, mpsc::UnboundedReceiver<BusEvent>) {
        let id = subscriber_id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subscribers = self.subscribers.write().await;
        for event_type in &event_types {
            subscribers.entry(event_type.clone()).or_default().push(Subscriber {
                id: id.clone(),
                tx: tx.clone(),
            });
        }
        let active = subscribers.values().map(Vec::len).sum();
        drop(subscribers);
        self.stats.write().await.active_subscribers = active;

        tracing::debug!(subscriber = %id, ?event_types, "subscriber registered");
        (Subscription { id, event_types }, rx)
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) {
        let mut subscribers = self.subscribers.write().await;
        for event_type in &subscription.event_types {
            if let Some(subs) = subscribers.get_mut(event_type) {
                subs.retain(|s| s.id != subscription.id);
            }
        }
        let active = subscribers.values().map(Vec::len).sum();
        drop(subscribers);
        self.stats.write().await.active_subscribers = active;
    }

    pub async fn stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }
}

#[async_trait]
impl Broadcaster for EventBus {
    async fn broadcast(&self, event: BusEvent) -> Result<usize> {
        Ok(self.publish(event).await)
    }
}
