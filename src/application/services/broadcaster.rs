//! Event Broadcaster
//!
//! Fans processor events out to every live subscriber of the owning user.
//! Delivery never blocks: each subscriber has a bounded queue and one that
//! is full or gone is dropped without affecting the others. Per-user order
//! matches the order of [`EventBroadcaster::broadcast`] calls.

use crate::domain::entities::behavioral_alert::BehavioralAlert;
use crate::domain::entities::trade::Trade;
use crate::domain::value_objects::assessment::{Assessment, TradeReview};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Default queue depth per subscriber
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// What caused a scoring run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTrigger {
    Opened,
    Modified,
}

/// Event pushed to subscribers, serialized as `{"type": ..., ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeEvent {
    Connected {
        user_id: String,
    },
    TradeOpened {
        trade: Trade,
        simulated: bool,
    },
    TradeClosed {
        trade: Trade,
        simulated: bool,
    },
    TradeUpdated {
        trade: Trade,
        previous_stop_loss: Option<f64>,
        previous_take_profit: Option<f64>,
    },
    ScoreUpdate {
        trade_id: String,
        trigger: ScoreTrigger,
        assessment: Assessment,
    },
    ReviewUpdate {
        trade_id: String,
        review: TradeReview,
    },
    BehavioralAlert {
        trade_id: String,
        alert: BehavioralAlert,
    },
    Pong,
}

impl TradeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TradeEvent::Connected { .. } => "connected",
            TradeEvent::TradeOpened { .. } => "trade_opened",
            TradeEvent::TradeClosed { .. } => "trade_closed",
            TradeEvent::TradeUpdated { .. } => "trade_updated",
            TradeEvent::ScoreUpdate { .. } => "score_update",
            TradeEvent::ReviewUpdate { .. } => "review_update",
            TradeEvent::BehavioralAlert { .. } => "behavioral_alert",
            TradeEvent::Pong => "pong",
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<TradeEvent>,
}

/// Receiving end handed to one subscriber
pub struct Subscription {
    pub id: u64,
    pub user_id: String,
    pub receiver: mpsc::Receiver<TradeEvent>,
}

pub struct EventBroadcaster {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Subscriber>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self, user_id: &str) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.table()
            .entry(user_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!("Subscriber {} registered for user {}", id, user_id);
        Subscription {
            id,
            user_id: user_id.to_string(),
            receiver,
        }
    }

    pub fn unsubscribe(&self, user_id: &str, subscriber_id: u64) {
        let mut table = self.table();
        if let Some(list) = table.get_mut(user_id) {
            list.retain(|s| s.id != subscriber_id);
            if list.is_empty() {
                table.remove(user_id);
            }
        }
        debug!("Subscriber {} removed for user {}", subscriber_id, user_id);
    }

    /// Deliver `event` to every subscriber of `user_id`. Returns the number
    /// of subscribers that accepted it.
    pub fn broadcast(&self, user_id: &str, event: TradeEvent) -> usize {
        let mut table = self.table();
        let Some(list) = table.get_mut(user_id) else {
            debug!("No subscribers for user {}, dropping {}", user_id, event.kind());
            return 0;
        };

        let kind = event.kind();
        let mut delivered = 0;
        list.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Subscriber {} of user {} is too slow, dropping it",
                    subscriber.id, user_id
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} of user {} went away", subscriber.id, user_id);
                false
            }
        });
        if list.is_empty() {
            table.remove(user_id);
        }

        debug!("Broadcast {} to {} subscriber(s) of {}", kind, delivered, user_id);
        delivered
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.table().get(user_id).map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> TradeEvent {
        TradeEvent::Pong
    }

    #[tokio::test]
    async fn test_only_owning_user_receives() {
        let broadcaster = EventBroadcaster::default();
        let mut alice = broadcaster.subscribe("alice");
        let mut bob = broadcaster.subscribe("bob");

        assert_eq!(broadcaster.broadcast("alice", pong()), 1);
        assert_eq!(alice.receiver.recv().await, Some(TradeEvent::Pong));
        assert!(bob.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_order_matches_calls() {
        let broadcaster = EventBroadcaster::default();
        let mut sub = broadcaster.subscribe("u");
        for i in 0..5 {
            broadcaster.broadcast(
                "u",
                TradeEvent::Connected {
                    user_id: format!("{}", i),
                },
            );
        }
        for i in 0..5 {
            match sub.receiver.recv().await {
                Some(TradeEvent::Connected { user_id }) => assert_eq!(user_id, i.to_string()),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped_without_affecting_others() {
        let broadcaster = EventBroadcaster::new(1);
        let _slow = broadcaster.subscribe("u");
        let mut fast = broadcaster.subscribe("u");

        assert_eq!(broadcaster.broadcast("u", pong()), 2);
        fast.receiver.recv().await;
        // The slow queue is full now
        assert_eq!(broadcaster.broadcast("u", pong()), 1);
        assert_eq!(broadcaster.subscriber_count("u"), 1);
        assert!(fast.receiver.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let broadcaster = EventBroadcaster::default();
        let sub = broadcaster.subscribe("u");
        drop(sub);
        assert_eq!(broadcaster.broadcast("u", pong()), 0);
        assert_eq!(broadcaster.subscriber_count("u"), 0);
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(TradeEvent::Pong).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "pong" }));
    }
}
