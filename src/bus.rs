//! Topic-based publish/subscribe fabric connecting agents.
//!
//! Delivery is at-least-once and ordered per topic per publisher. There
//! is no persistence: late subscribers miss prior events. Each
//! subscriber is serviced through a bounded queue; when a slow
//! subscriber falls behind, its oldest unread events are dropped and
//! the topic's `backpressure` counter is incremented. Publishing never
//! blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::{Fingerprint, Opportunity, Position, StrategyId, TradeRecord};

/// Bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Opportunity,
    StrategyGenerated,
    StrategyEvolved,
    TradeExecuted,
    PositionUpdated,
}

impl Topic {
    const ALL: [Topic; 5] = [
        Topic::Opportunity,
        Topic::StrategyGenerated,
        Topic::StrategyEvolved,
        Topic::TradeExecuted,
        Topic::PositionUpdated,
    ];

    fn index(self) -> usize {
        match self {
            Topic::Opportunity => 0,
            Topic::StrategyGenerated => 1,
            Topic::StrategyEvolved => 2,
            Topic::TradeExecuted => 3,
            Topic::PositionUpdated => 4,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Topic::Opportunity => "opportunity",
            Topic::StrategyGenerated => "strategy.generated",
            Topic::StrategyEvolved => "strategy.evolved",
            Topic::TradeExecuted => "trade.executed",
            Topic::PositionUpdated => "position.updated",
        };
        write!(f, "{s}")
    }
}

/// An immutable, timestamped event record.
#[derive(Debug, Clone)]
pub enum Event {
    OpportunityDetected(Arc<Opportunity>),
    OpportunityRefreshed(Fingerprint),
    StrategyGenerated(StrategyId),
    StrategyEvolved { parent: StrategyId, child: StrategyId },
    TradeExecuted(Arc<TradeRecord>),
    PositionUpdated(Arc<Position>),
}

impl Event {
    /// The topic this event belongs to.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Event::OpportunityDetected(_) | Event::OpportunityRefreshed(_) => Topic::Opportunity,
            Event::StrategyGenerated(_) => Topic::StrategyGenerated,
            Event::StrategyEvolved { .. } => Topic::StrategyEvolved,
            Event::TradeExecuted(_) => Topic::TradeExecuted,
            Event::PositionUpdated(_) => Topic::PositionUpdated,
        }
    }
}

struct TopicChannel {
    sender: broadcast::Sender<Event>,
    backpressure: AtomicU64,
}

/// The in-process message bus.
pub struct MessageBus {
    channels: [TopicChannel; 5],
}

impl MessageBus {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        let channels = std::array::from_fn(|_| TopicChannel {
            sender: broadcast::channel(queue_capacity).0,
            backpressure: AtomicU64::new(0),
        });
        Self { channels }
    }

    /// Publish an event to its topic. Fan-out is best-effort: events
    /// published with no subscribers are dropped.
    pub fn publish(&self, event: Event) {
        let channel = &self.channels[event.topic().index()];
        // send only fails when there are no receivers
        let _ = channel.sender.send(event);
    }

    /// Subscribe to a topic. The subscription starts at the current
    /// head of the topic; prior events are not replayed.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, topic: Topic) -> Subscription {
        let channel = &self.channels[topic.index()];
        Subscription {
            receiver: channel.sender.subscribe(),
            bus: Arc::clone(self),
            topic,
        }
    }

    /// Events dropped for slow subscribers on this topic.
    #[must_use]
    pub fn backpressure(&self, topic: Topic) -> u64 {
        self.channels[topic.index()]
            .backpressure
            .load(Ordering::Relaxed)
    }

    /// Total dropped events across all topics.
    #[must_use]
    pub fn total_backpressure(&self) -> u64 {
        Topic::ALL.iter().map(|t| self.backpressure(*t)).sum()
    }

    fn note_lag(&self, topic: Topic, skipped: u64) {
        self.channels[topic.index()]
            .backpressure
            .fetch_add(skipped, Ordering::Relaxed);
    }
}

/// A per-subscriber bounded queue over one topic.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    bus: Arc<MessageBus>,
    topic: Topic,
}

impl Subscription {
    /// Receive the next event, waiting if none is queued. Returns
    /// `None` once the bus is dropped. Lagged gaps are accounted and
    /// skipped transparently.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "subscriber lagged, oldest events dropped");
                    self.bus.note_lag(self.topic, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when the queue is empty.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.bus.note_lag(self.topic, skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
