// Typed publish/subscribe channel for stage events.
//
// Each subscriber owns an unbounded tokio mpsc receiver, so delivery to a
// subscriber is FIFO in publish order. Dropping the `Subscription` removes it.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::motion::HomeMode;
use crate::motion::planner::Movement;
use crate::state::StageState;
use stagetrack_shared::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    StateChanged,
    MovementStarted,
    MovementCompleted,
    HistoryCleared,
    EmergencyStop,
    HomeSet,
    SpeedChanged,
}

#[derive(Debug, Clone)]
pub enum StageEvent {
    /// Emitted on every store mutation. `significant` marks changes that
    /// should be persisted.
    StateChanged {
        new: Arc<StageState>,
        old: Arc<StageState>,
        significant: bool,
    },
    MovementStarted(Movement),
    MovementCompleted { position: Position, success: bool },
    HistoryCleared,
    EmergencyStop,
    HomeSet { mode: HomeMode, position: Position },
    SpeedChanged(f64),
}

impl StageEvent {
    pub fn topic(&self) -> Topic {
        match self {
            StageEvent::StateChanged { .. } => Topic::StateChanged,
            StageEvent::MovementStarted(_) => Topic::MovementStarted,
            StageEvent::MovementCompleted { .. } => Topic::MovementCompleted,
            StageEvent::HistoryCleared => Topic::HistoryCleared,
            StageEvent::EmergencyStop => Topic::EmergencyStop,
            StageEvent::HomeSet { .. } => Topic::HomeSet,
            StageEvent::SpeedChanged(_) => Topic::SpeedChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    topics: Option<Vec<Topic>>,
    sender: UnboundedSender<StageEvent>,
}

impl Subscriber {
    fn wants(&self, topic: Topic) -> bool {
        self.topics.as_ref().is_none_or(|t| t.contains(&topic))
    }
}

#[derive(Debug, Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Cheap to clone; all clones share the same subscriber list.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every topic.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    pub fn subscribe_to(&self, topics: &[Topic]) -> Subscription {
        self.register(Some(topics.to_vec()))
    }

    fn register(&self, topics: Option<Vec<Topic>>) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push(Subscriber { id, topics, sender });
        tracing::debug!("Event subscriber {:?} registered", id);
        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn publish(&self, event: StageEvent) {
        let topic = event.topic();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Receivers that went away without unsubscribing are pruned here.
        inner
            .subscribers
            .retain(|s| !s.wants(topic) || s.sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).subscribers.len()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: UnboundedReceiver<StageEvent>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StageEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StageEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drains everything queued so far.
    pub fn drain(&mut self) -> Vec<StageEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = bus.lock().unwrap_or_else(PoisonError::into_inner);
            inner.subscribers.retain(|s| s.id != self.id);
        }
    }
}
