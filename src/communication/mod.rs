pub mod event_system;

pub use event_system::{EventBus, StageEvent, Subscription, SubscriptionId, Topic};
