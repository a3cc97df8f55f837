// stagetrack: position state and motion engine for a motorized XYZ stage

pub mod communication;
pub mod hardware;
pub mod history;
pub mod motion;
pub mod persistence;
pub mod stage;
pub mod state;

pub use communication::{EventBus, StageEvent, Subscription, Topic};
pub use history::{HistoryEntry, HistoryManager, HistoryMode, HistoryViewMode};
pub use motion::{Direction, HomeMode, MotionController, MoveRequest};
pub use stage::{Stage, StageError};
pub use state::{AxisLocks, StageState, StatePatch, StateStore};
pub use stagetrack_shared::{Position, WorkspaceDimensions};
