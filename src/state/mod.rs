// src/state/mod.rs - Authoritative stage state and the store that owns it
//
// The store is the only place state is mutated. Readers get owned snapshots;
// every mutation publishes a StateChanged event carrying old and new state.

pub mod locks;

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::communication::event_system::{EventBus, StageEvent, Subscription, Topic};
use crate::history::PositionHistory;
use stagetrack_shared::config::{Config, HomeConfig, SensitivityConfig};
use stagetrack_shared::{Position, WorkspaceDimensions};

pub use locks::{AxisLocks, LockAxis};

/// Display-side settings whose changes are worth persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewState {
    pub active_tab: String,
    pub pan_x: f64,
    pub pan_y: f64,
    pub zoom: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            active_tab: "navigation".to_string(),
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageState {
    pub pos: Position,
    pub workspace: WorkspaceDimensions,
    pub locks: AxisLocks,
    pub sensitivity: SensitivityConfig,
    pub home_positions: HomeConfig,
    pub move_speed: f64,
    pub history: PositionHistory,
    pub view: ViewState,
    #[serde(skip)]
    pub is_moving: bool,
}

impl StageState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pos: Position::ORIGIN,
            workspace: config.stage.workspace,
            locks: AxisLocks::default(),
            sensitivity: config.stage.sensitivity,
            home_positions: config.home,
            move_speed: config.stage.move_speed,
            history: PositionHistory::default(),
            view: ViewState::default(),
            is_moving: false,
        }
    }
}

impl Default for StageState {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shallow partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub pos: Option<Position>,
    pub workspace: Option<WorkspaceDimensions>,
    pub locks: Option<AxisLocks>,
    pub sensitivity: Option<SensitivityConfig>,
    pub home_positions: Option<HomeConfig>,
    pub move_speed: Option<f64>,
    pub is_moving: Option<bool>,
    pub active_tab: Option<String>,
    pub pan: Option<(f64, f64)>,
    pub zoom: Option<f64>,
}

impl StatePatch {
    pub fn position(pos: Position) -> Self {
        Self {
            pos: Some(pos),
            ..Default::default()
        }
    }

    /// Whether applying this patch should trigger a save.
    pub fn is_significant(&self) -> bool {
        self.pos.is_some()
            || self.workspace.is_some()
            || self.locks.is_some()
            || self.sensitivity.is_some()
            || self.active_tab.is_some()
            || self.pan.is_some()
            || self.zoom.is_some()
    }

    fn apply(self, state: &mut StageState) {
        if let Some(pos) = self.pos {
            state.pos = pos;
        }
        if let Some(workspace) = self.workspace {
            if workspace.is_valid() {
                state.workspace = workspace;
            } else {
                tracing::warn!("Ignoring invalid workspace {:?}", workspace);
            }
        }
        if let Some(locks) = self.locks {
            state.locks = locks;
        }
        if let Some(sensitivity) = self.sensitivity {
            state.sensitivity = sensitivity;
        }
        if let Some(home) = self.home_positions {
            state.home_positions = home;
        }
        if let Some(speed) = self.move_speed {
            state.move_speed = speed;
        }
        if let Some(moving) = self.is_moving {
            state.is_moving = moving;
        }
        if let Some(tab) = self.active_tab {
            state.view.active_tab = tab;
        }
        if let Some((x, y)) = self.pan {
            state.view.pan_x = x;
            state.view.pan_y = y;
        }
        if let Some(zoom) = self.zoom {
            state.view.zoom = zoom;
        }
    }
}

/// Owned, interior-mutable handle to the stage state. Clones share state.
#[derive(Debug, Clone)]
pub struct StateStore {
    state: Arc<RwLock<StageState>>,
    events: EventBus,
}

impl StateStore {
    pub fn new(initial: StageState) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            events: EventBus::new(),
        }
    }

    /// Point-in-time snapshot.
    pub fn get(&self) -> StageState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn subscribe_to(&self, topics: &[Topic]) -> Subscription {
        self.events.subscribe_to(topics)
    }

    pub fn update(&self, patch: StatePatch) {
        let significant = patch.is_significant();
        self.modify(significant, |state| patch.apply(state));
    }

    /// Applies `f` under the write lock, then publishes the change. The lock
    /// is released before subscribers are notified.
    pub(crate) fn modify<R>(&self, significant: bool, f: impl FnOnce(&mut StageState) -> R) -> R {
        let (result, old, new) = {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let old = guard.clone();
            let result = f(&mut guard);
            (result, old, guard.clone())
        };
        self.events.publish(StageEvent::StateChanged {
            new: Arc::new(new),
            old: Arc::new(old),
            significant,
        });
        result
    }

    /// Replaces the whole state, e.g. after loading a saved snapshot. The
    /// moving flag of the current state is kept.
    pub fn replace(&self, mut next: StageState) {
        self.modify(true, |state| {
            next.is_moving = state.is_moving;
            *state = next;
        });
    }

    /// Toggles a lock by name. Unknown names are logged and ignored.
    pub fn toggle_lock(&self, axis: &str) -> bool {
        match axis.parse::<LockAxis>() {
            Ok(axis) => {
                self.toggle_lock_axis(axis);
                true
            }
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    pub fn toggle_lock_axis(&self, axis: LockAxis) -> AxisLocks {
        let mut locks = self.get().locks;
        locks.toggle(axis);
        tracing::info!("Lock {} toggled: {}", axis, locks);
        self.update(StatePatch {
            locks: Some(locks),
            ..Default::default()
        });
        locks
    }

    pub fn toggle_coupling(&self) -> AxisLocks {
        let mut locks = self.get().locks;
        locks.toggle_coupling();
        tracing::info!("XY coupling {}", if locks.lock_xy { "enabled" } else { "disabled" });
        self.update(StatePatch {
            locks: Some(locks),
            ..Default::default()
        });
        locks
    }

    /// Restores defaults from `config`, keeping the current workspace.
    pub fn reset(&self, config: &Config) {
        self.modify(true, |state| {
            let workspace = state.workspace;
            let moving = state.is_moving;
            *state = StageState::from_config(config);
            state.workspace = workspace;
            state.is_moving = moving;
        });
        tracing::info!("Stage state reset to defaults");
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StageState::default())
    }
}
