// src/history.rs - Final-position history: XYZ and XY views, freeze mode and cursor navigation
//
// Only positions reached by a completed move are recorded. Intermediate
// animation frames never reach this module.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::motion::MotionController;
use crate::stage::StageError;
use crate::state::StateStore;
use crate::communication::event_system::StageEvent;
use stagetrack_shared::Position;
use stagetrack_shared::config::HistoryConfig;

/// XY moves smaller than this (per axis) do not produce a new XY entry.
pub const XY_DEDUP_TOLERANCE: f64 = 0.01;
/// Track points closer than this (per axis) to the previous one are skipped.
pub const TRACK_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub is_final_position: bool,
}

impl HistoryEntry {
    pub fn final_at(pos: Position, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            x: stagetrack_shared::geometry::round_to(pos.x, 3),
            y: stagetrack_shared::geometry::round_to(pos.y, 3),
            z: stagetrack_shared::geometry::round_to(pos.z, 3),
            is_final_position: true,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    #[default]
    Live,
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryViewMode {
    #[serde(rename = "XY")]
    Xy,
    #[default]
    #[serde(rename = "XYZ")]
    Xyz,
}

impl HistoryViewMode {
    pub fn toggled(self) -> Self {
        match self {
            HistoryViewMode::Xy => HistoryViewMode::Xyz,
            HistoryViewMode::Xyz => HistoryViewMode::Xy,
        }
    }
}

/// `index == None` is the live position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryCursor {
    pub mode: HistoryMode,
    pub index: Option<usize>,
    pub view_mode: HistoryViewMode,
}

/// Where a step through the history lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistoryStep {
    /// Move to this entry and put the cursor on it.
    Entry(usize, Position),
    /// Put the cursor back on the live position without moving.
    Live,
    /// Nothing to do.
    Stay,
}

/// Both history sequences plus the track buffer.
///
/// Sequences sit behind `Arc` so store snapshots stay cheap; appends go
/// through `Arc::make_mut`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionHistory {
    xyz: Arc<Vec<HistoryEntry>>,
    xy: Arc<Vec<HistoryEntry>>,
    track: Arc<Vec<Position>>,
    cursor: HistoryCursor,
}

impl PositionHistory {
    pub fn xyz(&self) -> &[HistoryEntry] {
        &self.xyz
    }

    pub fn xy(&self) -> &[HistoryEntry] {
        &self.xy
    }

    pub fn track(&self) -> &[Position] {
        &self.track
    }

    pub fn cursor(&self) -> HistoryCursor {
        self.cursor
    }

    pub fn is_frozen(&self) -> bool {
        self.cursor.mode == HistoryMode::Frozen
    }

    /// The navigable sequence for the current view mode.
    pub fn active(&self) -> &[HistoryEntry] {
        match self.cursor.view_mode {
            HistoryViewMode::Xy => &self.xy,
            HistoryViewMode::Xyz => &self.xyz,
        }
    }

    /// Appends a final position. Returns `false` (and changes nothing) while
    /// frozen.
    pub fn record_final(&mut self, pos: Position, timestamp: DateTime<Utc>, limits: &HistoryConfig) -> bool {
        if self.is_frozen() {
            return false;
        }
        let entry = HistoryEntry::final_at(pos, timestamp);

        push_capped(Arc::make_mut(&mut self.xyz), entry, limits.max_entries);

        let xy_moved = self
            .xy
            .last()
            .is_none_or(|last| (last.x - pos.x).abs() > XY_DEDUP_TOLERANCE || (last.y - pos.y).abs() > XY_DEDUP_TOLERANCE);
        if xy_moved {
            push_capped(Arc::make_mut(&mut self.xy), entry, limits.max_entries);
        }

        let track_moved = self.track.last().is_none_or(|last| {
            (last.x - pos.x).abs() > TRACK_TOLERANCE
                || (last.y - pos.y).abs() > TRACK_TOLERANCE
                || (last.z - pos.z).abs() > TRACK_TOLERANCE
        });
        if track_moved {
            push_capped(Arc::make_mut(&mut self.track), pos, limits.max_track_points);
        }

        self.cursor.index = None;
        true
    }

    pub fn toggle_mode(&mut self) -> HistoryMode {
        match self.cursor.mode {
            HistoryMode::Live => {
                self.cursor.mode = HistoryMode::Frozen;
                self.cursor.index = self.active().len().checked_sub(1);
            }
            HistoryMode::Frozen => {
                self.cursor.mode = HistoryMode::Live;
                self.cursor.index = None;
            }
        }
        self.cursor.mode
    }

    pub fn toggle_view_mode(&mut self) -> HistoryViewMode {
        self.cursor.view_mode = self.cursor.view_mode.toggled();
        // An index into one sequence means nothing in the other.
        self.cursor.index = None;
        self.cursor.view_mode
    }

    /// Moves the cursor. Live mode always keeps it at `None`.
    pub fn set_cursor(&mut self, index: Option<usize>) {
        self.cursor.index = if self.is_frozen() { index } else { None };
    }

    pub fn entry(&self, index: usize) -> Option<&HistoryEntry> {
        self.active().get(index)
    }

    /// Target for "previous". From live this is the second-to-last entry,
    /// since the last one is where the stage already is.
    pub fn previous_step(&self) -> HistoryStep {
        let len = self.active().len();
        if len == 0 {
            return HistoryStep::Stay;
        }
        let index = match self.cursor.index {
            None if len >= 2 => len - 2,
            None => return HistoryStep::Stay,
            Some(0) => return HistoryStep::Stay,
            Some(i) => (i - 1).min(len - 1),
        };
        self.step_to(index)
    }

    /// Target for "next". Past the last entry this returns to live.
    pub fn next_step(&self) -> HistoryStep {
        let len = self.active().len();
        if len == 0 {
            return HistoryStep::Stay;
        }
        let index = match self.cursor.index {
            None => 0,
            Some(i) if i + 1 < len => i + 1,
            Some(_) => return HistoryStep::Live,
        };
        self.step_to(index)
    }

    fn step_to(&self, index: usize) -> HistoryStep {
        match self.entry(index) {
            Some(e) => HistoryStep::Entry(index, e.position()),
            None => HistoryStep::Stay,
        }
    }

    /// Empties both sequences and the track, and returns to live mode.
    pub fn clear(&mut self) {
        self.xyz = Arc::default();
        self.xy = Arc::default();
        self.track = Arc::default();
        self.cursor.mode = HistoryMode::Live;
        self.cursor.index = None;
    }

    /// Keeps only the newest `max` entries of each sequence.
    pub fn trim_to(&mut self, max: usize) {
        trim_front(Arc::make_mut(&mut self.xyz), max);
        trim_front(Arc::make_mut(&mut self.xy), max);
        trim_front(Arc::make_mut(&mut self.track), max);
        if let Some(i) = self.cursor.index {
            if i >= self.active().len() {
                self.cursor.index = None;
            }
        }
    }

    /// Drops entries that are not final positions. Used after loading
    /// externally produced data.
    pub fn retain_final(&mut self) {
        Arc::make_mut(&mut self.xyz).retain(|e| e.is_final_position);
        Arc::make_mut(&mut self.xy).retain(|e| e.is_final_position);
    }
}

fn push_capped<T>(v: &mut Vec<T>, item: T, cap: usize) {
    v.push(item);
    trim_front(v, cap);
}

fn trim_front<T>(v: &mut Vec<T>, max: usize) {
    if v.len() > max {
        let excess = v.len() - max;
        v.drain(..excess);
    }
}

/// Aggregate figures over the XYZ history.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HistoryStatistics {
    pub total_distance: f64,
    pub total_time_ms: i64,
    pub average_speed: f64,
    pub point_count: usize,
}

/// Records final positions into the store and drives history navigation.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    store: StateStore,
    limits: HistoryConfig,
}

impl HistoryManager {
    pub fn new(store: StateStore, limits: HistoryConfig) -> Self {
        Self { store, limits }
    }

    pub fn record_final_position(&self, pos: Position) -> bool {
        let limits = &self.limits;
        let recorded = self
            .store
            .modify(true, |state| state.history.record_final(pos, Utc::now(), limits));
        if !recorded {
            tracing::debug!("History frozen, not recording {}", pos);
        }
        recorded
    }

    pub fn toggle_history_mode(&self) -> HistoryMode {
        let mode = self.store.modify(true, |state| state.history.toggle_mode());
        tracing::info!("History mode: {}", if mode == HistoryMode::Frozen { "ON (frozen)" } else { "OFF (live)" });
        mode
    }

    pub fn toggle_history_view_mode(&self) -> HistoryViewMode {
        let view = self.store.modify(true, |state| state.history.toggle_view_mode());
        tracing::info!("History view mode: {:?}", view);
        view
    }

    /// Snapshot of the navigable sequence for the current view mode.
    pub fn current_history(&self) -> Vec<HistoryEntry> {
        self.store.get().history.active().to_vec()
    }

    pub fn cursor(&self) -> HistoryCursor {
        self.store.get().history.cursor()
    }

    /// Physically moves to history entry `index` and puts the cursor there.
    /// Only works while frozen; out-of-range indices are ignored.
    pub async fn go_to_history_position(&self, motion: &MotionController, index: usize) -> Result<bool, StageError> {
        let state = self.store.get();
        if !state.history.is_frozen() {
            tracing::debug!("History navigation needs frozen mode");
            return Ok(false);
        }
        let Some(entry) = state.history.entry(index).copied() else {
            tracing::debug!("History index {} out of range", index);
            return Ok(false);
        };
        self.replay(motion, index, entry.position()).await
    }

    pub async fn go_to_previous(&self, motion: &MotionController) -> Result<bool, StageError> {
        let history = self.store.get().history;
        if !history.is_frozen() {
            tracing::debug!("History navigation needs frozen mode");
            return Ok(false);
        }
        let step = history.previous_step();
        self.apply_step(motion, step).await
    }

    pub async fn go_to_next(&self, motion: &MotionController) -> Result<bool, StageError> {
        let history = self.store.get().history;
        if !history.is_frozen() {
            tracing::debug!("History navigation needs frozen mode");
            return Ok(false);
        }
        let step = history.next_step();
        self.apply_step(motion, step).await
    }

    async fn apply_step(&self, motion: &MotionController, step: HistoryStep) -> Result<bool, StageError> {
        match step {
            HistoryStep::Entry(index, pos) => self.replay(motion, index, pos).await,
            HistoryStep::Live => {
                self.store.modify(true, |state| state.history.set_cursor(None));
                Ok(false)
            }
            HistoryStep::Stay => Ok(false),
        }
    }

    async fn replay(&self, motion: &MotionController, index: usize, target: Position) -> Result<bool, StageError> {
        let state = self.store.get();
        // In XY view the live Z is kept.
        let z = match state.history.cursor().view_mode {
            HistoryViewMode::Xy => state.pos.z,
            HistoryViewMode::Xyz => target.z,
        };
        let moved = motion.move_absolute(target.x, target.y, z).await?;
        self.store.modify(true, |state| state.history.set_cursor(Some(index)));
        Ok(moved)
    }

    /// Empties history, leaves frozen mode and reseeds with the live position.
    pub fn clear_history(&self) {
        self.store.modify(true, |state| state.history.clear());
        let pos = self.store.get().pos;
        self.record_final_position(pos);
        self.store.events().publish(StageEvent::HistoryCleared);
        tracing::info!("History cleared");
    }

    pub fn statistics(&self) -> HistoryStatistics {
        let state = self.store.get();
        let history = state.history.xyz();
        if history.len() < 2 {
            return HistoryStatistics {
                point_count: history.len(),
                ..Default::default()
            };
        }
        let total_distance: f64 = history
            .windows(2)
            .map(|w| w[0].position().distance_to(&w[1].position()))
            .sum();
        let total_time_ms = (history[history.len() - 1].timestamp - history[0].timestamp).num_milliseconds();
        let average_speed = if total_time_ms > 0 {
            total_distance / total_time_ms as f64 * 1000.0
        } else {
            0.0
        };
        HistoryStatistics {
            total_distance: stagetrack_shared::geometry::round_to(total_distance, 2),
            total_time_ms,
            average_speed: stagetrack_shared::geometry::round_to(average_speed, 2),
            point_count: history.len(),
        }
    }
}
