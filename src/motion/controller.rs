// src/motion/controller.rs - Single-flight motion animator driving simulated or delegated moves
//
// Exactly one movement is active at a time. A movement is claimed under the
// runtime lock, then either animated on a tick interval or handed to the
// hardware delegate. Emergency stop bumps a watch generation that every
// in-flight wait selects on.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use super::direction::{self, Direction};
use super::planner::{MotionPlanner, Movement};
use super::queue::{MoveQueue, MoveRequest};
use super::{HomeMode, MotionPhase, MovementStatus};
use crate::communication::event_system::StageEvent;
use crate::hardware::{HardwareDelegate, HardwareError, HardwareSlot, MotionBackend};
use crate::history::HistoryManager;
use crate::stage::StageError;
use crate::state::{StatePatch, StateStore};
use stagetrack_shared::config::{Config, HomeXy, HomeXyz};
use stagetrack_shared::geometry;
use stagetrack_shared::Position;

pub const MIN_SPEED: f64 = 1.0;
pub const MAX_SPEED: f64 = 1000.0;

/// One point of a pattern. A missing Z keeps the Z the pattern started at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: Option<f64>,
}

impl FromStr for PatternPoint {
    type Err = String;

    /// Parses `x,y` or `x,y,z`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>().map_err(|e| format!("Invalid pattern point '{}': {}", s, e)))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [x, y] => Ok(PatternPoint { x: *x, y: *y, z: None }),
            [x, y, z] => Ok(PatternPoint { x: *x, y: *y, z: Some(*z) }),
            _ => Err(format!("Invalid pattern point '{}': expected x,y or x,y,z", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternOptions {
    pub pause_between: Duration,
    pub return_to_start: bool,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            pause_between: Duration::from_millis(1000),
            return_to_start: false,
        }
    }
}

#[derive(Debug, Default)]
struct Runtime {
    phase: MotionPhase,
    active: Option<u64>,
    next_id: u64,
    queue: MoveQueue,
    emergency: bool,
}

struct Inner {
    store: StateStore,
    history: HistoryManager,
    planner: MotionPlanner,
    hardware: HardwareSlot,
    tick_interval: Duration,
    round_decimals: u32,
    runtime: Mutex<Runtime>,
    cancel: watch::Sender<u64>,
}

/// A claimed movement on its way to one of the backends.
struct Flight {
    id: u64,
    movement: Movement,
    backend: MotionBackend,
    cancel: watch::Receiver<u64>,
}

/// Cheap to clone; clones drive the same stage.
#[derive(Clone)]
pub struct MotionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MotionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionController")
            .field("status", &self.movement_status())
            .field("hardware", &self.inner.hardware)
            .finish()
    }
}

impl MotionController {
    pub fn new(store: StateStore, history: HistoryManager, config: &Config) -> Self {
        let (cancel, _) = watch::channel(0);
        tracing::info!(
            "Motion controller ready (tick {}ms, min duration {}ms)",
            config.stage.tick_interval_ms,
            config.motion.min_duration_ms
        );
        Self {
            inner: Arc::new(Inner {
                store,
                history,
                planner: MotionPlanner::new(&config.motion),
                hardware: HardwareSlot::new(),
                tick_interval: Duration::from_millis(config.stage.tick_interval_ms.max(1)),
                round_decimals: config.motion.round_decimals,
                runtime: Mutex::new(Runtime::default()),
                cancel,
            }),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn history(&self) -> &HistoryManager {
        &self.inner.history
    }

    pub fn planner(&self) -> &MotionPlanner {
        &self.inner.planner
    }

    pub fn hardware(&self) -> &HardwareSlot {
        &self.inner.hardware
    }

    pub fn attach_hardware(&self, delegate: Arc<dyn HardwareDelegate>) {
        self.inner.hardware.attach(delegate);
    }

    pub fn detach_hardware(&self) -> Option<Arc<dyn HardwareDelegate>> {
        self.inner.hardware.detach()
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.inner.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_moving(&self) -> bool {
        self.runtime().active.is_some()
    }

    fn is_active(&self, id: u64) -> bool {
        self.runtime().active == Some(id)
    }

    pub fn movement_status(&self) -> MovementStatus {
        let rt = self.runtime();
        MovementStatus {
            phase: rt.phase,
            is_moving: rt.active.is_some(),
            queue_length: rt.queue.len(),
            emergency_stop: rt.emergency,
        }
    }

    /// Moves to an absolute target, clamped to the workspace.
    ///
    /// Returns `Ok(false)` if another movement is active or this one was
    /// aborted. Hardware failures come back as `Err`.
    pub async fn move_absolute(&self, x: f64, y: f64, z: f64) -> Result<bool, StageError> {
        match self.begin(Position::new(x, y, z)) {
            Some(flight) => self.run(flight).await,
            None => Ok(false),
        }
    }

    pub async fn move_relative(&self, dx: f64, dy: f64, dz: f64) -> Result<bool, StageError> {
        let target = self.inner.store.get().pos.offset(dx, dy, dz);
        self.move_absolute(target.x, target.y, target.z).await
    }

    /// Jogs one step. `distance` overrides the per-axis sensitivity.
    pub async fn move_direction(&self, direction: Direction, distance: Option<f64>) -> Result<bool, StageError> {
        let state = self.inner.store.get();
        match direction::resolve(direction, distance, &state.sensitivity, &state.locks) {
            Some((dx, dy, dz)) => self.move_relative(dx, dy, dz).await,
            None => {
                tracing::debug!("Jog {} filtered out by axis locks", direction);
                Ok(false)
            }
        }
    }

    /// Like [`move_direction`](Self::move_direction) with a direction name.
    /// Unknown names are logged and ignored.
    pub async fn move_direction_named(&self, name: &str, distance: Option<f64>) -> Result<bool, StageError> {
        match name.parse::<Direction>() {
            Ok(direction) => self.move_direction(direction, distance).await,
            Err(e) => {
                tracing::warn!("{}", e);
                Ok(false)
            }
        }
    }

    /// Appends a request to the queue and dispatches it at once if idle.
    /// Queued moves run on spawned tasks; their errors are only logged.
    pub fn queue(&self, request: MoveRequest) {
        let pending = {
            let mut rt = self.runtime();
            rt.queue.push(request);
            rt.queue.len()
        };
        tracing::debug!("Move queued, {} pending", pending);
        self.dispatch_next();
    }

    pub fn clear_queue(&self) -> usize {
        let dropped = self.runtime().queue.clear();
        if dropped > 0 {
            tracing::info!("Discarded {} queued moves", dropped);
        }
        dropped
    }

    /// Aborts the active movement, drops the queue and signals the hardware.
    /// Safe to call in any state.
    pub fn emergency_stop(&self) {
        let (active, dropped) = {
            let mut rt = self.runtime();
            rt.emergency = true;
            (rt.active, rt.queue.clear())
        };
        tracing::warn!(
            "EMERGENCY STOP (active movement: {:?}, {} queued moves dropped)",
            active,
            dropped
        );

        self.inner.cancel.send_modify(|generation| *generation = generation.wrapping_add(1));
        if let Some(id) = active {
            let current = self.inner.store.get().pos;
            self.complete_movement(id, current, false);
        }

        if let Some(hw) = self.inner.hardware.connected() {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = hw.emergency_stop().await {
                            tracing::error!("Hardware emergency stop failed: {}", e);
                        }
                    });
                }
                Err(_) => tracing::error!("No async runtime, hardware emergency stop not sent"),
            }
        }

        self.inner.store.events().publish(StageEvent::EmergencyStop);
    }

    /// Returns to a configured home position. Locked homes are a no-op.
    /// XYZ homing goes to the hardware when it is connected.
    pub async fn go_home(&self, mode: HomeMode) -> Result<bool, StageError> {
        let state = self.inner.store.get();
        let locked = match mode {
            HomeMode::Xy => state.locks.lock_home_xy,
            HomeMode::Xyz => state.locks.lock_home_xyz,
            HomeMode::Z => false,
        };
        if locked {
            tracing::warn!("Home {} is locked", mode.to_string().to_uppercase());
            return Ok(false);
        }

        if mode == HomeMode::Xyz {
            if let Some(hw) = self.inner.hardware.connected() {
                return Ok(self.home_hardware(hw).await);
            }
        }

        let home = state.home_positions;
        let pos = state.pos;
        let target = match mode {
            HomeMode::Xy => Position::new(home.xy.x, home.xy.y, pos.z),
            HomeMode::Xyz => Position::new(home.xyz.x, home.xyz.y, home.xyz.z),
            HomeMode::Z => Position::new(pos.x, pos.y, home.z),
        };
        tracing::info!("Homing {} to {}", mode, target);
        self.move_absolute(target.x, target.y, target.z).await
    }

    pub async fn go_home_named(&self, name: &str) -> Result<bool, StageError> {
        match name.parse::<HomeMode>() {
            Ok(mode) => self.go_home(mode).await,
            Err(e) => {
                tracing::warn!("{}", e);
                Ok(false)
            }
        }
    }

    async fn home_hardware(&self, hw: Arc<dyn HardwareDelegate>) -> bool {
        let Some((id, mut cancel)) = self.claim(MotionPhase::Delegating) else {
            return false;
        };
        self.inner.store.update(StatePatch {
            is_moving: Some(true),
            ..Default::default()
        });
        tracing::info!("Homing through hardware");

        let outcome = tokio::select! {
            r = hw.home() => r,
            _ = cancel.changed() => {
                tracing::debug!("Hardware homing {} cancelled", id);
                return false;
            }
        };
        let state = self.inner.store.get();
        match outcome {
            Ok(()) => {
                let home = state.home_positions.xyz;
                let target = geometry::clamp(Position::new(home.x, home.y, home.z), &state.workspace);
                self.complete_movement(id, target, true)
            }
            Err(e) => {
                tracing::error!("Hardware homing failed: {}", e);
                self.complete_movement(id, state.pos, false);
                false
            }
        }
    }

    /// Stores the current position as the home for `mode`. Refused while a
    /// movement is active.
    pub fn set_home(&self, mode: HomeMode) -> bool {
        if self.is_moving() {
            tracing::warn!("Cannot set home {} while moving", mode);
            return false;
        }
        let position = self.inner.store.modify(true, |state| {
            let pos = state.pos;
            match mode {
                HomeMode::Xy => state.home_positions.xy = HomeXy { x: pos.x, y: pos.y },
                HomeMode::Xyz => {
                    state.home_positions.xyz = HomeXyz {
                        x: pos.x,
                        y: pos.y,
                        z: pos.z,
                    }
                }
                HomeMode::Z => state.home_positions.z = pos.z,
            }
            pos
        });
        tracing::info!("Home {} set to {}", mode, position);
        self.inner.store.events().publish(StageEvent::HomeSet { mode, position });
        true
    }

    /// Sets the user move speed, clamped to `[1, 1000]` mm/s.
    pub fn set_speed(&self, speed: f64) {
        if !speed.is_finite() {
            tracing::warn!("Ignoring non-finite speed {}", speed);
            return;
        }
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.inner.store.update(StatePatch {
            move_speed: Some(clamped),
            ..Default::default()
        });
        tracing::info!("Move speed set to {:.1}mm/s", clamped);
        self.inner.store.events().publish(StageEvent::SpeedChanged(clamped));
    }

    pub fn speed(&self) -> f64 {
        self.inner.store.get().move_speed
    }

    /// Time to reach the clamped target at the user move speed.
    pub fn estimate_movement_time(&self, x: f64, y: f64, z: f64) -> Duration {
        let state = self.inner.store.get();
        let target = geometry::clamp(Position::new(x, y, z), &state.workspace);
        MotionPlanner::estimate_time(&state.pos, &target, state.move_speed)
    }

    /// Visits each point in order, waiting `pause_between` between points.
    ///
    /// Stops early on emergency stop or hardware error; errors are logged
    /// and reported as `Ok(false)`.
    pub async fn execute_pattern(&self, points: &[PatternPoint], options: PatternOptions) -> Result<bool, StageError> {
        if points.is_empty() {
            tracing::warn!("Empty pattern, nothing to execute");
            return Ok(false);
        }
        let start = self.inner.store.get().pos;
        tracing::info!("Executing pattern of {} points from {}", points.len(), start);

        for (i, point) in points.iter().enumerate() {
            let z = point.z.unwrap_or(start.z);
            match self.move_absolute(point.x, point.y, z).await {
                Ok(true) => tracing::debug!("Pattern point {} reached", i),
                Ok(false) if self.runtime().emergency => {
                    tracing::warn!("Pattern aborted at point {}", i);
                    return Ok(false);
                }
                Ok(false) => tracing::warn!("Pattern point {} not reached", i),
                Err(e) => {
                    tracing::error!("Pattern execution failed at point {}: {}", i, e);
                    return Ok(false);
                }
            }

            if !options.pause_between.is_zero() && i + 1 < points.len() {
                tokio::time::sleep(options.pause_between).await;
                if self.runtime().emergency {
                    tracing::warn!("Pattern aborted after point {}", i);
                    return Ok(false);
                }
            }
        }

        if options.return_to_start {
            if let Err(e) = self.move_absolute(start.x, start.y, start.z).await {
                tracing::error!("Pattern return to start failed: {}", e);
                return Ok(false);
            }
        }
        tracing::info!("Pattern completed");
        Ok(true)
    }

    /// Reserves the single movement slot. `None` while another movement is
    /// active.
    fn claim(&self, phase: MotionPhase) -> Option<(u64, watch::Receiver<u64>)> {
        let mut rt = self.runtime();
        if let Some(active) = rt.active {
            tracing::warn!("Movement {} in progress, request rejected", active);
            return None;
        }
        rt.next_id += 1;
        let id = rt.next_id;
        rt.active = Some(id);
        rt.phase = phase;
        rt.emergency = false;
        Some((id, self.inner.cancel.subscribe()))
    }

    fn begin(&self, target: Position) -> Option<Flight> {
        let (id, cancel) = self.claim(MotionPhase::Planning)?;

        let state = self.inner.store.get();
        let target = geometry::clamp(target, &state.workspace);
        let movement = self.inner.planner.plan(state.pos, target);
        let backend = self.inner.hardware.select_backend();
        self.runtime().phase = if backend.is_delegated() {
            MotionPhase::Delegating
        } else {
            MotionPhase::Simulating
        };

        self.inner.store.update(StatePatch {
            is_moving: Some(true),
            ..Default::default()
        });
        tracing::info!(
            "Movement {} ({:?}): {} -> {} in {:.0}ms",
            id,
            backend,
            movement.start,
            movement.target,
            movement.duration_ms()
        );
        self.inner
            .store
            .events()
            .publish(StageEvent::MovementStarted(movement.clone()));

        Some(Flight {
            id,
            movement,
            backend,
            cancel,
        })
    }

    async fn run(&self, flight: Flight) -> Result<bool, StageError> {
        match flight.backend.clone() {
            MotionBackend::Simulated => Ok(self.run_simulated(flight).await),
            MotionBackend::Delegated(hw) => self.run_delegated(flight, hw).await,
        }
    }

    async fn run_simulated(&self, flight: Flight) -> bool {
        let Flight {
            id,
            movement,
            mut cancel,
            ..
        } = flight;
        let duration = movement.duration.as_secs_f64();
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.inner.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_active(id) {
                        return false;
                    }
                    let progress = if duration > 0.0 {
                        (started.elapsed().as_secs_f64() / duration).min(1.0)
                    } else {
                        1.0
                    };
                    if progress >= 1.0 {
                        return self.complete_movement(id, movement.target, true);
                    }
                    let pos = movement.position_at(progress);
                    tracing::trace!("Movement {} at {:.1}%: {}", id, progress * 100.0, pos);
                    // Animation frames are not worth a save.
                    self.inner.store.modify(false, |state| state.pos = pos);
                }
                _ = cancel.changed() => {
                    tracing::debug!("Movement {} cancelled", id);
                    return false;
                }
            }
        }
    }

    async fn run_delegated(&self, flight: Flight, hw: Arc<dyn HardwareDelegate>) -> Result<bool, StageError> {
        let Flight {
            id,
            movement,
            mut cancel,
            ..
        } = flight;
        let t = movement.target;

        let outcome = tokio::select! {
            r = hw.move_absolute(t.x, t.y, t.z) => r,
            _ = cancel.changed() => {
                tracing::debug!("Delegated movement {} cancelled", id);
                return Ok(false);
            }
        };

        match outcome {
            Ok(true) => Ok(self.complete_movement(id, t, true)),
            Ok(false) => {
                tracing::error!("Hardware refused move to {}", t);
                let current = self.inner.store.get().pos;
                self.complete_movement(id, current, false);
                Err(HardwareError::MoveRejected { x: t.x, y: t.y, z: t.z }.into())
            }
            Err(e) => {
                tracing::error!("Hardware move to {} failed: {}", t, e);
                let current = self.inner.store.get().pos;
                self.complete_movement(id, current, false);
                Err(e.into())
            }
        }
    }

    /// Finishes movement `id` at `pos`. Returns `false` if `id` is no longer
    /// the active movement (already completed or aborted) or if `success`
    /// is false.
    fn complete_movement(&self, id: u64, pos: Position, success: bool) -> bool {
        let pos = pos.rounded(self.inner.round_decimals);
        {
            let mut rt = self.runtime();
            if rt.active != Some(id) {
                return false;
            }
            rt.active = None;
            rt.phase = MotionPhase::Completed;

            self.inner.store.update(StatePatch {
                pos: Some(pos),
                is_moving: Some(false),
                ..Default::default()
            });
            if success {
                self.inner.history.record_final_position(pos);
            }
            rt.phase = MotionPhase::Idle;
        }

        if success {
            tracing::info!("Movement {} completed at {}", id, pos);
        } else {
            tracing::warn!("Movement {} ended without reaching its target, at {}", id, pos);
        }
        self.inner
            .store
            .events()
            .publish(StageEvent::MovementCompleted { position: pos, success });

        self.dispatch_next();
        success
    }

    fn resolve_request(&self, request: &MoveRequest) -> Option<Position> {
        let state = self.inner.store.get();
        match *request {
            MoveRequest::Absolute(target) => Some(target),
            MoveRequest::Relative { dx, dy, dz } => Some(state.pos.offset(dx, dy, dz)),
            MoveRequest::Direction { direction, distance } => {
                direction::resolve(direction, distance, &state.sensitivity, &state.locks)
                    .map(|(dx, dy, dz)| state.pos.offset(dx, dy, dz))
            }
        }
    }

    /// Starts the next queued request if idle.
    fn dispatch_next(&self) {
        let Ok(handle) = Handle::try_current() else {
            let pending = self.runtime().queue.len();
            if pending > 0 {
                tracing::warn!("No async runtime, {} queued moves left pending", pending);
            }
            return;
        };

        loop {
            let request = {
                let mut rt = self.runtime();
                if rt.active.is_some() {
                    return;
                }
                match rt.queue.pop() {
                    Some(request) => request,
                    None => return,
                }
            };

            let Some(target) = self.resolve_request(&request) else {
                tracing::debug!("Queued {:?} resolves to no movement, skipped", request);
                continue;
            };
            let Some(flight) = self.begin(target) else {
                self.runtime().queue.push_front(request);
                return;
            };

            tracing::debug!("Dispatching queued movement {}", flight.id);
            let this = self.clone();
            handle.spawn(async move {
                if let Err(e) = this.run(flight).await {
                    tracing::error!("Queued movement failed: {}", e);
                }
            });
            return;
        }
    }
}
