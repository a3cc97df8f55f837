// src/motion/planner.rs - Turns a start/target pair into a timed movement plan

use std::time::Duration;

use stagetrack_shared::config::{MotionConfig, SpeedTable};
use stagetrack_shared::geometry::{self, MovementType};
use stagetrack_shared::Position;

/// A single planned move. Created per request and dropped on completion or
/// cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub start: Position,
    pub target: Position,
    pub distance: f64,
    pub xy_distance: f64,
    pub z_distance: f64,
    pub duration: Duration,
    /// mm/s, picked from the speed table by `movement_type`.
    pub effective_speed: f64,
    pub movement_type: MovementType,
}

impl Movement {
    /// Eased position at `progress` in `[0, 1]`.
    pub fn position_at(&self, progress: f64) -> Position {
        let eased = geometry::ease_in_out_cubic(progress.clamp(0.0, 1.0));
        self.start.lerp(&self.target, eased)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

#[derive(Debug, Clone)]
pub struct MotionPlanner {
    speeds: SpeedTable,
    min_duration_ms: f64,
}

impl MotionPlanner {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            speeds: config.speeds,
            min_duration_ms: config.min_duration_ms.max(0.0),
        }
    }

    pub fn speeds(&self) -> &SpeedTable {
        &self.speeds
    }

    /// Plans a move. `target` is expected to be clamped already.
    pub fn plan(&self, start: Position, target: Position) -> Movement {
        let c = geometry::classify_move(&start, &target);
        let effective_speed = self.speeds.speed_for(c.movement_type);
        let duration_ms = (c.total_distance / effective_speed * 1000.0).max(self.min_duration_ms);

        tracing::debug!(
            "Planned {} move {} -> {}, dist: {:.3}mm, v: {:.1}mm/s, dur: {:.0}ms",
            c.movement_type,
            start,
            target,
            c.total_distance,
            effective_speed,
            duration_ms
        );

        Movement {
            start,
            target,
            distance: c.total_distance,
            xy_distance: c.xy_distance,
            z_distance: c.z_distance,
            duration: secs_saturating(duration_ms / 1000.0),
            effective_speed,
            movement_type: c.movement_type,
        }
    }

    /// Rough time estimate at a flat user speed, ignoring the speed table.
    pub fn estimate_time(start: &Position, target: &Position, move_speed: f64) -> Duration {
        if !(move_speed.is_finite() && move_speed > 0.0) {
            return Duration::ZERO;
        }
        secs_saturating(start.distance_to(target) / move_speed)
    }
}

fn secs_saturating(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 { Duration::MAX } else { Duration::ZERO })
}

impl Default for MotionPlanner {
    fn default() -> Self {
        Self::new(&MotionConfig::default())
    }
}
