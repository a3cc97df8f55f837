//! Workspace geometry: positions, bounds clamping and move classification.
//!
//! Everything here is a total function. Invalid input (NaN, infinities) is
//! sanitized rather than reported.

use serde::{Deserialize, Serialize};

/// Below this XY travel a move with Z travel counts as pure Z.
pub const Z_ONLY_XY_TOLERANCE: f64 = 0.1;
/// Z travel required before a move can count as pure Z.
pub const Z_ONLY_Z_THRESHOLD: f64 = 0.1;
/// Moves shorter than this are precision moves.
pub const PRECISION_DISTANCE: f64 = 1.0;
/// Moves longer than this are travel moves.
pub const TRAVEL_DISTANCE: f64 = 10.0;

/// A point in stage coordinates, millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Replaces non-finite components with 0.
    pub fn sanitized(self) -> Self {
        Self {
            x: sanitize(self.x),
            y: sanitize(self.y),
            z: sanitize(self.z),
        }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn xy_distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Linear interpolation towards `target`, `t` in `[0, 1]`.
    pub fn lerp(&self, target: &Position, t: f64) -> Position {
        Position {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            z: self.z + (target.z - self.z) * t,
        }
    }

    pub fn rounded(&self, decimals: u32) -> Position {
        Position {
            x: round_to(self.x, decimals),
            y: round_to(self.y, decimals),
            z: round_to(self.z, decimals),
        }
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Position {
        Position {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }
}

impl From<[f64; 3]> for Position {
    fn from(v: [f64; 3]) -> Self {
        Position::new(v[0], v[1], v[2])
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Full extents of the reachable workspace. The stage is centred on the
/// origin, so each axis spans `[-dim/2, +dim/2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceDimensions {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorkspaceDimensions {
    /// Largest accepted extent on any axis, mm.
    pub const MAX_EXTENT: f64 = 1.0e6;

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Every axis finite, positive and at most `MAX_EXTENT`.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|d| d.is_finite() && *d > 0.0 && *d <= Self::MAX_EXTENT)
    }

    /// Bounds as `[[min, max]; 3]`, in the same layout the planner used for
    /// axis limits.
    pub fn bounds(&self) -> [[f64; 2]; 3] {
        [
            [-self.x / 2.0, self.x / 2.0],
            [-self.y / 2.0, self.y / 2.0],
            [-self.z / 2.0, self.z / 2.0],
        ]
    }

    pub fn contains(&self, p: &Position) -> bool {
        let b = self.bounds();
        p.x >= b[0][0] && p.x <= b[0][1] && p.y >= b[1][0] && p.y <= b[1][1] && p.z >= b[2][0] && p.z <= b[2][1]
    }
}

impl Default for WorkspaceDimensions {
    fn default() -> Self {
        Self::new(200.0, 200.0, 100.0)
    }
}

/// How a move is categorized for speed selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementType {
    ZOnly,
    Precision,
    Travel,
    Normal,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::ZOnly => "z-only",
            MovementType::Precision => "precision",
            MovementType::Travel => "travel",
            MovementType::Normal => "normal",
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveClassification {
    pub xy_distance: f64,
    pub z_distance: f64,
    pub total_distance: f64,
    pub movement_type: MovementType,
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Clamps `target` into the workspace, zeroing non-finite components first.
pub fn clamp(target: Position, workspace: &WorkspaceDimensions) -> Position {
    let t = target.sanitized();
    let b = workspace.bounds();
    Position {
        x: clamp_axis(t.x, b[0]),
        y: clamp_axis(t.y, b[1]),
        z: clamp_axis(t.z, b[2]),
    }
}

fn clamp_axis(v: f64, [min, max]: [f64; 2]) -> f64 {
    // A degenerate (zero or negative) extent pins the axis to the origin.
    if !(max >= min) {
        return 0.0;
    }
    v.max(min).min(max)
}

pub fn classify_move(start: &Position, target: &Position) -> MoveClassification {
    let xy_distance = start.xy_distance_to(target);
    let z_distance = (target.z - start.z).abs();
    let total_distance = start.distance_to(target);

    let movement_type = if z_distance > Z_ONLY_Z_THRESHOLD && xy_distance < Z_ONLY_XY_TOLERANCE {
        MovementType::ZOnly
    } else if total_distance < PRECISION_DISTANCE {
        MovementType::Precision
    } else if total_distance > TRAVEL_DISTANCE {
        MovementType::Travel
    } else {
        MovementType::Normal
    };

    MoveClassification {
        xy_distance,
        z_distance,
        total_distance,
        movement_type,
    }
}

/// Cubic ease-in-out on `[0, 1]`.
pub fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        let t1 = -2.0 * t + 2.0;
        1.0 - t1 * t1 * t1 / 2.0
    }
}
