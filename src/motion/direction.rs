// src/motion/direction.rs - Jog directions and their resolution into axis steps

use std::f64::consts::SQRT_2;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::state::AxisLocks;
use stagetrack_shared::config::SensitivityConfig;

/// Eight planar directions plus Z up/down. "Up" is +Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
    ZUp,
    ZDown,
}

impl Direction {
    pub const ALL: [Direction; 10] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
        Direction::UpLeft,
        Direction::UpRight,
        Direction::DownLeft,
        Direction::DownRight,
        Direction::ZUp,
        Direction::ZDown,
    ];

    /// Unit signs per axis.
    fn signs(self) -> (f64, f64, f64) {
        match self {
            Direction::Up => (0.0, 1.0, 0.0),
            Direction::Down => (0.0, -1.0, 0.0),
            Direction::Left => (-1.0, 0.0, 0.0),
            Direction::Right => (1.0, 0.0, 0.0),
            Direction::UpLeft => (-1.0, 1.0, 0.0),
            Direction::UpRight => (1.0, 1.0, 0.0),
            Direction::DownLeft => (-1.0, -1.0, 0.0),
            Direction::DownRight => (1.0, -1.0, 0.0),
            Direction::ZUp => (0.0, 0.0, 1.0),
            Direction::ZDown => (0.0, 0.0, -1.0),
        }
    }

    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Direction::UpLeft | Direction::UpRight | Direction::DownLeft | Direction::DownRight
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::UpLeft => "upLeft",
            Direction::UpRight => "upRight",
            Direction::DownLeft => "downLeft",
            Direction::DownRight => "downRight",
            Direction::ZUp => "zUp",
            Direction::ZDown => "zDown",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown direction: {0}")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let dir = match key.as_str() {
            "up" | "north" | "n" => Direction::Up,
            "down" | "south" | "s" => Direction::Down,
            "left" | "west" | "w" => Direction::Left,
            "right" | "east" | "e" => Direction::Right,
            "upleft" | "northwest" | "nw" => Direction::UpLeft,
            "upright" | "northeast" | "ne" => Direction::UpRight,
            "downleft" | "southwest" | "sw" => Direction::DownLeft,
            "downright" | "southeast" | "se" => Direction::DownRight,
            "zup" => Direction::ZUp,
            "zdown" => Direction::ZDown,
            _ => return Err(UnknownDirection(s.to_string())),
        };
        Ok(dir)
    }
}

/// Resolves a jog into `(dx, dy, dz)`.
///
/// Each axis steps by its own sensitivity, or by `distance` when one is
/// given. Diagonals divide each planar component by √2. Locked axes are
/// zeroed; with XY coupling the planar part is rescaled to the larger XY
/// sensitivity, whatever `distance` was. Returns `None` when nothing is left to move.
pub fn resolve(
    direction: Direction,
    distance: Option<f64>,
    sensitivity: &SensitivityConfig,
    locks: &AxisLocks,
) -> Option<(f64, f64, f64)> {
    let custom = distance.filter(|d| d.is_finite() && *d > 0.0);
    let step_x = custom.unwrap_or(sensitivity.x);
    let step_y = custom.unwrap_or(sensitivity.y);
    let step_z = custom.unwrap_or(sensitivity.z);

    let (sx, sy, sz) = direction.signs();
    let mut dx = sx * step_x;
    let mut dy = sy * step_y;
    let dz = if locks.lock_z { 0.0 } else { sz * step_z };

    if direction.is_diagonal() {
        dx /= SQRT_2;
        dy /= SQRT_2;
    }
    if locks.lock_x {
        dx = 0.0;
    }
    if locks.lock_y {
        dy = 0.0;
    }

    let planar = dx.hypot(dy);
    if locks.lock_xy && planar > 0.0 {
        let magnitude = sensitivity.x.max(sensitivity.y);
        dx = dx / planar * magnitude;
        dy = dy / planar * magnitude;
    }

    if dx == 0.0 && dy == 0.0 && dz == 0.0 {
        return None;
    }
    Some((dx, dy, dz))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free() -> AxisLocks {
        AxisLocks {
            lock_x: false,
            lock_y: false,
            lock_z: false,
            lock_xy: false,
            ..Default::default()
        }
    }

    fn sens(x: f64, y: f64, z: f64) -> SensitivityConfig {
        SensitivityConfig { x, y, z }
    }

    #[test]
    fn diagonal_divides_each_axis_by_sqrt2() {
        let (dx, dy, dz) = resolve(Direction::UpRight, None, &sens(2.0, 2.0, 1.0), &free()).unwrap();
        assert!((dx - 2.0 / SQRT_2).abs() < 1e-12);
        assert!((dy - 2.0 / SQRT_2).abs() < 1e-12);
        assert_eq!(dz, 0.0);
    }

    #[test]
    fn diagonal_with_coupling_keeps_per_axis_step() {
        let locks = AxisLocks {
            lock_xy: true,
            ..free()
        };
        let (dx, dy, _) = resolve(Direction::UpRight, None, &sens(2.0, 2.0, 1.0), &locks).unwrap();
        assert!((dx - 1.4142).abs() < 1e-4);
        assert!((dy - 1.4142).abs() < 1e-4);
    }

    #[test]
    fn coupled_move_uses_larger_sensitivity() {
        let locks = AxisLocks {
            lock_xy: true,
            ..free()
        };
        let (dx, dy, _) = resolve(Direction::Left, None, &sens(1.0, 3.0, 1.0), &locks).unwrap();
        assert_eq!(dx, -3.0);
        assert_eq!(dy, 0.0);
    }

    #[test]
    fn coupled_move_ignores_explicit_distance() {
        let locks = AxisLocks {
            lock_xy: true,
            ..free()
        };
        let (dx, dy, _) = resolve(Direction::Right, Some(10.0), &sens(1.0, 1.0, 1.0), &locks).unwrap();
        assert_eq!(dx, 1.0);
        assert_eq!(dy, 0.0);
        let (dx, dy, _) = resolve(Direction::DownLeft, Some(10.0), &sens(1.0, 2.0, 1.0), &locks).unwrap();
        assert!((dx.hypot(dy) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn locked_axes_are_zeroed() {
        let locks = AxisLocks {
            lock_y: true,
            ..free()
        };
        let (dx, dy, _) = resolve(Direction::DownRight, None, &sens(2.0, 2.0, 1.0), &locks).unwrap();
        assert!((dx - 2.0 / SQRT_2).abs() < 1e-12);
        assert_eq!(dy, 0.0);
        assert_eq!(resolve(Direction::Up, None, &sens(2.0, 2.0, 1.0), &locks), None);
    }

    #[test]
    fn z_moves_need_z_unlocked() {
        let locked = AxisLocks {
            lock_z: true,
            ..free()
        };
        assert_eq!(resolve(Direction::ZUp, None, &sens(1.0, 1.0, 0.5), &locked), None);
        assert_eq!(
            resolve(Direction::ZDown, None, &sens(1.0, 1.0, 0.5), &free()),
            Some((0.0, 0.0, -0.5))
        );
    }

    #[test]
    fn explicit_distance_overrides_sensitivity() {
        let step = resolve(Direction::Right, Some(10.0), &sens(1.0, 1.0, 1.0), &free());
        assert_eq!(step, Some((10.0, 0.0, 0.0)));
        let fallback = resolve(Direction::Right, Some(0.0), &sens(1.5, 1.0, 1.0), &free());
        assert_eq!(fallback, Some((1.5, 0.0, 0.0)));
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("upRight".parse::<Direction>(), Ok(Direction::UpRight));
        assert_eq!("down-left".parse::<Direction>(), Ok(Direction::DownLeft));
        assert_eq!("NORTH".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!("z_up".parse::<Direction>(), Ok(Direction::ZUp));
        assert!("sideways".parse::<Direction>().is_err());
        for d in Direction::ALL {
            assert_eq!(d.as_str().parse::<Direction>(), Ok(d));
        }
    }
}
