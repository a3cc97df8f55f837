use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Per-axis locks plus the XY coupling.
///
/// While `lock_xy` (coupling) is on, X and Y locks always move together and
/// `xy_locked` mirrors their shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisLocks {
    pub lock_x: bool,
    pub lock_y: bool,
    pub lock_z: bool,
    pub lock_xy: bool,
    pub xy_locked: bool,
    pub lock_home_xy: bool,
    pub lock_home_xyz: bool,
}

impl Default for AxisLocks {
    fn default() -> Self {
        Self {
            lock_x: false,
            lock_y: false,
            lock_z: true,
            lock_xy: true,
            xy_locked: false,
            lock_home_xy: false,
            lock_home_xyz: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockAxis {
    X,
    Y,
    Z,
    Xy,
    HomeXy,
    HomeXyz,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown lock axis: {0}")]
pub struct UnknownLockAxis(pub String);

impl FromStr for LockAxis {
    type Err = UnknownLockAxis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(LockAxis::X),
            "y" => Ok(LockAxis::Y),
            "z" => Ok(LockAxis::Z),
            "xy" => Ok(LockAxis::Xy),
            "homexy" | "home_xy" => Ok(LockAxis::HomeXy),
            "homexyz" | "home_xyz" => Ok(LockAxis::HomeXyz),
            _ => Err(UnknownLockAxis(s.to_string())),
        }
    }
}

impl fmt::Display for LockAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockAxis::X => "X",
            LockAxis::Y => "Y",
            LockAxis::Z => "Z",
            LockAxis::Xy => "XY",
            LockAxis::HomeXy => "HomeXY",
            LockAxis::HomeXyz => "HomeXYZ",
        };
        f.write_str(name)
    }
}

impl AxisLocks {
    pub fn toggle(&mut self, axis: LockAxis) {
        match axis {
            LockAxis::Xy => {
                // Lock both unless both are already locked.
                let locked = !(self.lock_x && self.lock_y);
                self.set_xy(locked);
            }
            LockAxis::X | LockAxis::Y => {
                let current = if axis == LockAxis::X { self.lock_x } else { self.lock_y };
                let locked = !current;
                if self.lock_xy {
                    self.set_xy(locked);
                } else if axis == LockAxis::X {
                    self.lock_x = locked;
                } else {
                    self.lock_y = locked;
                }
            }
            LockAxis::Z => self.lock_z = !self.lock_z,
            LockAxis::HomeXy => self.lock_home_xy = !self.lock_home_xy,
            LockAxis::HomeXyz => self.lock_home_xyz = !self.lock_home_xyz,
        }
    }

    /// Enabling coupling while X and Y disagree unlocks both.
    pub fn toggle_coupling(&mut self) {
        self.lock_xy = !self.lock_xy;
        if self.lock_xy {
            if self.lock_x != self.lock_y {
                self.set_xy(false);
            } else {
                self.xy_locked = self.lock_x;
            }
        }
    }

    fn set_xy(&mut self, locked: bool) {
        self.lock_x = locked;
        self.lock_y = locked;
        self.xy_locked = locked;
    }
}

impl fmt::Display for AxisLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |b: bool| if b { "locked" } else { "free" };
        write!(
            f,
            "X={} Y={} Z={} coupled={} homeXY={} homeXYZ={}",
            flag(self.lock_x),
            flag(self.lock_y),
            flag(self.lock_z),
            self.lock_xy,
            flag(self.lock_home_xy),
            flag(self.lock_home_xyz)
        )
    }
}
