// src/motion/mod.rs - Movement planning, animation and dispatch

pub mod controller;
pub mod direction;
pub mod planner;
pub mod queue;

pub use controller::{MotionController, PatternOptions, PatternPoint};
pub use direction::Direction;
pub use planner::{Movement, MotionPlanner};
pub use queue::{MoveQueue, MoveRequest};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which home position a home/set-home operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HomeMode {
    /// X and Y only, Z is kept.
    Xy,
    Xyz,
    /// Z only, X and Y are kept.
    Z,
}

impl FromStr for HomeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xy" => Ok(HomeMode::Xy),
            "xyz" => Ok(HomeMode::Xyz),
            "z" => Ok(HomeMode::Z),
            other => Err(format!("Unknown home mode: {}", other)),
        }
    }
}

impl fmt::Display for HomeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HomeMode::Xy => "xy",
            HomeMode::Xyz => "xyz",
            HomeMode::Z => "z",
        })
    }
}

/// Animator lifecycle: `Idle -> Planning -> Simulating | Delegating -> Completed -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionPhase {
    #[default]
    Idle,
    Planning,
    Simulating,
    Delegating,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MovementStatus {
    pub phase: MotionPhase,
    pub is_moving: bool,
    pub queue_length: usize,
    pub emergency_stop: bool,
}
