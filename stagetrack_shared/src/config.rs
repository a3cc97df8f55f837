//! Shared configuration logic for the stage host, CLI and tests.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [stage]
//! workspace = { x = 200.0, y = 200.0, z = 100.0 }
//! tick_interval_ms = 16
//!
//! [motion.speeds]
//! travel = 80.0
//! print = 25.0
//! precision = 10.0
//! z = 5.0
//!
//! [home.xyz]
//! x = 0.0
//! y = 0.0
//! z = 10.0
//! ```
//!
//! Every field is optional; missing values fall back to the defaults below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{MovementType, WorkspaceDimensions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Stage-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageConfig {
    #[serde(default)]
    pub workspace: WorkspaceDimensions,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub sensitivity: SensitivityConfig,
    #[serde(default = "default_move_speed")]
    pub move_speed: f64,
    #[serde(default)]
    pub stage_name: Option<String>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceDimensions::default(),
            tick_interval_ms: default_tick_interval_ms(),
            sensitivity: SensitivityConfig::default(),
            move_speed: default_move_speed(),
            stage_name: None,
        }
    }
}

/// Per-axis jog step, mm.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SensitivityConfig {
    #[serde(default = "default_sensitivity_xy")]
    pub x: f64,
    #[serde(default = "default_sensitivity_xy")]
    pub y: f64,
    #[serde(default = "default_sensitivity_z")]
    pub z: f64,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            x: default_sensitivity_xy(),
            y: default_sensitivity_xy(),
            z: default_sensitivity_z(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionConfig {
    #[serde(default)]
    pub speeds: SpeedTable,
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: f64,
    #[serde(default = "default_round_decimals")]
    pub round_decimals: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            speeds: SpeedTable::default(),
            min_duration_ms: default_min_duration_ms(),
            round_decimals: default_round_decimals(),
        }
    }
}

/// Speed policy in mm/s, keyed by movement type. This is a tuning table,
/// not a physical model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SpeedTable {
    #[serde(default = "default_travel_speed")]
    pub travel: f64,
    #[serde(default = "default_print_speed")]
    pub print: f64,
    #[serde(default = "default_precision_speed")]
    pub precision: f64,
    #[serde(default = "default_z_speed")]
    pub z: f64,
}

impl SpeedTable {
    pub fn speed_for(&self, movement_type: MovementType) -> f64 {
        match movement_type {
            MovementType::ZOnly => self.z,
            MovementType::Precision => self.precision,
            MovementType::Travel => self.travel,
            MovementType::Normal => self.print,
        }
    }
}

impl Default for SpeedTable {
    fn default() -> Self {
        Self {
            travel: default_travel_speed(),
            print: default_print_speed(),
            precision: default_precision_speed(),
            z: default_z_speed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HomeXy {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HomeXyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct HomeConfig {
    #[serde(default)]
    pub xy: HomeXy,
    #[serde(default)]
    pub xyz: HomeXyz,
    #[serde(default)]
    pub z: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_track_points")]
    pub max_track_points: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_track_points: default_max_track_points(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_state_path")]
    pub path: String,
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "default_max_saved_entries")]
    pub max_saved_entries: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            autosave_interval_secs: default_autosave_interval_secs(),
            debounce_secs: default_debounce_secs(),
            max_saved_entries: default_max_saved_entries(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = &self.stage.workspace;
        for (axis, dim) in [("x", ws.x), ("y", ws.y), ("z", ws.z)] {
            if !(dim.is_finite() && dim > 0.0 && dim <= WorkspaceDimensions::MAX_EXTENT) {
                return Err(ConfigError::Invalid(format!(
                    "Workspace dimension '{}' must be in (0, {}]",
                    axis,
                    WorkspaceDimensions::MAX_EXTENT
                )));
            }
        }
        if self.stage.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".to_string()));
        }
        let s = &self.motion.speeds;
        for (name, speed) in [("travel", s.travel), ("print", s.print), ("precision", s.precision), ("z", s.z)] {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(ConfigError::Invalid(format!("Speed '{}' must be > 0", name)));
            }
        }
        if self.motion.min_duration_ms < 0.0 {
            return Err(ConfigError::Invalid("min_duration_ms must be >= 0".to_string()));
        }
        if self.history.max_entries == 0 {
            return Err(ConfigError::Invalid("history.max_entries must be > 0".to_string()));
        }
        Ok(())
    }
}

fn default_tick_interval_ms() -> u64 { 16 }
fn default_move_speed() -> f64 { 50.0 }
fn default_sensitivity_xy() -> f64 { 1.0 }
fn default_sensitivity_z() -> f64 { 0.5 }
fn default_min_duration_ms() -> f64 { 200.0 }
fn default_round_decimals() -> u32 { 3 }
fn default_travel_speed() -> f64 { 80.0 }
fn default_print_speed() -> f64 { 25.0 }
fn default_precision_speed() -> f64 { 10.0 }
fn default_z_speed() -> f64 { 5.0 }
fn default_max_entries() -> usize { 1000 }
fn default_max_track_points() -> usize { 1000 }
fn default_state_path() -> String { "stagetrack_state.json".to_string() }
fn default_autosave_interval_secs() -> u64 { 30 }
fn default_debounce_secs() -> u64 { 5 }
fn default_max_saved_entries() -> usize { 500 }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &str, config: &Config) -> Result<(), ConfigError> {
    let toml_string = toml::to_string(config)?;
    std::fs::write(path, toml_string)?;
    Ok(())
}
