// Trait-based interface to the physical motion backend (shared)

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Not connected to hardware")]
    NotConnected,
    #[error("Hardware rejected move to ({x:.3}, {y:.3}, {z:.3})")]
    MoveRejected { x: f64, y: f64, z: f64 },
    #[error("Homing failed: {0}")]
    HomingFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Hardware error: {0}")]
    Other(String),
}

/// A physical motion backend that replaces local simulation while connected.
///
/// Calls may take arbitrarily long; callers own any timeout policy.
#[async_trait]
pub trait HardwareDelegate: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Moves to an absolute position. `Ok(false)` means the backend refused
    /// or failed the move without a transport error.
    async fn move_absolute(&self, x: f64, y: f64, z: f64) -> Result<bool, HardwareError>;

    async fn home(&self) -> Result<(), HardwareError>;

    /// Best effort. Callers fire this and only log the outcome.
    async fn emergency_stop(&self) -> Result<(), HardwareError>;
}
