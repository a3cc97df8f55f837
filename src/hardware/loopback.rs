// src/hardware/loopback.rs - In-process hardware delegate with latency and failure injection

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{HardwareDelegate, HardwareError};
use stagetrack_shared::Position;

/// Call counters, for tests and the CLI status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub moves: u64,
    pub homes: u64,
    pub emergency_stops: u64,
}

#[derive(Debug)]
pub struct LoopbackHardware {
    connected: AtomicBool,
    reject_moves: AtomicBool,
    fail_moves: AtomicBool,
    latency: Duration,
    position: Mutex<Position>,
    moves: AtomicU64,
    homes: AtomicU64,
    emergency_stops: AtomicU64,
}

impl LoopbackHardware {
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(50))
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            connected: AtomicBool::new(true),
            reject_moves: AtomicBool::new(false),
            fail_moves: AtomicBool::new(false),
            latency,
            position: Mutex::new(Position::ORIGIN),
            moves: AtomicU64::new(0),
            homes: AtomicU64::new(0),
            emergency_stops: AtomicU64::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Moves resolve `Ok(false)` while set.
    pub fn set_reject_moves(&self, reject: bool) {
        self.reject_moves.store(reject, Ordering::SeqCst);
    }

    /// Moves resolve with a transport error while set.
    pub fn set_fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::SeqCst);
    }

    pub fn position(&self) -> Position {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            moves: self.moves.load(Ordering::SeqCst),
            homes: self.homes.load(Ordering::SeqCst),
            emergency_stops: self.emergency_stops.load(Ordering::SeqCst),
        }
    }
}

impl Default for LoopbackHardware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareDelegate for LoopbackHardware {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn move_absolute(&self, x: f64, y: f64, z: f64) -> Result<bool, HardwareError> {
        if !self.is_connected() {
            return Err(HardwareError::NotConnected);
        }
        self.moves.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(HardwareError::Other("loopback move failure".to_string()));
        }
        if self.reject_moves.load(Ordering::SeqCst) {
            tracing::debug!("Loopback rejecting move to ({:.3}, {:.3}, {:.3})", x, y, z);
            return Ok(false);
        }
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = Position::new(x, y, z);
        Ok(true)
    }

    async fn home(&self) -> Result<(), HardwareError> {
        if !self.is_connected() {
            return Err(HardwareError::NotConnected);
        }
        self.homes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(HardwareError::HomingFailed("loopback homing failure".to_string()));
        }
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = Position::ORIGIN;
        Ok(())
    }

    async fn emergency_stop(&self) -> Result<(), HardwareError> {
        self.emergency_stops.fetch_add(1, Ordering::SeqCst);
        tracing::warn!("Loopback emergency stop");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tracks_position_and_counts_calls() {
        let hw = LoopbackHardware::new();
        assert!(hw.move_absolute(1.0, 2.0, 3.0).await.unwrap());
        assert_eq!(hw.position(), Position::new(1.0, 2.0, 3.0));
        hw.home().await.unwrap();
        assert_eq!(hw.position(), Position::ORIGIN);
        assert_eq!(hw.stats().moves, 1);
        assert_eq!(hw.stats().homes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_failures() {
        let hw = LoopbackHardware::new();
        hw.set_reject_moves(true);
        assert!(!hw.move_absolute(1.0, 0.0, 0.0).await.unwrap());
        hw.set_fail_moves(true);
        assert!(hw.move_absolute(1.0, 0.0, 0.0).await.is_err());
        hw.set_connected(false);
        assert!(matches!(hw.home().await, Err(HardwareError::NotConnected)));
    }
}
