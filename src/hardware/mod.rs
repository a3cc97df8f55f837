// src/hardware/mod.rs - Motion backend selection and the attached hardware delegate
pub mod loopback;

use std::sync::{Arc, PoisonError, RwLock};

pub use loopback::LoopbackHardware;
pub use stagetrack_shared::hardware_traits::{HardwareDelegate, HardwareError};

/// How a single move is executed. Chosen once when the move starts and not
/// re-probed while it runs.
#[derive(Clone)]
pub enum MotionBackend {
    Simulated,
    Delegated(Arc<dyn HardwareDelegate>),
}

impl MotionBackend {
    pub fn is_delegated(&self) -> bool {
        matches!(self, MotionBackend::Delegated(_))
    }
}

impl std::fmt::Debug for MotionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MotionBackend::Simulated => f.write_str("Simulated"),
            MotionBackend::Delegated(_) => f.write_str("Delegated"),
        }
    }
}

/// Holds the optional hardware delegate. Clones share the slot.
#[derive(Clone, Default)]
pub struct HardwareSlot {
    delegate: Arc<RwLock<Option<Arc<dyn HardwareDelegate>>>>,
}

impl HardwareSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, delegate: Arc<dyn HardwareDelegate>) {
        *self.delegate.write().unwrap_or_else(PoisonError::into_inner) = Some(delegate);
        tracing::info!("Hardware delegate attached");
    }

    pub fn detach(&self) -> Option<Arc<dyn HardwareDelegate>> {
        let previous = self.delegate.write().unwrap_or_else(PoisonError::into_inner).take();
        if previous.is_some() {
            tracing::info!("Hardware delegate detached");
        }
        previous
    }

    pub fn get(&self) -> Option<Arc<dyn HardwareDelegate>> {
        self.delegate.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The attached delegate, only if it reports connected.
    pub fn connected(&self) -> Option<Arc<dyn HardwareDelegate>> {
        self.get().filter(|hw| hw.is_connected())
    }

    pub fn is_connected(&self) -> bool {
        self.connected().is_some()
    }

    pub fn select_backend(&self) -> MotionBackend {
        match self.connected() {
            Some(hw) => MotionBackend::Delegated(hw),
            None => MotionBackend::Simulated,
        }
    }
}

impl std::fmt::Debug for HardwareSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSlot")
            .field("attached", &self.get().is_some())
            .field("connected", &self.is_connected())
            .finish()
    }
}
