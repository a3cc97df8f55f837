// src/stage.rs - Stage context: owns the store, history, motion and persistence
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::communication::event_system::Subscription;
use crate::hardware::{HardwareDelegate, HardwareError};
use crate::history::HistoryManager;
use crate::motion::MotionController;
use crate::persistence::{PersistenceError, PersistenceManager};
use crate::state::{StageState, StateStore};
use stagetrack_shared::config::{Config, ConfigError};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Context object handed to front-ends. Every component shares the same
/// state store.
pub struct Stage {
    config: Config,
    store: StateStore,
    history: HistoryManager,
    motion: MotionController,
    persistence: PersistenceManager,
    shutdown_tx: broadcast::Sender<()>,
    autosave: Option<JoinHandle<()>>,
}

impl Stage {
    pub fn new(config: Config) -> Result<Self, StageError> {
        config.validate()?;
        let defaults = StageState::from_config(&config);
        let store = StateStore::new(defaults.clone());
        let history = HistoryManager::new(store.clone(), config.history.clone());
        let motion = MotionController::new(store.clone(), history.clone(), &config);
        let persistence = PersistenceManager::new(&config.persistence, defaults);
        let (shutdown_tx, _) = broadcast::channel(1);

        tracing::info!(
            "Stage '{}' workspace {}x{}x{}mm",
            config.stage.stage_name.as_deref().unwrap_or("stage"),
            config.stage.workspace.x,
            config.stage.workspace.y,
            config.stage.workspace.z
        );

        Ok(Self {
            config,
            store,
            history,
            motion,
            persistence,
            shutdown_tx,
            autosave: None,
        })
    }

    pub fn with_hardware(self, delegate: Arc<dyn HardwareDelegate>) -> Self {
        self.motion.attach_hardware(delegate);
        self
    }

    /// Loads the saved snapshot, if any.
    pub async fn restore(&self) -> Result<bool, StageError> {
        Ok(self.persistence.restore(&self.store).await?)
    }

    /// Restores saved state and starts the autosave loop.
    pub async fn start(&mut self) -> Result<(), StageError> {
        tracing::info!("Starting stage");
        self.restore().await?;
        if self.autosave.is_none() {
            let rx = self.shutdown_tx.subscribe();
            self.autosave = Some(self.persistence.spawn_autosave(self.store.clone(), rx));
        }
        tracing::info!("Stage ready at {}", self.store.get().pos);
        Ok(())
    }

    /// Stops background tasks and writes a final snapshot.
    pub async fn shutdown(&mut self) -> Result<(), StageError> {
        tracing::info!("Shutting down stage");
        if self.motion.is_moving() {
            self.motion.emergency_stop();
        }
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.autosave.take() {
            if let Err(e) = handle.await {
                tracing::error!("Autosave task ended abnormally: {}", e);
            }
        }
        self.save().await
    }

    pub async fn save(&self) -> Result<(), StageError> {
        Ok(self.persistence.save(&self.store.get()).await?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    pub fn state(&self) -> StageState {
        self.store.get()
    }

    pub fn subscribe(&self) -> Subscription {
        self.store.subscribe()
    }

    pub async fn go_to_history_position(&self, index: usize) -> Result<bool, StageError> {
        self.history.go_to_history_position(&self.motion, index).await
    }

    pub async fn history_previous(&self) -> Result<bool, StageError> {
        self.history.go_to_previous(&self.motion).await
    }

    pub async fn history_next(&self) -> Result<bool, StageError> {
        self.history.go_to_next(&self.motion).await
    }

    /// Restores configured defaults, keeping the workspace.
    pub fn reset(&self) {
        self.motion.emergency_stop();
        self.store.reset(&self.config);
    }
}
