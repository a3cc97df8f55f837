// src/persistence.rs - JSON snapshots of the stage state, debounced and periodic autosave

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::communication::event_system::{StageEvent, Topic};
use crate::state::{StageState, StateStore};
use stagetrack_shared::config::PersistenceConfig;
use stagetrack_shared::geometry;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    state: StageState,
}

#[derive(Debug, Clone)]
pub struct PersistenceManager {
    path: PathBuf,
    config: PersistenceConfig,
    defaults: StageState,
}

impl PersistenceManager {
    /// `defaults` fills in every field a snapshot does not carry.
    pub fn new(config: &PersistenceConfig, defaults: StageState) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            config: config.clone(),
            defaults,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        self.path.with_extension("json.bak")
    }

    /// Writes `state` (minus runtime flags) to disk. The previous file is
    /// kept as a backup and the new one replaces it atomically.
    pub async fn save(&self, state: &StageState) -> Result<(), PersistenceError> {
        let mut state = state.clone();
        state.is_moving = false;
        state.history.trim_to(self.config.max_saved_entries);

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            state,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::copy(&self.path, self.backup_path()).await {
                tracing::warn!("Could not back up {}: {}", self.path.display(), e);
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            "State saved to {} ({} XYZ entries)",
            self.path.display(),
            snapshot.state.history.xyz().len()
        );
        Ok(())
    }

    /// Reads the saved snapshot, if any, merged over the defaults.
    ///
    /// Top-level fields present in the file win; anything missing keeps
    /// its default. A bare state object without the snapshot envelope is
    /// accepted too.
    pub async fn load(&self) -> Result<Option<StageState>, PersistenceError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No saved state at {}, using defaults", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let saved: serde_json::Value = serde_json::from_str(&text)?;
        if let Some(version) = saved.get("version").and_then(|v| v.as_u64()) {
            if version > u64::from(SNAPSHOT_VERSION) {
                tracing::warn!("Snapshot version {} is newer than supported {}", version, SNAPSHOT_VERSION);
            }
        }
        let saved_state = match saved {
            serde_json::Value::Object(mut envelope) if envelope.contains_key("state") => {
                envelope.remove("state").unwrap_or_default()
            }
            other => other,
        };

        let mut merged = serde_json::to_value(&self.defaults)?;
        if let (Some(base), serde_json::Value::Object(fields)) = (merged.as_object_mut(), saved_state) {
            for (key, value) in fields {
                base.insert(key, value);
            }
        }

        let mut state: StageState = serde_json::from_value(merged)?;
        state.is_moving = false;
        if !state.workspace.is_valid() {
            tracing::warn!("Saved workspace {:?} is invalid, using {:?}", state.workspace, self.defaults.workspace);
            state.workspace = self.defaults.workspace;
        }
        state.pos = geometry::clamp(state.pos, &state.workspace);
        state.history.retain_final();

        tracing::info!(
            "Loaded state from {} at {} ({} XYZ / {} XY entries)",
            self.path.display(),
            state.pos,
            state.history.xyz().len(),
            state.history.xy().len()
        );
        Ok(Some(state))
    }

    /// Loads the snapshot into `store`. Returns whether anything was loaded.
    pub async fn restore(&self, store: &StateStore) -> Result<bool, PersistenceError> {
        match self.load().await? {
            Some(state) => {
                store.replace(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Saves shortly after significant changes and on a fixed period, until
    /// `shutdown` fires. Save errors are logged.
    pub fn spawn_autosave(&self, store: StateStore, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let manager = self.clone();
        let mut events = store.subscribe_to(&[
            Topic::StateChanged,
            Topic::MovementCompleted,
            Topic::HistoryCleared,
            Topic::HomeSet,
            Topic::SpeedChanged,
        ]);
        let period = Duration::from_secs(self.config.autosave_interval_secs.max(1));
        let debounce_for = Duration::from_secs(self.config.debounce_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let debounce = tokio::time::sleep(debounce_for);
            tokio::pin!(debounce);
            let mut dirty = false;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Autosave loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        manager.save_logged(&store.get()).await;
                        dirty = false;
                    }
                    _ = &mut debounce, if dirty => {
                        manager.save_logged(&store.get()).await;
                        dirty = false;
                    }
                    event = events.recv() => match event {
                        Some(StageEvent::StateChanged { significant: false, .. }) => {}
                        Some(_) => {
                            dirty = true;
                            debounce.as_mut().reset(Instant::now() + debounce_for);
                        }
                        None => break,
                    }
                }
            }
        })
    }

    async fn save_logged(&self, state: &StageState) {
        if let Err(e) = self.save(state).await {
            tracing::error!("Failed to save state to {}: {}", self.path.display(), e);
        }
    }
}
