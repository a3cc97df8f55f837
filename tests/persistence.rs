// Persistence tests: snapshot save/load, merge over defaults, autosave

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stagetrack::persistence::PersistenceManager;
    use stagetrack::{HistoryMode, Position, Stage, StageState, StatePatch};
    use stagetrack_shared::config::{Config, PersistenceConfig};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.persistence.path = dir.path().join("state.json").display().to_string();
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_and_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let stage = Stage::new(config.clone()).unwrap();
        assert!(stage.motion().move_absolute(12.0, -8.0, 0.0).await.unwrap());
        assert!(stage.motion().move_absolute(12.0, -8.0, 4.0).await.unwrap());
        stage.history().toggle_history_mode();
        stage.save().await.unwrap();

        let restored = Stage::new(config).unwrap();
        assert!(restored.restore().await.unwrap());
        let state = restored.state();
        assert_eq!(state.pos, Position::new(12.0, -8.0, 4.0));
        assert_eq!(state.history.xyz().len(), 2);
        assert_eq!(state.history.xy().len(), 1);
        assert_eq!(state.history.cursor().mode, HistoryMode::Frozen);
        assert!(!state.is_moving);
    }

    #[tokio::test]
    async fn test_missing_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let stage = Stage::new(config_in(&dir)).unwrap();
        assert!(!stage.restore().await.unwrap());
        assert_eq!(stage.state(), StageState::from_config(stage.config()));
    }

    #[tokio::test]
    async fn test_partial_snapshot_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"version":1,"saved_at":"2024-01-01T00:00:00Z","state":{"pos":{"x":5.0,"y":6.0,"z":7.0},"move_speed":120.0}}"#,
        )
        .unwrap();

        let config = PersistenceConfig {
            path: path.display().to_string(),
            ..Default::default()
        };
        let defaults = StageState::default();
        let manager = PersistenceManager::new(&config, defaults.clone());
        let state = manager.load().await.unwrap().unwrap();

        assert_eq!(state.pos, Position::new(5.0, 6.0, 7.0));
        assert_eq!(state.move_speed, 120.0);
        assert_eq!(state.locks, defaults.locks);
        assert_eq!(state.workspace, defaults.workspace);
        assert!(state.history.xyz().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_saved_workspace_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"state":{"workspace":{"x":1e200,"y":100.0,"z":50.0},"pos":{"x":1e199,"y":0.0,"z":0.0}}}"#,
        )
        .unwrap();

        let config = PersistenceConfig {
            path: path.display().to_string(),
            ..Default::default()
        };
        let defaults = StageState::default();
        let manager = PersistenceManager::new(&config, defaults.clone());
        let state = manager.load().await.unwrap().unwrap();

        assert_eq!(state.workspace, defaults.workspace);
        assert_eq!(state.pos.x, defaults.workspace.x / 2.0);
    }

    #[tokio::test]
    async fn test_saved_history_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.persistence.max_saved_entries = 3;
        let stage = Stage::new(config.clone()).unwrap();
        for i in 0..6 {
            stage.history().record_final_position(Position::new(i as f64, 0.0, 0.0));
        }
        stage.save().await.unwrap();

        let manager = PersistenceManager::new(&config.persistence, StageState::from_config(&config));
        let state = manager.load().await.unwrap().unwrap();
        assert_eq!(state.history.xyz().len(), 3);
        assert_eq!(state.history.xyz()[0].x, 3.0);
        // The live store is untouched.
        assert_eq!(stage.state().history.xyz().len(), 6);
    }

    #[tokio::test]
    async fn test_second_save_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let stage = Stage::new(config_in(&dir)).unwrap();
        tokio_test::assert_ok!(stage.save().await);
        tokio_test::assert_ok!(stage.save().await);
        assert!(dir.path().join("state.json.bak").exists());
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        std::fs::write(&config.persistence.path, "{ not json").unwrap();
        let stage = Stage::new(config).unwrap();
        tokio_test::assert_err!(stage.restore().await);
    }

    #[tokio::test]
    async fn test_autosave_after_significant_change() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.persistence.debounce_secs = 0;
        config.persistence.autosave_interval_secs = 3600;
        let path = std::path::PathBuf::from(&config.persistence.path);

        let mut stage = Stage::new(config).unwrap();
        stage.start().await.unwrap();
        stage.store().update(StatePatch::position(Position::new(1.0, 1.0, 0.0)));

        let mut saved = false;
        for _ in 0..100 {
            if path.exists() {
                saved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(saved, "state file was not written after a significant change");
        stage.shutdown().await.unwrap();
    }
}
