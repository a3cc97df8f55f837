// Integration tests for the motion controller: simulated and delegated moves, queueing, e-stop

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use stagetrack::hardware::{HardwareError, LoopbackHardware};
    use stagetrack::motion::{MotionPhase, PatternOptions, PatternPoint};
    use stagetrack::{
        Direction, HomeMode, MoveRequest, Position, Stage, StageError, StageEvent, StatePatch, Subscription, Topic,
    };
    use stagetrack_shared::config::{Config, SensitivityConfig};

    fn create_test_stage() -> Stage {
        Stage::new(Config::default()).expect("default config is valid")
    }

    async fn wait_completed(sub: &mut Subscription) -> (Position, bool) {
        loop {
            match sub.recv().await {
                Some(StageEvent::MovementCompleted { position, success }) => return (position, success),
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_relative_move_is_clamped_and_recorded() {
        let stage = create_test_stage();
        let moved = stage.motion().move_relative(300.0, 0.0, 0.0).await.unwrap();
        assert!(moved);

        let state = stage.state();
        assert_eq!(state.pos, Position::new(100.0, 0.0, 0.0));
        assert!(!state.is_moving);

        let last = state.history.xyz().last().copied().unwrap();
        assert_eq!((last.x, last.y, last.z), (100.0, 0.0, 0.0));
        assert!(last.is_final_position);
        assert_eq!(state.history.xy().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coupled_jog_uses_sensitivity_not_distance() {
        let stage = create_test_stage();
        assert!(stage.state().locks.lock_xy);
        assert!(stage.motion().move_direction(Direction::Right, Some(10.0)).await.unwrap());
        assert_eq!(stage.state().pos, Position::new(1.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_workspace_keeps_controller_usable() {
        let stage = create_test_stage();
        stage.store().update(StatePatch {
            workspace: Some(stagetrack::WorkspaceDimensions::new(1e200, 1e200, 1e200)),
            ..Default::default()
        });

        assert!(stage.motion().move_absolute(1e199, 0.0, 0.0).await.unwrap());
        assert_eq!(stage.state().pos, Position::new(100.0, 0.0, 0.0));
        assert!(!stage.motion().is_moving());
        assert!(stage.motion().move_absolute(0.0, 10.0, 0.0).await.unwrap());
        assert_eq!(stage.state().pos, Position::new(0.0, 10.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_move_rejected_while_moving() {
        let stage = create_test_stage();
        let motion = stage.motion().clone();
        let mut completed = stage.store().subscribe_to(&[Topic::MovementCompleted]);

        motion.queue(MoveRequest::Absolute(Position::new(50.0, 0.0, 0.0)));
        assert!(motion.is_moving());
        assert!(!motion.move_absolute(-20.0, 0.0, 0.0).await.unwrap());

        let (pos, success) = wait_completed(&mut completed).await;
        assert!(success);
        assert_eq!(pos, Position::new(50.0, 0.0, 0.0));
        assert_eq!(stage.state().history.xyz().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_move_blocks_direct_move() {
        let stage = create_test_stage();
        let motion = stage.motion().clone();
        let handle = tokio::spawn(async move { motion.move_absolute(0.0, 40.0, 0.0).await });
        tokio::task::yield_now().await;

        assert!(stage.motion().is_moving());
        assert!(!stage.motion().move_absolute(1.0, 1.0, 0.0).await.unwrap());
        assert!(handle.await.unwrap().unwrap());
        assert_eq!(stage.state().pos, Position::new(0.0, 40.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_animation_frames_are_not_history() {
        let stage = create_test_stage();
        let mut changes = stage.store().subscribe_to(&[Topic::StateChanged]);

        assert!(stage.motion().move_absolute(30.0, 0.0, 0.0).await.unwrap());

        let frames = changes
            .drain()
            .into_iter()
            .filter(|e| match e {
                StageEvent::StateChanged { new, .. } => new.is_moving && new.pos.x > 0.0 && new.pos.x < 30.0,
                _ => false,
            })
            .count();
        assert!(frames > 0, "expected intermediate positions to be published");
        assert_eq!(stage.state().history.xyz().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pure_z_move_skips_xy_history() {
        let stage = create_test_stage();
        let motion = stage.motion();
        assert!(motion.move_absolute(0.0, 0.0, 0.0).await.unwrap());
        let state = stage.state();
        let (xyz, xy) = (state.history.xyz().len(), state.history.xy().len());

        assert!(motion.move_absolute(0.0, 0.0, 5.0).await.unwrap());
        let state = stage.state();
        assert_eq!(state.history.xyz().len(), xyz + 1);
        assert_eq!(state.history.xy().len(), xy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagonal_jog_uses_per_axis_step() {
        let stage = create_test_stage();
        stage.store().update(StatePatch {
            sensitivity: Some(SensitivityConfig { x: 2.0, y: 2.0, z: 1.0 }),
            ..Default::default()
        });

        assert!(stage.motion().move_direction(Direction::UpRight, None).await.unwrap());
        let pos = stage.state().pos;
        assert!((pos.x - 1.414).abs() < 1e-9);
        assert!((pos.y - 1.414).abs() < 1e-9);
        assert_eq!(pos.z, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jog_on_locked_axis_dispatches_nothing() {
        let stage = create_test_stage();
        let mut started = stage.store().subscribe_to(&[Topic::MovementStarted]);
        // Z is locked by default.
        assert!(!stage.motion().move_direction(Direction::ZUp, None).await.unwrap());
        assert!(!stage.motion().move_direction_named("sideways", None).await.unwrap());
        assert!(started.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_while_idle_is_noop() {
        let stage = create_test_stage();
        let before = stage.state();
        stage.motion().emergency_stop();
        let after = stage.state();
        assert_eq!(before, after);
        assert!(!after.is_moving);
        assert_eq!(stage.motion().movement_status().phase, MotionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_aborts_move_and_clears_queue() {
        let stage = create_test_stage();
        let motion = stage.motion();
        let mut completed = stage.store().subscribe_to(&[Topic::MovementCompleted]);

        motion.queue(MoveRequest::Absolute(Position::new(100.0, 0.0, 0.0)));
        motion.queue(MoveRequest::Relative { dx: 0.0, dy: 10.0, dz: 0.0 });
        assert_eq!(motion.movement_status().queue_length, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        motion.emergency_stop();

        let (pos, success) = wait_completed(&mut completed).await;
        assert!(!success);
        assert!(pos.x > 0.0 && pos.x < 100.0);

        let status = motion.movement_status();
        assert!(!status.is_moving);
        assert_eq!(status.queue_length, 0);
        assert!(status.emergency_stop);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = stage.state();
        assert_eq!(state.pos, pos);
        assert!(!state.is_moving);
        assert!(state.history.xyz().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_runs_in_fifo_order() {
        let stage = create_test_stage();
        let motion = stage.motion();
        let mut completed = stage.store().subscribe_to(&[Topic::MovementCompleted]);

        motion.queue(MoveRequest::Absolute(Position::new(10.0, 0.0, 0.0)));
        motion.queue(MoveRequest::Relative { dx: 0.0, dy: 5.0, dz: 0.0 });
        motion.queue(MoveRequest::Direction {
            direction: Direction::Left,
            distance: Some(2.0),
        });
        assert_eq!(motion.movement_status().queue_length, 2);

        let mut reached = Vec::new();
        for _ in 0..3 {
            let (pos, success) = wait_completed(&mut completed).await;
            assert!(success);
            reached.push(pos);
        }
        assert_eq!(
            reached,
            vec![
                Position::new(10.0, 0.0, 0.0),
                Position::new(10.0, 5.0, 0.0),
                // XY coupling rescales the jog to the larger XY sensitivity.
                Position::new(9.0, 5.0, 0.0),
            ]
        );
        assert_eq!(stage.state().history.xyz().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_home_is_noop() {
        let stage = create_test_stage();
        assert!(stage.motion().move_absolute(10.0, 10.0, 0.0).await.unwrap());
        assert!(stage.store().toggle_lock("HomeXY"));

        let mut started = stage.store().subscribe_to(&[Topic::MovementStarted]);
        assert!(!stage.motion().go_home(HomeMode::Xy).await.unwrap());
        assert_eq!(stage.state().pos, Position::new(10.0, 10.0, 0.0));
        assert!(started.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_modes_keep_other_axes() {
        let stage = create_test_stage();
        let motion = stage.motion();
        assert!(motion.move_absolute(20.0, 30.0, 10.0).await.unwrap());

        assert!(motion.go_home(HomeMode::Z).await.unwrap());
        assert_eq!(stage.state().pos, Position::new(20.0, 30.0, 0.0));

        assert!(motion.move_absolute(20.0, 30.0, 10.0).await.unwrap());
        assert!(motion.go_home(HomeMode::Xy).await.unwrap());
        assert_eq!(stage.state().pos, Position::new(0.0, 0.0, 10.0));

        assert!(!motion.go_home_named("w").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_home_then_go_home() {
        let stage = create_test_stage();
        let motion = stage.motion();
        let mut homes = stage.store().subscribe_to(&[Topic::HomeSet]);
        assert!(motion.move_absolute(5.0, 6.0, 7.0).await.unwrap());
        assert!(motion.set_home(HomeMode::Xyz));
        assert!(matches!(
            homes.try_recv(),
            Some(StageEvent::HomeSet { mode: HomeMode::Xyz, .. })
        ));

        assert!(motion.move_absolute(-50.0, -50.0, 0.0).await.unwrap());
        assert!(motion.go_home(HomeMode::Xyz).await.unwrap());
        assert_eq!(stage.state().pos, Position::new(5.0, 6.0, 7.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delegated_move_has_no_animation() {
        let hw = Arc::new(LoopbackHardware::new());
        let stage = create_test_stage().with_hardware(hw.clone());
        let mut changes = stage.store().subscribe_to(&[Topic::StateChanged]);

        assert!(stage.motion().move_absolute(40.0, -40.0, 2.0).await.unwrap());
        assert_eq!(hw.position(), Position::new(40.0, -40.0, 2.0));
        assert_eq!(hw.stats().moves, 1);
        assert_eq!(stage.state().pos, Position::new(40.0, -40.0, 2.0));
        assert_eq!(stage.state().history.xyz().len(), 1);

        let intermediate = changes.drain().into_iter().any(|e| match e {
            StageEvent::StateChanged { new, .. } => new.is_moving && new.pos != Position::ORIGIN,
            _ => false,
        });
        assert!(!intermediate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_rejection_is_an_error() {
        let hw = Arc::new(LoopbackHardware::new());
        hw.set_reject_moves(true);
        let stage = create_test_stage().with_hardware(hw.clone());

        let result = stage.motion().move_absolute(10.0, 0.0, 0.0).await;
        assert!(matches!(
            result,
            Err(StageError::Hardware(HardwareError::MoveRejected { .. }))
        ));
        let state = stage.state();
        assert_eq!(state.pos, Position::ORIGIN);
        assert!(!state.is_moving);
        assert!(state.history.xyz().is_empty());
        assert!(!stage.motion().is_moving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_failure_propagates() {
        let hw = Arc::new(LoopbackHardware::new());
        hw.set_fail_moves(true);
        let stage = create_test_stage().with_hardware(hw);
        let result = stage.motion().move_relative(1.0, 1.0, 0.0).await;
        assert!(matches!(result, Err(StageError::Hardware(HardwareError::Other(_)))));
        assert!(stage.state().history.xyz().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_hardware_falls_back_to_simulation() {
        let hw = Arc::new(LoopbackHardware::new());
        hw.set_connected(false);
        let stage = create_test_stage().with_hardware(hw.clone());
        assert!(stage.motion().move_absolute(10.0, 0.0, 0.0).await.unwrap());
        assert_eq!(hw.stats().moves, 0);
        assert_eq!(stage.state().pos, Position::new(10.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_homing_for_xyz() {
        let hw = Arc::new(LoopbackHardware::new());
        let stage = create_test_stage().with_hardware(hw.clone());
        assert!(stage.motion().move_absolute(10.0, 10.0, 10.0).await.unwrap());
        assert!(stage.motion().go_home(HomeMode::Xyz).await.unwrap());
        assert_eq!(hw.stats().homes, 1);
        assert_eq!(stage.state().pos, Position::ORIGIN);

        hw.set_fail_moves(true);
        assert!(!stage.motion().go_home(HomeMode::Xyz).await.unwrap());
        assert!(!stage.state().is_moving);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_signals_hardware() {
        let hw = Arc::new(LoopbackHardware::with_latency(Duration::from_secs(2)));
        let stage = create_test_stage().with_hardware(hw.clone());
        let motion = stage.motion();

        motion.queue(MoveRequest::Absolute(Position::new(10.0, 0.0, 0.0)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        motion.emergency_stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(hw.stats().emergency_stops, 1);
        assert!(!motion.is_moving());
        assert_eq!(stage.state().pos, Position::ORIGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_returns_to_start() {
        let stage = create_test_stage();
        let points = [
            PatternPoint { x: 10.0, y: 0.0, z: None },
            PatternPoint { x: 10.0, y: 10.0, z: None },
            PatternPoint { x: 0.0, y: 10.0, z: Some(3.0) },
        ];
        let options = PatternOptions {
            pause_between: Duration::from_millis(100),
            return_to_start: true,
        };
        assert!(stage.motion().execute_pattern(&points, options).await.unwrap());
        let state = stage.state();
        assert_eq!(state.pos, Position::ORIGIN);
        assert_eq!(state.history.xyz().len(), 4);
        assert_eq!(state.history.xyz()[2].z, 3.0);

        assert!(!stage.motion().execute_pattern(&[], options).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_speed_publishes_clamped_value() {
        let stage = create_test_stage();
        let mut speed = stage.store().subscribe_to(&[Topic::SpeedChanged]);
        stage.motion().set_speed(2500.0);
        assert!(matches!(speed.try_recv(), Some(StageEvent::SpeedChanged(s)) if s == 1000.0));
    }
}
