// src/main.rs - Command line front-end for the stage engine
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use stagetrack::hardware::LoopbackHardware;
use stagetrack::motion::{HomeMode, PatternOptions, PatternPoint};
use stagetrack::{HistoryMode, Stage};
use stagetrack_shared::config::{load_config, save_config, Config};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stage position console
#[derive(Parser, Debug)]
#[command(name = "stagetrack", about = "Position state and motion console for a motorized XYZ stage.")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "stage.toml")]
    config: PathBuf,

    /// Override the state file from the config
    #[arg(long)]
    state: Option<PathBuf>,

    /// Drive moves through a hardware delegate instead of simulating
    #[arg(long, value_enum)]
    hardware: Option<HardwareKind>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HardwareKind {
    Loopback,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show position, locks and history summary
    Status,
    /// Move to an absolute position (Z defaults to the current Z)
    #[command(allow_negative_numbers = true)]
    MoveAbs { x: f64, y: f64, z: Option<f64> },
    /// Move by an offset
    #[command(allow_negative_numbers = true)]
    MoveRel {
        dx: f64,
        dy: f64,
        #[arg(default_value_t = 0.0)]
        dz: f64,
    },
    /// Jog one step (up, down, left, right, upLeft, ..., zUp, zDown)
    Jog {
        direction: String,
        /// Step length in mm instead of the axis sensitivity
        #[arg(short, long)]
        distance: Option<f64>,
    },
    /// Go to a home position
    Home {
        #[arg(value_enum, default_value = "xy")]
        mode: HomeMode,
    },
    /// Store the current position as home
    SetHome {
        #[arg(value_enum, default_value = "xy")]
        mode: HomeMode,
    },
    /// Toggle a lock: X, Y, Z, XY, HomeXY, HomeXYZ
    Lock { axis: String },
    /// Toggle XY lock coupling
    Couple,
    /// Set the move speed in mm/s
    Speed { value: f64 },
    /// History inspection and navigation
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Emergency stop
    Stop,
    /// Visit a list of points given as x,y or x,y,z
    #[command(allow_negative_numbers = true)]
    Pattern {
        #[arg(required = true)]
        points: Vec<PatternPoint>,
        /// Pause between points, milliseconds
        #[arg(long, default_value_t = 1000)]
        pause_ms: u64,
        #[arg(long)]
        return_to_start: bool,
    },
    /// Restore default state, keeping the workspace
    Reset,
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this path
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List the entries of the active view
    List,
    /// Clear both histories and reseed with the current position
    Clear,
    /// Move to entry INDEX of the active view
    Goto { index: usize },
    Prev,
    Next,
    /// Toggle frozen (history) mode
    Freeze,
    /// Toggle between XY and XYZ views
    View,
    /// Distance and timing totals
    Stats,
}

fn load_or_default(path: &PathBuf) -> Result<Config, BoxError> {
    if !path.exists() {
        tracing::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let path_str = path.to_str().ok_or_else(|| format!("Invalid config path: {}", path.display()))?;
    load_config(path_str).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", path.display(), e);
        Box::new(e) as BoxError
    })
}

fn print_status(stage: &Stage) {
    let state = stage.state();
    let status = stage.motion().movement_status();
    let cursor = state.history.cursor();
    println!("Position:  {}", state.pos);
    println!(
        "Workspace: {} x {} x {} mm",
        state.workspace.x, state.workspace.y, state.workspace.z
    );
    println!("Locks:     {}", state.locks);
    println!("Speed:     {:.1} mm/s", state.move_speed);
    println!(
        "Motion:    {:?} (queue {}, e-stop {})",
        status.phase, status.queue_length, status.emergency_stop
    );
    println!(
        "Hardware:  {}",
        if stage.motion().hardware().is_connected() { "connected" } else { "simulated" }
    );
    println!(
        "History:   {} XYZ / {} XY entries, {:?} view, {}",
        state.history.xyz().len(),
        state.history.xy().len(),
        cursor.view_mode,
        match (cursor.mode, cursor.index) {
            (HistoryMode::Frozen, Some(i)) => format!("frozen at {}", i),
            (HistoryMode::Frozen, None) => "frozen".to_string(),
            (HistoryMode::Live, _) => "live".to_string(),
        }
    );
}

fn report(action: &str, done: bool) {
    if done {
        println!("{}: ok", action);
    } else {
        println!("{}: not performed", action);
    }
}

async fn run_history(stage: &Stage, action: HistoryCommand) -> Result<(), BoxError> {
    match action {
        HistoryCommand::List => {
            let cursor = stage.history().cursor();
            for (i, entry) in stage.history().current_history().iter().enumerate() {
                let marker = if cursor.index == Some(i) { ">" } else { " " };
                println!(
                    "{} {:4}  {}  ({:.3}, {:.3}, {:.3})",
                    marker,
                    i,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.x,
                    entry.y,
                    entry.z
                );
            }
        }
        HistoryCommand::Clear => {
            stage.history().clear_history();
            println!("History cleared");
        }
        HistoryCommand::Goto { index } => report("history goto", stage.go_to_history_position(index).await?),
        HistoryCommand::Prev => report("history prev", stage.history_previous().await?),
        HistoryCommand::Next => report("history next", stage.history_next().await?),
        HistoryCommand::Freeze => println!("History mode: {:?}", stage.history().toggle_history_mode()),
        HistoryCommand::View => println!("History view: {:?}", stage.history().toggle_history_view_mode()),
        HistoryCommand::Stats => {
            let stats = stage.history().statistics();
            println!(
                "{} points, {:.2} mm, {:.1} s, {:.2} mm/s",
                stats.point_count,
                stats.total_distance,
                stats.total_time_ms as f64 / 1000.0,
                stats.average_speed
            );
        }
    }
    Ok(())
}

async fn run_command(stage: &Stage, command: Command) -> Result<(), BoxError> {
    let motion = stage.motion();
    match command {
        Command::Status => print_status(stage),
        Command::MoveAbs { x, y, z } => {
            let z = z.unwrap_or(stage.state().pos.z);
            report("move", motion.move_absolute(x, y, z).await?);
        }
        Command::MoveRel { dx, dy, dz } => report("move", motion.move_relative(dx, dy, dz).await?),
        Command::Jog { direction, distance } => {
            report("jog", motion.move_direction_named(&direction, distance).await?)
        }
        Command::Home { mode } => report("home", motion.go_home(mode).await?),
        Command::SetHome { mode } => report("set home", motion.set_home(mode)),
        Command::Lock { axis } => {
            if stage.store().toggle_lock(&axis) {
                println!("Locks: {}", stage.state().locks);
            }
        }
        Command::Couple => println!("Locks: {}", stage.store().toggle_coupling()),
        Command::Speed { value } => {
            motion.set_speed(value);
            println!("Speed: {:.1} mm/s", motion.speed());
        }
        Command::History { action } => run_history(stage, action).await?,
        Command::Stop => {
            motion.emergency_stop();
            println!("Emergency stop sent");
        }
        Command::Pattern {
            points,
            pause_ms,
            return_to_start,
        } => {
            let options = PatternOptions {
                pause_between: Duration::from_millis(pause_ms),
                return_to_start,
            };
            report("pattern", motion.execute_pattern(&points, options).await?);
        }
        Command::Reset => {
            stage.reset();
            println!("State reset");
        }
        Command::Config { write } => {
            print!("{}", toml::to_string_pretty(stage.config())?);
            if let Some(path) = write {
                let path_str = path.to_str().ok_or_else(|| format!("Invalid config path: {}", path.display()))?;
                save_config(path_str, stage.config())?;
                println!("Config written to {}", path.display());
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    let mut config = load_or_default(&cli.config)?;
    if let Some(state) = &cli.state {
        config.persistence.path = state.display().to_string();
    }

    let mut stage = Stage::new(config)?;
    if let Some(HardwareKind::Loopback) = cli.hardware {
        stage = stage.with_hardware(Arc::new(LoopbackHardware::new()));
    }
    stage.restore().await?;

    let result = run_command(&stage, cli.command).await;
    if let Err(e) = &result {
        tracing::error!("Command failed: {}", e);
    }
    stage.shutdown().await?;
    result
}
