use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use distance_tracker::background::{BackgroundTaskConfig, TokioBackgroundScheduler};
use distance_tracker::config::{LocationSource, PermissionPolicy, TrackerConfig};
use distance_tracker::control::{self, ControlState};
use distance_tracker::geo::{Coordinate, REFERENCE_POINT};
use distance_tracker::lifecycle::{LifecycleEvents, LifecycleState, LifecycleTracker};
use distance_tracker::location::PositionOptions;
use distance_tracker::reporter::DEFAULT_COLLECTOR_URL;
use distance_tracker::tracker::{run_headless_task, DistanceTracker};
use distance_tracker::{PermissionState, Scheduler};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "distance_tracker")]
#[command(about = "Periodically reports the device's distance from a reference point", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Collector endpoint receiving distance reports
    #[arg(long, env = "DISTANCE_TRACKER_COLLECTOR_URL", default_value = DEFAULT_COLLECTOR_URL)]
    collector_url: String,

    /// Reference latitude (degrees)
    #[arg(long, allow_hyphen_values = true, default_value_t = REFERENCE_POINT.latitude)]
    reference_lat: f64,

    /// Reference longitude (degrees)
    #[arg(long, allow_hyphen_values = true, default_value_t = REFERENCE_POINT.longitude)]
    reference_lon: f64,

    /// Foreground sampling interval in milliseconds
    #[arg(long, default_value_t = 10_000)]
    interval_ms: u64,

    /// Background task interval in minutes (minimum 15)
    #[arg(long, default_value_t = 15)]
    background_interval_min: u64,

    /// Prefer GPS over network positioning
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    high_accuracy: bool,

    /// Position fix timeout in milliseconds
    #[arg(long, default_value_t = 15_000)]
    timeout_ms: u64,

    /// Accept cached fixes up to this age in milliseconds
    #[arg(long, default_value_t = 10_000)]
    maximum_age_ms: u64,

    #[arg(long, value_enum, env = "DISTANCE_TRACKER_LOCATION", default_value = "termux")]
    location: LocationSource,

    #[arg(long, value_enum, env = "DISTANCE_TRACKER_PERMISSION", default_value = "prompt")]
    permission: PermissionPolicy,

    /// Write a live status JSON snapshot here after every cycle
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Serve the local control endpoint on this port
    #[arg(long)]
    control_port: Option<u16>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Foreground session: timer, background task and lifecycle listener
    Run,
    /// Sample and report once, then exit
    Sample,
    /// Background run launched by the OS scheduler without a foreground session
    Headless {
        #[arg(long, default_value = "headless")]
        task_id: String,
    },
}

impl Args {
    fn to_config(&self) -> TrackerConfig {
        TrackerConfig {
            collector_url: self.collector_url.clone(),
            reference: Coordinate {
                latitude: self.reference_lat,
                longitude: self.reference_lon,
            },
            interval_ms: self.interval_ms,
            background: BackgroundTaskConfig {
                minimum_interval_minutes: self.background_interval_min,
                ..BackgroundTaskConfig::default()
            },
            position: PositionOptions {
                enable_high_accuracy: self.high_accuracy,
                timeout_ms: self.timeout_ms,
                maximum_age_ms: self.maximum_age_ms,
            },
            location_source: self.location,
            permission: self.permission,
            status_file: self.status_file.clone(),
            control_port: self.control_port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.to_config();
    config.validate().context("invalid configuration")?;

    match args.command.clone().unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Sample => sample_once(config).await,
        Command::Headless { task_id } => {
            run_headless_task(&config, &task_id).await;
            Ok(())
        }
    }
}

async fn run(config: TrackerConfig) -> Result<()> {
    info!("Distance tracker starting");
    info!("  Collector: {}", config.collector_url);
    info!(
        "  Reference: {}, {}",
        config.reference.latitude, config.reference.longitude
    );
    info!("  Interval: {} ms", config.interval_ms);

    let tracker = DistanceTracker::from_config(&config, LifecycleTracker::new(LifecycleState::Active));
    let lifecycle_events = LifecycleEvents::new();

    if tracker.ensure_permission().await == PermissionState::Granted {
        tracker.sample_now().await;
    } else {
        warn!("Location permission not granted; scheduled samples will be skipped until it is");
    }

    let mut scheduler = Scheduler::new(
        tracker.clone(),
        Arc::new(TokioBackgroundScheduler::new()),
        Arc::new(lifecycle_events.clone()),
        Duration::from_millis(config.interval_ms),
        config.background.clone(),
    );
    scheduler.start()?;

    if let Some(port) = config.control_port {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to bind control port {}", port))?;
        let state = ControlState {
            tracker: tracker.clone(),
            lifecycle_events: lifecycle_events.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = control::serve(listener, state).await {
                error!("[CONTROL] server error: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Shutting down");
    scheduler.stop()?;

    if let Some(distance) = tracker.sampler().display_distance() {
        info!("Last distance: {} m", distance);
    }
    Ok(())
}

async fn sample_once(config: TrackerConfig) -> Result<()> {
    let tracker = DistanceTracker::from_config(&config, LifecycleTracker::new(LifecycleState::Active));
    if tracker.ensure_permission().await != PermissionState::Granted {
        warn!("Location permission denied");
        return Ok(());
    }
    if let Some(delivery) = tracker.sample_now().await {
        delivery.await.context("delivery task failed")?;
    }
    Ok(())
}
