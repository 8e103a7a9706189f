use crate::error::{TrackerError, TrackerResult};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest period the OS will run a periodic background task at
pub const MINIMUM_FETCH_INTERVAL_MINUTES: u64 = 15;

pub type TaskId = String;

/// Invoked once per background run. Must end with `finish(task_id)`.
pub type BackgroundHandler = Arc<dyn Fn(TaskId) -> BoxFuture<'static, ()> + Send + Sync>;

/// Registration options for the periodic background task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTaskConfig {
    pub minimum_interval_minutes: u64,
    /// Keep running after the foreground process exits
    pub stop_on_terminate: bool,
    /// Re-register after device reboot
    pub start_on_boot: bool,
    /// Allow invocation without the foreground process (headless entry point)
    pub headless_enabled: bool,
}

impl Default for BackgroundTaskConfig {
    fn default() -> Self {
        BackgroundTaskConfig {
            minimum_interval_minutes: MINIMUM_FETCH_INTERVAL_MINUTES,
            stop_on_terminate: false,
            start_on_boot: true,
            headless_enabled: true,
        }
    }
}

impl BackgroundTaskConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.minimum_interval_minutes * 60)
    }
}

/// OS-level periodic background execution capability
pub trait BackgroundScheduler: Send + Sync {
    fn configure(&self, config: BackgroundTaskConfig, handler: BackgroundHandler) -> TrackerResult<()>;

    /// Tell the OS the run identified by `task_id` is complete
    fn finish(&self, task_id: &str);
}

#[derive(Default)]
struct RunnerState {
    runner: Option<JoinHandle<()>>,
    pending: HashSet<TaskId>,
    finished: u64,
}

/// In-process stand-in for the OS background fetch service.
///
/// Runs the handler every configured period on a detached tokio task that is
/// not tied to any foreground session. Reboot persistence comes from the OS
/// timer that launches the `headless` entry point, not from this type.
#[derive(Clone, Default)]
pub struct TokioBackgroundScheduler {
    state: Arc<Mutex<RunnerState>>,
}

impl TokioBackgroundScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs started but not yet finished
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn finished_count(&self) -> u64 {
        self.state.lock().map(|s| s.finished).unwrap_or(0)
    }
}

impl BackgroundScheduler for TokioBackgroundScheduler {
    fn configure(&self, config: BackgroundTaskConfig, handler: BackgroundHandler) -> TrackerResult<()> {
        if config.minimum_interval_minutes < MINIMUM_FETCH_INTERVAL_MINUTES {
            return Err(TrackerError::BackgroundTask(format!(
                "minimum interval is {} minutes, got {}",
                MINIMUM_FETCH_INTERVAL_MINUTES, config.minimum_interval_minutes
            )));
        }

        let period = config.period();
        let state = self.state.clone();
        let runner = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut seq = 0u64;
            loop {
                ticker.tick().await;
                seq += 1;
                let task_id = format!("fetch-{}", seq);
                if let Ok(mut s) = state.lock() {
                    s.pending.insert(task_id.clone());
                }
                tokio::spawn(handler(task_id));
            }
        });

        let mut s = self
            .state
            .lock()
            .map_err(|_| TrackerError::BackgroundTask("scheduler state poisoned".to_string()))?;
        if let Some(previous) = s.runner.replace(runner) {
            debug!("[BackgroundFetch] replacing previous registration");
            previous.abort();
        }
        info!(
            "[BackgroundFetch] configured every {} min (stopOnTerminate={}, startOnBoot={}, headless={})",
            config.minimum_interval_minutes,
            config.stop_on_terminate,
            config.start_on_boot,
            config.headless_enabled
        );
        Ok(())
    }

    fn finish(&self, task_id: &str) {
        if let Ok(mut s) = self.state.lock() {
            if s.pending.remove(task_id) {
                s.finished += 1;
            } else {
                warn!("[BackgroundFetch] finish for unknown task {}", task_id);
            }
        }
    }
}
