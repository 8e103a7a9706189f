use crate::background::{BackgroundHandler, BackgroundScheduler, BackgroundTaskConfig, TaskId};
use crate::error::{TrackerError, TrackerResult};
use crate::lifecycle::{LifecycleSource, LifecycleSubscription};
use crate::tracker::DistanceTracker;
use futures::FutureExt;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Scheduler state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Registrations owned while running; released once by `stop`
pub struct SchedulerHandle {
    timer: JoinHandle<()>,
    lifecycle: LifecycleSubscription,
}

impl SchedulerHandle {
    fn release(self) {
        self.lifecycle.remove();
        self.timer.abort();
    }
}

/// Drives sampling from the interval timer, the OS background task and
/// lifecycle notifications.
pub struct Scheduler {
    tracker: DistanceTracker,
    background: Arc<dyn BackgroundScheduler>,
    lifecycle_source: Arc<dyn LifecycleSource>,
    interval: Duration,
    background_config: BackgroundTaskConfig,
    handle: Option<SchedulerHandle>,
}

impl Scheduler {
    pub fn new(
        tracker: DistanceTracker,
        background: Arc<dyn BackgroundScheduler>,
        lifecycle_source: Arc<dyn LifecycleSource>,
        interval: Duration,
        background_config: BackgroundTaskConfig,
    ) -> Self {
        Scheduler {
            tracker,
            background,
            lifecycle_source,
            interval,
            background_config,
            handle: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.handle.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// STOPPED → RUNNING. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> TrackerResult<()> {
        if self.handle.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }

        let timer = spawn_interval_timer(self.tracker.clone(), self.interval);

        let handler = background_handler(self.tracker.clone(), self.background.clone());
        if let Err(e) = self.background.configure(self.background_config.clone(), handler) {
            error!("[BackgroundFetch] configure error: {}", e);
        }

        let lifecycle = LifecycleSubscription::listen(
            self.lifecycle_source.as_ref(),
            self.tracker.lifecycle().clone(),
        );

        info!(
            "Scheduler started: timer every {} ms, background every {} min",
            self.interval.as_millis(),
            self.background_config.minimum_interval_minutes
        );
        self.handle = Some(SchedulerHandle { timer, lifecycle });
        Ok(())
    }

    /// RUNNING → STOPPED. Cancels the timer and the lifecycle listener; the
    /// background task registration is left in place, and samples already in
    /// flight run to completion.
    pub fn stop(&mut self) -> TrackerResult<()> {
        let handle = self.handle.take().ok_or(TrackerError::NotRunning)?;
        handle.release();
        info!("Scheduler stopped");
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }
}

fn spawn_interval_timer(tracker: DistanceTracker, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            // Each tick samples on its own task so a slow fix never holds the timer
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker.sample_now().await;
            });
        }
    })
}

/// Handler for OS background runs: sample once, then always signal completion
pub fn background_handler(
    tracker: DistanceTracker,
    background: Arc<dyn BackgroundScheduler>,
) -> BackgroundHandler {
    Arc::new(move |task_id: TaskId| {
        let tracker = tracker.clone();
        let background = background.clone();
        async move {
            info!("[BackgroundFetch] taskId: {}", task_id);
            if AssertUnwindSafe(tracker.sample_now())
                .catch_unwind()
                .await
                .is_err()
            {
                error!("[BackgroundFetch] sampling panicked in task {}", task_id);
            }
            background.finish(&task_id);
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::TokioBackgroundScheduler;
    use crate::error::TrackerResult;
    use crate::geo::REFERENCE_POINT;
    use crate::lifecycle::{LifecycleEvents, LifecycleState, LifecycleTracker};
    use crate::location::{LocationProvider, PositionFix, PositionOptions};
    use crate::permission::{PermissionGate, PolicyPermissions};
    use crate::reporter::{Reporter, Transport};
    use crate::sampler::PositionSampler;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct CountingLocation {
        calls: AtomicU32,
        panic: bool,
    }

    #[async_trait]
    impl LocationProvider for CountingLocation {
        async fn current_position(&self, _options: &PositionOptions) -> TrackerResult<PositionFix> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("location service crashed");
            }
            Ok(PositionFix {
                coordinate: REFERENCE_POINT,
                captured_at: Utc::now(),
                accuracy: None,
            })
        }
    }

    #[derive(Default)]
    struct NullTransport {
        posts: AtomicU32,
    }

    #[async_trait]
    impl Transport for NullTransport {
        async fn post_json(&self, _url: &str, _body: &serde_json::Value) -> TrackerResult<()> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingBackground {
        handler: Mutex<Option<BackgroundHandler>>,
        finished: Mutex<Vec<String>>,
    }

    impl BackgroundScheduler for RecordingBackground {
        fn configure(&self, _config: BackgroundTaskConfig, handler: BackgroundHandler) -> TrackerResult<()> {
            *self.handler.lock().unwrap() = Some(handler);
            Ok(())
        }

        fn finish(&self, task_id: &str) {
            self.finished.lock().unwrap().push(task_id.to_string());
        }
    }

    struct Fixture {
        location: Arc<CountingLocation>,
        transport: Arc<NullTransport>,
        tracker: DistanceTracker,
    }

    fn fixture(perms: PolicyPermissions, panic: bool) -> Fixture {
        let location = Arc::new(CountingLocation {
            calls: AtomicU32::new(0),
            panic,
        });
        let transport = Arc::new(NullTransport::default());
        let sampler = PositionSampler::new(
            PermissionGate::new(Arc::new(perms)),
            location.clone(),
            REFERENCE_POINT,
            PositionOptions::default(),
            LifecycleTracker::default(),
        );
        let tracker = DistanceTracker::new(sampler, Reporter::new(transport.clone(), "http://collector.test"));
        Fixture {
            location,
            transport,
            tracker,
        }
    }

    fn scheduler(tracker: DistanceTracker, events: &LifecycleEvents) -> Scheduler {
        Scheduler::new(
            tracker,
            Arc::new(TokioBackgroundScheduler::new()),
            Arc::new(events.clone()),
            Duration::from_millis(10_000),
            BackgroundTaskConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_samples_every_interval() {
        let fx = fixture(PolicyPermissions::granted(), false);
        let mut sched = scheduler(fx.tracker.clone(), &LifecycleEvents::new());

        sched.start().unwrap();
        assert_eq!(sched.state(), SchedulerState::Running);

        tokio::time::sleep(Duration::from_millis(35_000)).await;
        assert_eq!(fx.location.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fx.transport.posts.load(Ordering::SeqCst), 3);
        sched.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_timer_sampling() {
        let fx = fixture(PolicyPermissions::granted(), false);
        let mut sched = scheduler(fx.tracker.clone(), &LifecycleEvents::new());

        sched.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(fx.location.calls.load(Ordering::SeqCst), 1);

        sched.stop().unwrap();
        assert_eq!(sched.state(), SchedulerState::Stopped);

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(fx.location.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_twice_rejected() {
        let fx = fixture(PolicyPermissions::granted(), false);
        let mut sched = scheduler(fx.tracker, &LifecycleEvents::new());

        assert_eq!(sched.stop(), Err(TrackerError::NotRunning));
        sched.start().unwrap();
        assert_eq!(sched.start(), Err(TrackerError::AlreadyRunning));
        sched.stop().unwrap();
        assert_eq!(sched.stop(), Err(TrackerError::NotRunning));
        sched.start().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_permission_never_reaches_network() {
        let fx = fixture(PolicyPermissions::denied(), false);
        let mut sched = scheduler(fx.tracker.clone(), &LifecycleEvents::new());

        sched.start().unwrap();
        tokio::time::sleep(Duration::from_millis(45_000)).await;
        sched.stop().unwrap();

        assert_eq!(fx.location.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.transport.posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions_update_state_without_sampling() {
        let fx = fixture(PolicyPermissions::granted(), false);
        let events = LifecycleEvents::new();
        let mut sched = scheduler(fx.tracker.clone(), &events);

        sched.start().unwrap();
        events.publish(LifecycleState::Background);
        let mut rx = fx.tracker.lifecycle().watch();
        rx.wait_for(|s| *s == LifecycleState::Background).await.unwrap();

        assert_eq!(fx.location.calls.load(Ordering::SeqCst), 0);
        let report = fx.tracker.sampler().sample().await.unwrap();
        assert_eq!(report.lifecycle_state, LifecycleState::Background);
        sched.stop().unwrap();
    }

    #[tokio::test]
    async fn test_background_handler_finishes_after_failed_sample() {
        let fx = fixture(PolicyPermissions::denied(), false);
        let background = Arc::new(RecordingBackground::default());
        let handler = background_handler(fx.tracker.clone(), background.clone());

        handler("fetch-1".to_string()).await;
        assert_eq!(*background.finished.lock().unwrap(), vec!["fetch-1".to_string()]);
    }

    #[tokio::test]
    async fn test_background_handler_finishes_after_panic() {
        let fx = fixture(PolicyPermissions::granted(), true);
        let background = Arc::new(RecordingBackground::default());
        let mut sched = Scheduler::new(
            fx.tracker.clone(),
            background.clone(),
            Arc::new(LifecycleEvents::new()),
            Duration::from_secs(10),
            BackgroundTaskConfig::default(),
        );
        sched.start().unwrap();

        let handler = background.handler.lock().unwrap().clone().unwrap();
        handler("fetch-7".to_string()).await;

        assert_eq!(fx.location.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*background.finished.lock().unwrap(), vec!["fetch-7".to_string()]);
        assert_eq!(fx.transport.posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_outlives_stop() {
        let fx = fixture(PolicyPermissions::granted(), false);
        let background = TokioBackgroundScheduler::new();
        let mut sched = Scheduler::new(
            fx.tracker.clone(),
            Arc::new(background.clone()),
            Arc::new(LifecycleEvents::new()),
            Duration::from_secs(3600),
            BackgroundTaskConfig::default(),
        );

        sched.start().unwrap();
        sched.stop().unwrap();

        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        assert_eq!(fx.location.calls.load(Ordering::SeqCst), 1);
        assert_eq!(background.finished_count(), 1);
    }
}
