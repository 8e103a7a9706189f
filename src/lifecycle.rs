use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Application lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Foregrounded and receiving input
    Active,
    /// Running without a visible UI
    Background,
    /// Transitioning between the two
    Inactive,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Background => write!(f, "background"),
            LifecycleState::Inactive => write!(f, "inactive"),
        }
    }
}

/// Holds the current lifecycle state.
///
/// Single writer: only the lifecycle listener calls `apply`. Everyone else
/// reads through `current`, which always returns the latest applied value.
#[derive(Clone)]
pub struct LifecycleTracker {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl LifecycleTracker {
    pub fn new(initial: LifecycleState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        LifecycleTracker {
            state: Arc::new(tx),
        }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn apply(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("[Lifecycle] {} -> {}", previous, next);
        }
    }

    /// Receiver notified on every transition
    pub fn watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new(LifecycleState::Active)
    }
}

/// Platform lifecycle capability: a stream of state-change notifications
pub trait LifecycleSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleState>;
}

/// In-process lifecycle notification bus.
///
/// Whatever observes the host application (control endpoint, signal
/// handler, tests) publishes here.
#[derive(Clone)]
pub struct LifecycleEvents {
    tx: broadcast::Sender<LifecycleState>,
}

impl LifecycleEvents {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        LifecycleEvents { tx }
    }

    /// Returns the number of active subscribers that received the event
    pub fn publish(&self, state: LifecycleState) -> usize {
        self.tx.send(state).unwrap_or(0)
    }
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSource for LifecycleEvents {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleState> {
        self.tx.subscribe()
    }
}

/// Active lifecycle listener. Dropping the receiver unsubscribes.
pub struct LifecycleSubscription {
    handle: JoinHandle<()>,
}

impl LifecycleSubscription {
    /// Forward every notification from `source` into `tracker`
    pub fn listen(source: &dyn LifecycleSource, tracker: LifecycleTracker) -> Self {
        let mut rx = source.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(state) => tracker.apply(state),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("[Lifecycle] listener skipped {} stale transitions", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        LifecycleSubscription { handle }
    }

    pub fn remove(self) {
        self.handle.abort();
    }
}
