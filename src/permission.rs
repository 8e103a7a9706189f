use crate::error::TrackerResult;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Location permission states reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// User has not answered yet
    Undetermined,
    Granted,
    Denied,
}

/// Location-access variants a platform may distinguish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    /// Access only while the app is in the foreground
    Foreground,
    /// Access while backgrounded as well ("always allow")
    Always,
}

/// Platform permission capability.
///
/// Platforms without a separate background variant map `Always` onto
/// whatever fine-location permission they offer.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check(&self, kind: PermissionKind) -> TrackerResult<PermissionState>;
    async fn request(&self, kind: PermissionKind) -> TrackerResult<PermissionState>;
}

/// Gates every sampling attempt on location permission
#[derive(Clone)]
pub struct PermissionGate {
    provider: Arc<dyn PermissionProvider>,
    kind: PermissionKind,
}

impl PermissionGate {
    /// Gate asking for background-capable access, since sampling continues
    /// while the app is backgrounded
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Self {
        PermissionGate {
            provider,
            kind: PermissionKind::Always,
        }
    }

    /// Check the current state and request access if it is not granted yet.
    ///
    /// `Denied` is a normal outcome. Provider failures are logged and reported
    /// as `Undetermined` so callers skip sampling.
    pub async fn ensure_location_permission(&self) -> PermissionState {
        let state = match self.provider.check(self.kind).await {
            Ok(PermissionState::Granted) => return PermissionState::Granted,
            Ok(_) => self.provider.request(self.kind).await,
            Err(e) => Err(e),
        };

        match state {
            Ok(PermissionState::Granted) => {
                info!("Location permission granted ({:?})", self.kind);
                PermissionState::Granted
            }
            Ok(other) => {
                info!("Location permission denied");
                other
            }
            Err(e) => {
                warn!("Error requesting location permission: {}", e);
                PermissionState::Undetermined
            }
        }
    }

    /// Re-check without prompting. Permission can be revoked externally, so
    /// this runs before every sample.
    pub async fn current(&self) -> PermissionState {
        match self.provider.check(self.kind).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "[{}] Permission check failed: {}",
                    crate::iso_timestamp(Utc::now()),
                    e
                );
                PermissionState::Undetermined
            }
        }
    }
}

/// Permission provider driven by a fixed policy.
///
/// `check` returns the stored state; `request` resolves an undetermined
/// state to the configured answer. `set` models the user changing the
/// setting outside the app.
#[derive(Clone)]
pub struct PolicyPermissions {
    state: Arc<RwLock<PermissionState>>,
    answer: PermissionState,
}

impl PolicyPermissions {
    pub fn new(initial: PermissionState, answer: PermissionState) -> Self {
        PolicyPermissions {
            state: Arc::new(RwLock::new(initial)),
            answer,
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionState::Granted, PermissionState::Granted)
    }

    pub fn denied() -> Self {
        Self::new(PermissionState::Denied, PermissionState::Denied)
    }

    /// Starts undetermined; the first request is approved
    pub fn prompt() -> Self {
        Self::new(PermissionState::Undetermined, PermissionState::Granted)
    }

    pub fn set(&self, state: PermissionState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn get(&self) -> PermissionState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PermissionProvider for PolicyPermissions {
    async fn check(&self, _kind: PermissionKind) -> TrackerResult<PermissionState> {
        Ok(self.get())
    }

    async fn request(&self, _kind: PermissionKind) -> TrackerResult<PermissionState> {
        let current = self.get();
        if current == PermissionState::Undetermined {
            self.set(self.answer);
            return Ok(self.answer);
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct CountingProvider {
        inner: PolicyPermissions,
        requests: AtomicU32,
        kinds: Mutex<Vec<PermissionKind>>,
    }

    #[async_trait]
    impl PermissionProvider for CountingProvider {
        async fn check(&self, kind: PermissionKind) -> TrackerResult<PermissionState> {
            self.kinds.lock().unwrap().push(kind);
            self.inner.check(kind).await
        }

        async fn request(&self, kind: PermissionKind) -> TrackerResult<PermissionState> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.inner.request(kind).await
        }
    }

    fn counting(inner: PolicyPermissions) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            inner,
            requests: AtomicU32::new(0),
            kinds: Mutex::new(Vec::new()),
        })
    }

    struct FailingProvider;

    #[async_trait]
    impl PermissionProvider for FailingProvider {
        async fn check(&self, _kind: PermissionKind) -> TrackerResult<PermissionState> {
            Err(TrackerError::PositionUnavailable("no permission service".into()))
        }

        async fn request(&self, _kind: PermissionKind) -> TrackerResult<PermissionState> {
            unreachable!("request must not follow a failed check")
        }
    }

    #[tokio::test]
    async fn test_granted_skips_request() {
        let provider = counting(PolicyPermissions::granted());
        let gate = PermissionGate::new(provider.clone());

        assert_eq!(gate.ensure_location_permission().await, PermissionState::Granted);
        assert_eq!(provider.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undetermined_requests_always_variant() {
        let provider = counting(PolicyPermissions::prompt());
        let gate = PermissionGate::new(provider.clone());

        assert_eq!(gate.ensure_location_permission().await, PermissionState::Granted);
        assert_eq!(provider.requests.load(Ordering::SeqCst), 1);
        assert_eq!(provider.kinds.lock().unwrap()[0], PermissionKind::Always);
        assert_eq!(gate.current().await, PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_denied_is_returned_not_raised() {
        let provider = counting(PolicyPermissions::denied());
        let gate = PermissionGate::new(provider.clone());

        assert_eq!(gate.ensure_location_permission().await, PermissionState::Denied);
        assert_eq!(provider.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_granted() {
        let gate = PermissionGate::new(Arc::new(FailingProvider));
        assert_eq!(
            gate.ensure_location_permission().await,
            PermissionState::Undetermined
        );
        assert_eq!(gate.current().await, PermissionState::Undetermined);
    }

    #[tokio::test]
    async fn test_external_revocation_is_observed() {
        let perms = PolicyPermissions::granted();
        let gate = PermissionGate::new(Arc::new(perms.clone()));
        assert_eq!(gate.current().await, PermissionState::Granted);

        perms.set(PermissionState::Denied);
        assert_eq!(gate.current().await, PermissionState::Denied);
    }
}
