use crate::lifecycle::{LifecycleEvents, LifecycleState};
use crate::status::LiveStatus;
use crate::tracker::DistanceTracker;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Shared state behind the control routes
#[derive(Clone)]
pub struct ControlState {
    pub tracker: DistanceTracker,
    pub lifecycle_events: LifecycleEvents,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct SampleResponse {
    pub sampled: bool,
    pub distance: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LifecycleRequest {
    pub state: LifecycleState,
}

/// Local control surface standing in for the app's buttons:
///
/// - `POST /sample` samples immediately
/// - `POST /noop` placeholder action
/// - `GET /status` current live status
/// - `POST /lifecycle` host application state change notification
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/sample", post(sample_handler))
        .route("/noop", post(noop_handler))
        .route("/status", get(status_handler))
        .route("/lifecycle", post(lifecycle_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: ControlState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("[CONTROL] Listening on http://{}", addr);
    }
    axum::serve(listener, router(state)).await
}

async fn sample_handler(State(state): State<ControlState>) -> Json<SampleResponse> {
    let sampled = state.tracker.sample_now().await.is_some();
    Json(SampleResponse {
        sampled,
        distance: state.tracker.sampler().display_distance(),
    })
}

async fn noop_handler() -> StatusCode {
    info!("Second button clicked!");
    StatusCode::NO_CONTENT
}

async fn status_handler(State(state): State<ControlState>) -> Json<LiveStatus> {
    Json(state.tracker.status())
}

async fn lifecycle_handler(
    State(state): State<ControlState>,
    Json(request): Json<LifecycleRequest>,
) -> StatusCode {
    state.lifecycle_events.publish(request.state);
    StatusCode::ACCEPTED
}
