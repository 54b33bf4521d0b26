//! Application state shared across handlers

use tracking::{Broadcaster, DashboardQuery, TrackingSessionManager};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: TrackingSessionManager,
    pub query: DashboardQuery,
    pub broadcaster: Broadcaster,
}
