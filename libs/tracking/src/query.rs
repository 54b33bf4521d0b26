//! Point-in-time snapshots for dashboards that pull instead of subscribing,
//! and for observers resynchronising after a reconnect.

use std::sync::Arc;

use crate::error::TrackingResult;
use crate::model::{DriverId, DriverPosition, LocationReport};
use crate::store::{LocationLedger, SessionStore};

#[derive(Clone)]
pub struct DashboardQuery {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn LocationLedger>,
}

impl DashboardQuery {
    pub fn new(sessions: Arc<dyn SessionStore>, ledger: Arc<dyn LocationLedger>) -> Self {
        Self { sessions, ledger }
    }

    /// Latest report of one driver, whether or not the session is active.
    pub async fn latest_for(&self, driver_id: &DriverId) -> TrackingResult<Option<LocationReport>> {
        Ok(self.ledger.latest_for(driver_id).await?)
    }

    /// Every active driver with its latest position.
    pub async fn all_active(&self) -> TrackingResult<Vec<DriverPosition>> {
        Ok(self.ledger.latest_for_all_active().await?)
    }

    pub async fn storage_reachable(&self) -> bool {
        self.sessions.ping().await
    }
}
