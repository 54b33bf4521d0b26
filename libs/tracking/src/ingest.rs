//! Ingestion of coordinate reports from the reporting channel.
//!
//! Resolve the principal, validate the coordinates, append to the ledger,
//! then publish. Publishing happens only after the append succeeded and
//! its result never affects the outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::broadcaster::Broadcaster;
use crate::error::{Rejection, TrackingResult};
use crate::model::{LocationEvent, LocationReport, Principal};
use crate::store::{LocationLedger, SessionStore};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted(LocationReport),
    Rejected(Rejection),
}

/// Whether a latitude/longitude pair is a usable WGS84 position.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

#[derive(Clone)]
pub struct IngestionPipeline {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn LocationLedger>,
    broadcaster: Broadcaster,
}

impl IngestionPipeline {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn LocationLedger>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            sessions,
            ledger,
            broadcaster,
        }
    }

    /// Record one report from `principal`.
    ///
    /// `observed_at` becomes the report timestamp when the source supplies
    /// one; otherwise the ledger assigns the insertion time.
    pub async fn ingest(
        &self,
        principal: &Principal,
        latitude: f64,
        longitude: f64,
        observed_at: Option<DateTime<Utc>>,
    ) -> TrackingResult<IngestOutcome> {
        let Some(session) = self.sessions.lookup_by_principal(principal).await? else {
            debug!("Location from unregistered principal {} dropped", principal);
            return Ok(IngestOutcome::Rejected(Rejection::NotRegistered));
        };

        if !is_valid_coordinate(latitude, longitude) {
            warn!(
                "Invalid coordinate ({}, {}) from principal {} for driver {} dropped",
                latitude, longitude, principal, session.driver_id
            );
            return Ok(IngestOutcome::Rejected(Rejection::InvalidCoordinate));
        }

        let report = self
            .ledger
            .append(&session.driver_id, latitude, longitude, observed_at)
            .await?;

        let observers = self.broadcaster.publish(LocationEvent::from(&report));
        debug!(
            "Stored location for driver {} and pushed it to {} observers",
            report.driver_id, observers
        );

        Ok(IngestOutcome::Accepted(report))
    }
}
