//! Durable storage for driver sessions and location reports
//!
//! Two seams: [`SessionStore`] owns the identity records and their
//! active/bound state, [`LocationLedger`] owns the append-only reports.
//! Both are implemented by [`PgStore`] for production and by
//! [`MemoryStore`] for tests and database-less runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;

use crate::model::{DriverId, DriverPosition, LocationReport, Principal, SessionView};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of binding a principal to a driver session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// The principal now reports for the driver. `displaced` held the
    /// session until this bind, if it was another principal.
    Bound { displaced: Option<Principal> },
    /// No active session with that id.
    Refused,
}

impl Binding {
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound { .. })
    }
}

/// Identity and session records.
///
/// Every call is atomic on its own; no call holds a lock across calls.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert an active, unbound session. An existing row with the same id is
    /// reset to active and unbound.
    async fn create_session(&self, driver_id: &DriverId) -> DatabaseResult<()>;

    /// Bind `principal` to an existing, still-active session. Any other
    /// active session bound to the same principal is deactivated. The
    /// displaced principal is read under the same lock as the write.
    async fn bind_principal(
        &self,
        driver_id: &DriverId,
        principal: &Principal,
        display_name: Option<&str>,
    ) -> DatabaseResult<Binding>;

    /// The active session bound to `principal`, if any.
    async fn lookup_by_principal(&self, principal: &Principal)
    -> DatabaseResult<Option<SessionView>>;

    /// Look a session up by id regardless of its state.
    async fn find(&self, driver_id: &DriverId) -> DatabaseResult<Option<SessionView>>;

    /// Mark a session inactive. Returns `false` if no active row matched.
    async fn deactivate(&self, driver_id: &DriverId) -> DatabaseResult<bool>;

    /// All active sessions, most recently created first.
    async fn list_active(&self) -> DatabaseResult<Vec<SessionView>>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> bool;
}

/// Append-only coordinate reports.
///
/// Driver ids are not checked against the session store here so history
/// survives identity changes; range validation belongs to the ingestion
/// boundary.
#[async_trait]
pub trait LocationLedger: Send + Sync {
    /// Store one report. `recorded_at` defaults to the insertion time.
    async fn append(
        &self,
        driver_id: &DriverId,
        latitude: f64,
        longitude: f64,
        recorded_at: Option<DateTime<Utc>>,
    ) -> DatabaseResult<LocationReport>;

    /// The report with the greatest `recorded_at`, ties going to the later
    /// insertion.
    async fn latest_for(&self, driver_id: &DriverId) -> DatabaseResult<Option<LocationReport>>;

    /// Every active session with its latest report, freshest first and
    /// sessions without reports last.
    async fn latest_for_all_active(&self) -> DatabaseResult<Vec<DriverPosition>>;
}
