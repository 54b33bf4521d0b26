//! In-process storage backend
//!
//! Keeps sessions and reports behind a single `RwLock`, which makes every
//! operation trivially atomic. Used by the test-suite and when the service
//! runs with `STORAGE_BACKEND=memory`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use tokio::sync::RwLock;
use tracing::warn;

use super::{Binding, LocationLedger, SessionStore};
use crate::model::{
    DriverId, DriverPosition, LocationReport, Principal, SessionView, display_name_or_default,
};

#[derive(Debug, Clone)]
struct SessionRow {
    seq: u64,
    driver_id: DriverId,
    reporting_principal: Option<Principal>,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
    is_active: bool,
}

impl SessionRow {
    fn view(&self) -> SessionView {
        SessionView {
            driver_id: self.driver_id.clone(),
            reporting_principal: self.reporting_principal.clone(),
            display_name: display_name_or_default(self.display_name.clone()),
            created_at: self.created_at,
            is_active: self.is_active,
        }
    }

    /// Most recently created first; insertion order breaks timestamp ties.
    fn newest_first(a: &SessionRow, b: &SessionRow) -> Ordering {
        b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<DriverId, SessionRow>,
    reports: Vec<LocationReport>,
    next_seq: u64,
    next_report_id: i64,
}

impl MemoryState {
    fn latest_for(&self, driver_id: &DriverId) -> Option<&LocationReport> {
        self.reports
            .iter()
            .filter(|r| &r.driver_id == driver_id)
            .max_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.id.cmp(&b.id)))
    }
}

/// Storage backend living entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports ever appended for `driver_id`.
    pub async fn report_count(&self, driver_id: &DriverId) -> usize {
        let state = self.state.read().await;
        state
            .reports
            .iter()
            .filter(|r| &r.driver_id == driver_id)
            .count()
    }

    /// Number of session rows, active or not.
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, driver_id: &DriverId) -> DatabaseResult<()> {
        let mut state = self.state.write().await;
        state.next_seq += 1;
        let seq = state.next_seq;

        match state.sessions.get_mut(driver_id) {
            Some(row) => {
                row.reporting_principal = None;
                row.display_name = None;
                row.is_active = true;
            }
            None => {
                state.sessions.insert(
                    driver_id.clone(),
                    SessionRow {
                        seq,
                        driver_id: driver_id.clone(),
                        reporting_principal: None,
                        display_name: None,
                        created_at: Utc::now(),
                        is_active: true,
                    },
                );
            }
        }

        Ok(())
    }

    async fn bind_principal(
        &self,
        driver_id: &DriverId,
        principal: &Principal,
        display_name: Option<&str>,
    ) -> DatabaseResult<Binding> {
        let mut state = self.state.write().await;

        let displaced = match state.sessions.get(driver_id) {
            Some(row) if row.is_active => row
                .reporting_principal
                .clone()
                .filter(|previous| previous != principal),
            _ => return Ok(Binding::Refused),
        };
        if let Some(previous) = &displaced {
            warn!(
                "Driver {} rebound from principal {} to {}",
                driver_id, previous, principal
            );
        }

        for row in state.sessions.values_mut() {
            if row.is_active
                && &row.driver_id != driver_id
                && row.reporting_principal.as_ref() == Some(principal)
            {
                row.is_active = false;
            }
        }

        if let Some(row) = state.sessions.get_mut(driver_id) {
            row.reporting_principal = Some(principal.clone());
            row.display_name = display_name.map(str::to_string);
            row.is_active = true;
        }

        Ok(Binding::Bound { displaced })
    }

    async fn lookup_by_principal(
        &self,
        principal: &Principal,
    ) -> DatabaseResult<Option<SessionView>> {
        let state = self.state.read().await;
        let row = state
            .sessions
            .values()
            .filter(|row| row.is_active && row.reporting_principal.as_ref() == Some(principal))
            .min_by(|a, b| SessionRow::newest_first(a, b));

        Ok(row.map(SessionRow::view))
    }

    async fn find(&self, driver_id: &DriverId) -> DatabaseResult<Option<SessionView>> {
        let state = self.state.read().await;
        Ok(state.sessions.get(driver_id).map(SessionRow::view))
    }

    async fn deactivate(&self, driver_id: &DriverId) -> DatabaseResult<bool> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(driver_id) {
            Some(row) if row.is_active => {
                row.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active(&self) -> DatabaseResult<Vec<SessionView>> {
        let state = self.state.read().await;
        let mut rows: Vec<&SessionRow> = state.sessions.values().filter(|r| r.is_active).collect();
        rows.sort_by(|a, b| SessionRow::newest_first(a, b));
        Ok(rows.into_iter().map(SessionRow::view).collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[async_trait]
impl LocationLedger for MemoryStore {
    async fn append(
        &self,
        driver_id: &DriverId,
        latitude: f64,
        longitude: f64,
        recorded_at: Option<DateTime<Utc>>,
    ) -> DatabaseResult<LocationReport> {
        let mut state = self.state.write().await;
        state.next_report_id += 1;

        let report = LocationReport {
            id: state.next_report_id,
            driver_id: driver_id.clone(),
            latitude,
            longitude,
            recorded_at: recorded_at.unwrap_or_else(Utc::now),
        };
        state.reports.push(report.clone());

        Ok(report)
    }

    async fn latest_for(&self, driver_id: &DriverId) -> DatabaseResult<Option<LocationReport>> {
        let state = self.state.read().await;
        Ok(state.latest_for(driver_id).cloned())
    }

    async fn latest_for_all_active(&self) -> DatabaseResult<Vec<DriverPosition>> {
        let state = self.state.read().await;

        let mut joined: Vec<(&SessionRow, Option<&LocationReport>)> = state
            .sessions
            .values()
            .filter(|row| row.is_active)
            .map(|row| (row, state.latest_for(&row.driver_id)))
            .collect();

        joined.sort_by(|(row_a, report_a), (row_b, report_b)| match (report_a, report_b) {
            (Some(a), Some(b)) => b
                .recorded_at
                .cmp(&a.recorded_at)
                .then(b.id.cmp(&a.id)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => SessionRow::newest_first(row_a, row_b),
        });

        Ok(joined
            .into_iter()
            .map(|(row, report)| DriverPosition {
                driver_id: row.driver_id.clone(),
                display_name: display_name_or_default(row.display_name.clone()),
                latitude: report.map(|r| r.latitude),
                longitude: report.map(|r| r.longitude),
                last_update: report.map(|r| r.recorded_at),
            })
            .collect())
    }
}
