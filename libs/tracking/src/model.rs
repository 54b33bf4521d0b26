//! Driver session and location report models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label used when a session has no display name yet.
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

/// Opaque, never-reused identity of a driver session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(String);

impl DriverId {
    /// Mint a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DriverId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DriverId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the account pushing locations through the reporting channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Principal {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Principal {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for Principal {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read view of a driver session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub driver_id: DriverId,
    pub reporting_principal: Option<Principal>,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl SessionView {
    /// Whether a reporting principal has claimed this session.
    pub fn is_bound(&self) -> bool {
        self.reporting_principal.is_some()
    }
}

/// Normalise an optional stored display name.
pub fn display_name_or_default(name: Option<String>) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name,
        _ => UNKNOWN_DISPLAY_NAME.to_string(),
    }
}

/// One immutable coordinate sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    /// Surrogate id, increasing with insertion order.
    #[serde(skip_serializing)]
    pub id: i64,
    pub driver_id: DriverId,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
}

/// An active session joined with its latest report, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverPosition {
    pub driver_id: DriverId,
    pub display_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl DriverPosition {
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Coordinates carried by a live update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// A live update pushed to dashboard observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEvent {
    pub driver_id: DriverId,
    pub location: EventLocation,
}

impl From<&LocationReport> for LocationEvent {
    fn from(report: &LocationReport) -> Self {
        Self {
            driver_id: report.driver_id.clone(),
            location: EventLocation {
                latitude: report.latitude,
                longitude: report.longitude,
                timestamp: report.recorded_at,
            },
        }
    }
}
