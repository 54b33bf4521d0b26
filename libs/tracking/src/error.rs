//! Error and outcome types for the tracking core
//!
//! Failures of the storage engine or of the reporting channel are errors.
//! Requests that reference unknown identities or carry garbage coordinates
//! are not: they come back as a [`Rejection`] inside a typed outcome so the
//! adapters can decide what, if anything, the driver gets to see.

use common::error::DatabaseError;
use thiserror::Error;

/// Errors raised by the tracking core
#[derive(Error, Debug)]
pub enum TrackingError {
    /// The underlying storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Type alias for Result with TrackingError
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Errors raised by a reporting channel adapter
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel could not be reached
    #[error("Reporting channel unreachable: {0}")]
    Unreachable(String),

    /// The channel refused the request
    #[error("Reporting channel rejected the request: {0}")]
    Rejected(String),
}

/// Why a request was turned down without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No session matches the referenced driver id.
    Unknown,
    /// The principal has no active binding and tried to report.
    NotRegistered,
    /// The principal has no active binding and tried to stop.
    NotTracking,
    /// Latitude or longitude out of range.
    InvalidCoordinate,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Unknown => "unknown",
            Rejection::NotRegistered => "not_registered",
            Rejection::NotTracking => "not_tracking",
            Rejection::InvalidCoordinate => "invalid_coordinate",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
