//! PostgreSQL storage backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use super::{Binding, LocationLedger, SessionStore};
use crate::model::{
    DriverId, DriverPosition, LocationReport, Principal, SessionView, display_name_or_default,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS drivers (
        id BIGSERIAL PRIMARY KEY,
        driver_id TEXT UNIQUE NOT NULL,
        reporting_principal TEXT,
        display_name TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        is_active BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        id BIGSERIAL PRIMARY KEY,
        driver_id TEXT NOT NULL,
        latitude DOUBLE PRECISION NOT NULL,
        longitude DOUBLE PRECISION NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_locations_driver_id ON locations (driver_id)",
    "CREATE INDEX IF NOT EXISTS idx_locations_recorded_at ON locations (recorded_at)",
    "CREATE INDEX IF NOT EXISTS idx_drivers_principal ON drivers (reporting_principal) WHERE is_active",
];

const UPSERT_SESSION: &str = r#"
INSERT INTO drivers (driver_id, is_active)
VALUES ($1, TRUE)
ON CONFLICT (driver_id) DO UPDATE
SET reporting_principal = NULL,
    display_name = NULL,
    is_active = TRUE
"#;

const LOCK_SESSION: &str = r#"
SELECT reporting_principal, is_active FROM drivers WHERE driver_id = $1 FOR UPDATE
"#;

const SUPERSEDE_PRINCIPAL: &str = r#"
UPDATE drivers
SET is_active = FALSE
WHERE reporting_principal = $1 AND driver_id <> $2 AND is_active = TRUE
"#;

const BIND_PRINCIPAL: &str = r#"
UPDATE drivers
SET reporting_principal = $2,
    display_name = $3,
    is_active = TRUE
WHERE driver_id = $1
"#;

const SELECT_BY_PRINCIPAL: &str = r#"
SELECT driver_id, reporting_principal, display_name, created_at, is_active
FROM drivers
WHERE reporting_principal = $1 AND is_active = TRUE
ORDER BY created_at DESC, id DESC
LIMIT 1
"#;

const SELECT_BY_ID: &str = r#"
SELECT driver_id, reporting_principal, display_name, created_at, is_active
FROM drivers
WHERE driver_id = $1
"#;

const DEACTIVATE: &str = r#"
UPDATE drivers SET is_active = FALSE WHERE driver_id = $1 AND is_active = TRUE
"#;

const SELECT_ACTIVE: &str = r#"
SELECT driver_id, reporting_principal, display_name, created_at, is_active
FROM drivers
WHERE is_active = TRUE
ORDER BY created_at DESC, id DESC
"#;

const INSERT_LOCATION: &str = r#"
INSERT INTO locations (driver_id, latitude, longitude, recorded_at)
VALUES ($1, $2, $3, COALESCE($4, NOW()))
RETURNING id, driver_id, latitude, longitude, recorded_at
"#;

const SELECT_LATEST_LOCATION: &str = r#"
SELECT id, driver_id, latitude, longitude, recorded_at
FROM locations
WHERE driver_id = $1
ORDER BY recorded_at DESC, id DESC
LIMIT 1
"#;

const SELECT_ACTIVE_WITH_LOCATIONS: &str = r#"
SELECT d.driver_id, d.display_name, l.latitude, l.longitude, l.recorded_at
FROM drivers d
LEFT JOIN LATERAL (
    SELECT id, latitude, longitude, recorded_at
    FROM locations
    WHERE locations.driver_id = d.driver_id
    ORDER BY recorded_at DESC, id DESC
    LIMIT 1
) l ON TRUE
WHERE d.is_active = TRUE
ORDER BY l.recorded_at DESC NULLS LAST, l.id DESC NULLS LAST, d.created_at DESC
"#;

fn session_from_row(row: &PgRow) -> Result<SessionView, sqlx::Error> {
    Ok(SessionView {
        driver_id: DriverId::from(row.try_get::<String, _>("driver_id")?),
        reporting_principal: row
            .try_get::<Option<String>, _>("reporting_principal")?
            .map(Principal::from),
        display_name: display_name_or_default(row.try_get("display_name")?),
        created_at: row.try_get("created_at")?,
        is_active: row.try_get("is_active")?,
    })
}

fn report_from_row(row: &PgRow) -> Result<LocationReport, sqlx::Error> {
    Ok(LocationReport {
        id: row.try_get("id")?,
        driver_id: DriverId::from(row.try_get::<String, _>("driver_id")?),
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn position_from_row(row: &PgRow) -> Result<DriverPosition, sqlx::Error> {
    Ok(DriverPosition {
        driver_id: DriverId::from(row.try_get::<String, _>("driver_id")?),
        display_name: display_name_or_default(row.try_get("display_name")?),
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        last_update: row.try_get("recorded_at")?,
    })
}

/// Storage backend on top of a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store on an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> DatabaseResult<()> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        }

        info!("Database schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, driver_id: &DriverId) -> DatabaseResult<()> {
        sqlx::query(UPSERT_SESSION)
            .bind(driver_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(())
    }

    async fn bind_principal(
        &self,
        driver_id: &DriverId,
        principal: &Principal,
        display_name: Option<&str>,
    ) -> DatabaseResult<Binding> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::Query)?;

        let row = sqlx::query(LOCK_SESSION)
            .bind(driver_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::Query)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(DatabaseError::Query)?;
            return Ok(Binding::Refused);
        };

        let is_active: bool = row.try_get("is_active").map_err(DatabaseError::Query)?;
        if !is_active {
            tx.rollback().await.map_err(DatabaseError::Query)?;
            return Ok(Binding::Refused);
        }

        let previous: Option<String> = row
            .try_get("reporting_principal")
            .map_err(DatabaseError::Query)?;

        let displaced = previous
            .filter(|p| p != principal.as_str())
            .map(Principal::from);
        if let Some(previous) = &displaced {
            warn!(
                "Driver {} rebound from principal {} to {}",
                driver_id, previous, principal
            );
        }

        sqlx::query(SUPERSEDE_PRINCIPAL)
            .bind(principal.as_str())
            .bind(driver_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::Query)?;

        sqlx::query(BIND_PRINCIPAL)
            .bind(driver_id.as_str())
            .bind(principal.as_str())
            .bind(display_name)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::Query)?;

        tx.commit().await.map_err(DatabaseError::Query)?;
        Ok(Binding::Bound { displaced })
    }

    async fn lookup_by_principal(
        &self,
        principal: &Principal,
    ) -> DatabaseResult<Option<SessionView>> {
        let row = sqlx::query(SELECT_BY_PRINCIPAL)
            .bind(principal.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref()
            .map(session_from_row)
            .transpose()
            .map_err(DatabaseError::Query)
    }

    async fn find(&self, driver_id: &DriverId) -> DatabaseResult<Option<SessionView>> {
        let row = sqlx::query(SELECT_BY_ID)
            .bind(driver_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref()
            .map(session_from_row)
            .transpose()
            .map_err(DatabaseError::Query)
    }

    async fn deactivate(&self, driver_id: &DriverId) -> DatabaseResult<bool> {
        let result = sqlx::query(DEACTIVATE)
            .bind(driver_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active(&self) -> DatabaseResult<Vec<SessionView>> {
        let rows = sqlx::query(SELECT_ACTIVE)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        rows.iter()
            .map(session_from_row)
            .collect::<Result<_, _>>()
            .map_err(DatabaseError::Query)
    }

    async fn ping(&self) -> bool {
        common::database::health_check(&self.pool).await
    }
}

#[async_trait]
impl LocationLedger for PgStore {
    async fn append(
        &self,
        driver_id: &DriverId,
        latitude: f64,
        longitude: f64,
        recorded_at: Option<DateTime<Utc>>,
    ) -> DatabaseResult<LocationReport> {
        let row = sqlx::query(INSERT_LOCATION)
            .bind(driver_id.as_str())
            .bind(latitude)
            .bind(longitude)
            .bind(recorded_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        report_from_row(&row).map_err(DatabaseError::Query)
    }

    async fn latest_for(&self, driver_id: &DriverId) -> DatabaseResult<Option<LocationReport>> {
        let row = sqlx::query(SELECT_LATEST_LOCATION)
            .bind(driver_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref()
            .map(report_from_row)
            .transpose()
            .map_err(DatabaseError::Query)
    }

    async fn latest_for_all_active(&self) -> DatabaseResult<Vec<DriverPosition>> {
        let rows = sqlx::query(SELECT_ACTIVE_WITH_LOCATIONS)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        rows.iter()
            .map(position_from_row)
            .collect::<Result<_, _>>()
            .map_err(DatabaseError::Query)
    }
}
