//! Common library for the driver tracking application
//!
//! This crate provides shared infrastructure used by the tracking core and
//! the tracker service: PostgreSQL configuration, pooling, health checks and
//! the storage error type.
//!
//! ```rust,no_run
//! use common::database::{DatabaseConfig, health_check, init_pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let pool = init_pool(&config).await?;
//!     println!("Database reachable: {}", health_check(&pool).await);
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod error;
