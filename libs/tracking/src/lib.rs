//! Real-time driver location tracking core
//!
//! Dispatchers issue one tracking link per driver, the driver's messaging
//! account claims it, and from then on every coordinate the account reports
//! is stored and pushed live to dashboard observers.
//!
//! - [`store`]: session records and the append-only location ledger
//! - [`session`]: link issuance and the driver lifecycle
//! - [`prompt`]: per-principal periodic location re-prompts
//! - [`ingest`]: validation and write-through of incoming reports
//! - [`broadcaster`]: best-effort live fan-out
//! - [`query`]: pull snapshots for dashboards

pub mod broadcaster;
pub mod error;
pub mod ingest;
pub mod model;
pub mod prompt;
pub mod query;
pub mod session;
pub mod store;

pub use broadcaster::{Broadcaster, Subscription};
pub use error::{ChannelError, Rejection, TrackingError, TrackingResult};
pub use ingest::{IngestOutcome, IngestionPipeline};
pub use model::{DriverId, DriverPosition, LocationEvent, LocationReport, Principal, SessionView};
pub use prompt::{PromptRegistry, ReportingChannel};
pub use query::DashboardQuery;
pub use session::{
    AutoPromptOutcome, ClaimOutcome, IssuedLink, LinkTemplate, StopOutcome,
    TrackingSessionManager,
};
pub use store::{Binding, LocationLedger, MemoryStore, PgStore, SessionStore};
