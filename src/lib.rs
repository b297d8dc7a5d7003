//! Sharing backend for uploaded Pokemon records and bundles.
//!
//! The server deduplicates every upload by content hash, hands out short
//! public download codes, and serves a paginated, cached search surface
//! over the stored catalog. A background reconciler periodically
//! re-validates stored rows against the external parsing/legality oracle,
//! repairing derived fields or purging rows the oracle can no longer read.

pub mod cache;
pub mod codes;
pub mod config;
pub mod database;
pub mod http_server;
pub mod oracle;
pub mod process;
pub mod reconciler;
pub mod search;
pub mod state;
pub mod testkit;

// Re-export key types for consumers
pub use config::Config;
pub use database::{Database, DatabaseSetupError, EntityKind};
pub use state::{State as ServiceState, StateSetupError};
