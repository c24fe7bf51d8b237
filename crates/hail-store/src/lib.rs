//! # hail-store
//!
//! Durable call-history ledger for the coordinator, backed by SQLite.
//!
//! History entries are the only durable state in the system: endpoints and
//! in-flight call sessions are transient and rebuilt by re-registration
//! after a restart.  The crate exposes a synchronous [`Database`] handle
//! with typed helpers, plus the async [`Ledger`] wrapper used by the
//! coordinator core.

pub mod database;
pub mod history;
pub mod ledger;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use ledger::Ledger;
pub use models::*;
