//! Persistence layer — libSQL-backed storage for patients, conversations,
//! reminders, and the idempotency ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::Store;
