// Ticketline Infrastructure - SQLite Adapter
// Implements: ReplicatedStore over a SQLite file shared by client processes

mod clock;
mod connection;
mod migration;
mod poller;
mod store;

pub use clock::HybridClock;
pub use connection::{create_pool, database_url};
pub use migration::run_migrations;
pub use store::SqliteStore;

// Note: sqlx::Error conversion is handled by map_sqlx_error in store.rs
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for StoreError here)
