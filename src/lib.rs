//! Ledger Engine - transactional balances and transfer history
//!
//! # Modules
//!
//! - [`ledger`] - Engine, store traits and backends (PostgreSQL, in-memory)
//! - [`db`] - PostgreSQL connection pool
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use ledger::{
    AccountId, ErrorKind, InMemoryLedgerStore, LedgerConfig, LedgerEngine, LedgerError,
    PgLedgerStore, TransactionRecord,
};
