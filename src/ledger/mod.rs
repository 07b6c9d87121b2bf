//! Ledger Transaction Engine
//!
//! Maintains account balances and an append-only transaction history.
//!
//! # Architecture
//!
//! ```text
//! caller (shell) ──▶ LedgerEngine ──▶ LedgerStore::begin ──▶ UnitOfWork ──▶ backend
//!                                        (PostgreSQL / in-memory)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Non-negative balances**: a decrease is one conditional update, never read-then-write
//! 2. **All or nothing**: balance changes and their history record commit in the same unit
//! 3. **Debit first**: a transfer removes funds from the source before crediting the destination
//! 4. **No hidden retries**: failures surface once; retrying is the caller's decision

pub mod engine;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;
pub mod state;
pub mod store;
pub mod types;


// Re-exports for convenience
pub use engine::{LedgerConfig, LedgerEngine, RECENT_LIMIT};
pub use error::{ErrorKind, LedgerError};
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use state::TransferState;
pub use store::{LedgerStore, UnitOfWork};
pub use types::{Account, AccountId, MAX_AMOUNT, MONEY_SCALE, RecordId, TransactionRecord};
