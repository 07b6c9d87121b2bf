//! Ledger Store Traits
//!
//! A [`LedgerStore`] opens units of work; a [`UnitOfWork`] exposes the
//! balance and history primitives scoped to one atomic transaction.
//!
//! # Contract
//!
//! - Every unit runs at serializable isolation: concurrent units behave as if
//!   executed one at a time, or the backend rejects one of them with a
//!   [`LedgerError::Transient`] failure.
//! - Nothing a unit writes is visible to other units before [`UnitOfWork::commit`].
//! - Dropping a unit without committing rolls it back.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::LedgerError;
use super::types::{AccountId, TransactionRecord};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Unit: UnitOfWork;

    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Open a new serializable unit of work
    async fn begin(&self) -> Result<Self::Unit, LedgerError>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sized {
    /// Add `amount` (> 0) to the balance and stamp `updated_at`.
    ///
    /// Returns the new balance.
    async fn increase_balance(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError>;

    /// Balance as seen by this unit's snapshot
    async fn read_balance(&mut self, account: AccountId) -> Result<Decimal, LedgerError>;

    /// Subtract `amount` only if the balance stays non-negative.
    ///
    /// Check and write are a single conditional update; on
    /// [`LedgerError::InsufficientFunds`] the balance is left untouched.
    async fn decrease_balance(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError>;

    /// Insert an immutable history record; id and `created_at` are assigned here.
    async fn append_transaction(
        &mut self,
        source: Option<AccountId>,
        destination: AccountId,
        amount: Decimal,
        idempotency_key: Option<&str>,
    ) -> Result<TransactionRecord, LedgerError>;

    /// Records where `account` is source or destination, newest first
    async fn recent_transactions(
        &mut self,
        account: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError>;

    async fn find_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> Result<Option<TransactionRecord>, LedgerError>;

    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}
