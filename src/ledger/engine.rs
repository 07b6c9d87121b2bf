//! Ledger Engine
//!
//! Composes store primitives into the externally visible operations.
//! Each operation opens exactly one unit of work, bounded by a deadline,
//! and either commits all of its effects or none of them.
//!
//! The engine keeps no mutable state of its own: all coordination between
//! concurrent callers is delegated to the store's isolation.

use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::error::LedgerError;
use super::state::TransferState;
use super::store::{LedgerStore, UnitOfWork};
use super::types::{AccountId, TransactionRecord, validate_amount};

/// Records returned by [`LedgerEngine::recent_transactions`]
pub const RECENT_LIMIT: usize = 10;

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Upper bound for one unit of work, begin to commit
    #[serde(default = "default_unit_timeout_ms")]
    pub unit_timeout_ms: u64,
}

fn default_unit_timeout_ms() -> u64 {
    3000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            unit_timeout_ms: default_unit_timeout_ms(),
        }
    }
}

impl LedgerConfig {
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.unit_timeout_ms)
    }
}

pub struct LedgerEngine<S: LedgerStore> {
    store: S,
    config: LedgerConfig,
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Credit `amount` to `account` and append a `null -> account` record.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn deposit(
        &self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<TransactionRecord, LedgerError> {
        self.deposit_inner(account, amount, None).await
    }

    /// [`Self::deposit`] keyed by a caller-supplied idempotency key.
    ///
    /// A retry with the same key and parameters returns the original record
    /// without touching any balance.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn deposit_idempotent(
        &self,
        key: &str,
        account: AccountId,
        amount: Decimal,
    ) -> Result<TransactionRecord, LedgerError> {
        self.deposit_inner(account, amount, Some(key)).await
    }

    /// Move `amount` from `source` to `destination` and append a record.
    ///
    /// Debit, credit and append happen in that order inside one unit of work.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn transfer(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<TransactionRecord, LedgerError> {
        self.transfer_inner(source, destination, amount, None).await
    }

    /// [`Self::transfer`] keyed by a caller-supplied idempotency key.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn transfer_idempotent(
        &self,
        key: &str,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<TransactionRecord, LedgerError> {
        self.transfer_inner(source, destination, amount, Some(key))
            .await
    }

    /// Latest records where `account` is source or destination, newest first.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn recent_transactions(
        &self,
        account: AccountId,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.within_deadline("recent_transactions", async {
            let mut unit = self.store.begin().await?;
            unit.read_balance(account).await?;
            let records = unit.recent_transactions(account, RECENT_LIMIT).await?;
            unit.commit().await?;
            Ok(records)
        })
        .await
    }

    /// Current committed balance of `account`
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn balance(&self, account: AccountId) -> Result<Decimal, LedgerError> {
        self.within_deadline("balance", async {
            let mut unit = self.store.begin().await?;
            let balance = unit.read_balance(account).await?;
            unit.commit().await?;
            Ok(balance)
        })
        .await
    }

    async fn deposit_inner(
        &self,
        account: AccountId,
        amount: Decimal,
        key: Option<&str>,
    ) -> Result<TransactionRecord, LedgerError> {
        let amount = validate_amount(amount)?;

        self.within_deadline("deposit", async {
            let mut unit = self.store.begin().await?;

            if let Some(key) = key
                && let Some(existing) = unit.find_by_idempotency_key(key).await?
            {
                unit.rollback().await?;
                return replay(key, existing, None, account, amount);
            }

            // on any error the unit is dropped and rolled back
            let balance = unit.increase_balance(account, amount).await?;
            let record = unit.append_transaction(None, account, amount, key).await?;
            unit.commit().await?;

            info!(
                record_id = %record.id,
                account = %account,
                amount = %amount,
                balance = %balance,
                "Deposit committed"
            );
            Ok(record)
        })
        .await
    }

    async fn transfer_inner(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
        key: Option<&str>,
    ) -> Result<TransactionRecord, LedgerError> {
        let amount = validate_amount(amount)?;
        if source == destination {
            return Err(LedgerError::InvalidTransfer);
        }

        self.within_deadline("transfer", async {
            let mut unit = self.store.begin().await?;

            if let Some(key) = key
                && let Some(existing) = unit.find_by_idempotency_key(key).await?
            {
                unit.rollback().await?;
                return replay(key, existing, Some(source), destination, amount);
            }

            let mut state = TransferState::Started;
            let record =
                settle_transfer(unit, &mut state, source, destination, amount, key).await?;

            info!(
                record_id = %record.id,
                source = %source,
                destination = %destination,
                amount = %amount,
                state = %state,
                "Transfer committed"
            );
            Ok(record)
        })
        .await
    }

    /// Run `op` under the unit-of-work deadline.
    ///
    /// On expiry the future is dropped, which drops (and rolls back) the
    /// open unit. If the deadline hits while a commit is in flight the outcome
    /// is unknown to the caller; idempotency keys make the retry safe.
    async fn within_deadline<T, F>(&self, op: &'static str, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.config.unit_timeout(), fut).await {
            Ok(result) => result,
            Err(elapsed) => {
                warn!(
                    op,
                    timeout_ms = self.config.unit_timeout_ms,
                    "Unit of work timed out"
                );
                Err(elapsed.into())
            }
        }
    }
}

/// Apply the transfer steps inside `unit` and finish the unit.
///
/// Commits on success and rolls back on any failure; `state` always ends
/// terminal, `Committed` or `Aborted`.
async fn settle_transfer<U: UnitOfWork>(
    mut unit: U,
    state: &mut TransferState,
    source: AccountId,
    destination: AccountId,
    amount: Decimal,
    key: Option<&str>,
) -> Result<TransactionRecord, LedgerError> {
    let record = match apply_transfer(&mut unit, state, source, destination, amount, key).await {
        Ok(record) => record,
        Err(e) => {
            let failed_at = *state;
            advance(state, TransferState::Aborted);
            warn!(
                failed_at = %failed_at,
                source = %source,
                destination = %destination,
                amount = %amount,
                error = %e,
                "Transfer aborted"
            );
            if let Err(rollback_err) = unit.rollback().await {
                warn!(error = %rollback_err, "Rollback failed; unit discarded");
            }
            return Err(e);
        }
    };

    if let Err(e) = unit.commit().await {
        let failed_at = *state;
        advance(state, TransferState::Aborted);
        warn!(failed_at = %failed_at, error = %e, "Transfer aborted at commit");
        return Err(e);
    }
    advance(state, TransferState::Committed);
    Ok(record)
}

/// Debit, credit, append. Leaves `state` at the last completed step.
async fn apply_transfer<U: UnitOfWork>(
    unit: &mut U,
    state: &mut TransferState,
    source: AccountId,
    destination: AccountId,
    amount: Decimal,
    key: Option<&str>,
) -> Result<TransactionRecord, LedgerError> {
    unit.decrease_balance(source, amount).await?;
    advance(state, TransferState::SourceDebited);

    unit.increase_balance(destination, amount).await?;
    advance(state, TransferState::DestinationCredited);

    let record = unit
        .append_transaction(Some(source), destination, amount, key)
        .await?;
    advance(state, TransferState::RecordAppended);

    Ok(record)
}

fn advance(state: &mut TransferState, to: TransferState) {
    debug_assert!(state.can_transition_to(to), "{state} -> {to}");
    debug!(from = %state, to = %to, "Transfer step");
    *state = to;
}

/// Answer a retried request from the stored record
fn replay(
    key: &str,
    existing: TransactionRecord,
    source: Option<AccountId>,
    destination: AccountId,
    amount: Decimal,
) -> Result<TransactionRecord, LedgerError> {
    if existing.matches(source, destination, amount) {
        info!(record_id = %existing.id, key, "Idempotent replay, returning existing record");
        Ok(existing)
    } else {
        warn!(record_id = %existing.id, key, "Idempotency key reused with different parameters");
        Err(LedgerError::DuplicateRequest(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    async fn setup(balances: &[Decimal]) -> (LedgerEngine<InMemoryLedgerStore>, Vec<AccountId>) {
        let store = InMemoryLedgerStore::new();
        let mut ids = Vec::new();
        for balance in balances {
            ids.push(store.open_account(*balance).await.unwrap());
        }
        (LedgerEngine::new(store, LedgerConfig::default()), ids)
    }

    #[tokio::test]
    async fn test_deposit_credits_and_records() {
        let (engine, ids) = setup(&[dec!(100.00)]).await;
        let a = ids[0];

        let record = engine.deposit(a, dec!(50.00)).await.unwrap();

        assert_eq!(record.source, None);
        assert_eq!(record.destination, a);
        assert_eq!(record.amount, dec!(50.00));
        assert_eq!(engine.balance(a).await.unwrap(), dec!(150.00));
        assert_eq!(engine.store().record_count().await, 1);
    }

    #[tokio::test]
    async fn test_deposit_rejects_invalid_amount() {
        let (engine, ids) = setup(&[dec!(100)]).await;

        for amount in [dec!(0), dec!(-1), dec!(0.005)] {
            let err = engine.deposit(ids[0], amount).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount), "{amount}");
        }
        assert_eq!(engine.balance(ids[0]).await.unwrap(), dec!(100));
        assert_eq!(engine.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn test_deposit_unknown_account() {
        let (engine, _) = setup(&[]).await;
        let err = engine.deposit(AccountId(404), dec!(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(AccountId(404))));
        assert_eq!(engine.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn test_deposit_append_failure_rolls_back_credit() {
        let (engine, ids) = setup(&[dec!(10)]).await;
        engine.store().set_fail_appends(true);

        let err = engine.deposit(ids[0], dec!(5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
        assert_eq!(engine.balance(ids[0]).await.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let (engine, ids) = setup(&[dec!(150.00), dec!(0.00)]).await;
        let (a, b) = (ids[0], ids[1]);

        let record = engine.transfer(a, b, dec!(30.00)).await.unwrap();

        assert_eq!(record.source, Some(a));
        assert_eq!(record.destination, b);
        assert_eq!(engine.balance(a).await.unwrap(), dec!(120.00));
        assert_eq!(engine.balance(b).await.unwrap(), dec!(30.00));
    }

    #[tokio::test]
    async fn test_transfer_insufficient_funds_changes_nothing() {
        let (engine, ids) = setup(&[dec!(120.00), dec!(30.00)]).await;
        let (a, b) = (ids[0], ids[1]);

        let err = engine.transfer(a, b, dec!(1000.00)).await.unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { account, .. } if account == a
        ));
        assert_eq!(engine.balance(a).await.unwrap(), dec!(120.00));
        assert_eq!(engine.balance(b).await.unwrap(), dec!(30.00));
        assert_eq!(engine.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn test_transfer_missing_destination_restores_source() {
        let (engine, ids) = setup(&[dec!(50)]).await;

        let err = engine
            .transfer(ids[0], AccountId(999), dec!(20))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::NotFound(AccountId(999))));
        assert_eq!(engine.balance(ids[0]).await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn test_transfer_missing_source_changes_nothing() {
        let (engine, ids) = setup(&[dec!(50)]).await;

        let err = engine
            .transfer(AccountId(999), ids[0], dec!(20))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::NotFound(AccountId(999))));
        assert_eq!(engine.balance(ids[0]).await.unwrap(), dec!(50));
        assert_eq!(engine.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn test_settle_transfer_ends_aborted_on_failure() {
        let (engine, ids) = setup(&[dec!(50)]).await;

        let unit = engine.store().begin().await.unwrap();
        let mut state = TransferState::Started;
        let err = settle_transfer(unit, &mut state, ids[0], AccountId(999), dec!(20), None)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::NotFound(AccountId(999))));
        assert_eq!(state, TransferState::Aborted);
        assert!(state.is_terminal());
        assert_eq!(engine.balance(ids[0]).await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn test_settle_transfer_ends_committed_on_success() {
        let (engine, ids) = setup(&[dec!(50), dec!(0)]).await;

        let unit = engine.store().begin().await.unwrap();
        let mut state = TransferState::Started;
        let record = settle_transfer(unit, &mut state, ids[0], ids[1], dec!(20), None)
            .await
            .unwrap();

        assert_eq!(state, TransferState::Committed);
        assert_eq!(record.source, Some(ids[0]));
        assert_eq!(engine.balance(ids[1]).await.unwrap(), dec!(20));
    }

    #[tokio::test]
    async fn test_deposit_rejects_amount_beyond_column_bound() {
        let (engine, ids) = setup(&[dec!(9999999999999.00)]).await;

        for amount in [Decimal::MAX, dec!(10000000000000)] {
            let err = engine.deposit(ids[0], amount).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount), "{amount}");
        }
        // valid amount, but the resulting balance would not fit
        assert!(matches!(
            engine.deposit(ids[0], dec!(1.00)).await,
            Err(LedgerError::InvalidAmount)
        ));
        assert_eq!(engine.balance(ids[0]).await.unwrap(), dec!(9999999999999.00));
        assert_eq!(engine.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn test_transfer_append_failure_rolls_back_both_sides() {
        let (engine, ids) = setup(&[dec!(50), dec!(5)]).await;
        engine.store().set_fail_appends(true);

        assert!(engine.transfer(ids[0], ids[1], dec!(20)).await.is_err());
        assert_eq!(engine.balance(ids[0]).await.unwrap(), dec!(50));
        assert_eq!(engine.balance(ids[1]).await.unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let (engine, ids) = setup(&[dec!(50)]).await;
        let err = engine.transfer(ids[0], ids[0], dec!(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransfer));
        assert_eq!(engine.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn test_idempotent_deposit_replay() {
        let (engine, ids) = setup(&[dec!(0)]).await;
        let a = ids[0];

        let first = engine.deposit_idempotent("dep-1", a, dec!(25)).await.unwrap();
        let second = engine.deposit_idempotent("dep-1", a, dec!(25)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.balance(a).await.unwrap(), dec!(25));
        assert_eq!(engine.store().record_count().await, 1);

        let err = engine
            .deposit_idempotent("dep-1", a, dec!(26))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateRequest(_)));
    }

    #[tokio::test]
    async fn test_idempotent_transfer_replay() {
        let (engine, ids) = setup(&[dec!(100), dec!(0)]).await;
        let (a, b) = (ids[0], ids[1]);

        let first = engine
            .transfer_idempotent("tx-1", a, b, dec!(40))
            .await
            .unwrap();
        let again = engine
            .transfer_idempotent("tx-1", a, b, dec!(40))
            .await
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(engine.balance(a).await.unwrap(), dec!(60));
        assert_eq!(engine.balance(b).await.unwrap(), dec!(40));

        // same key, reversed direction
        let err = engine
            .transfer_idempotent("tx-1", b, a, dec!(40))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateRequest(_)));
    }

    #[tokio::test]
    async fn test_recent_transactions_limit_and_order() {
        let (engine, ids) = setup(&[dec!(0), dec!(0)]).await;
        let (a, b) = (ids[0], ids[1]);

        for i in 1..=12 {
            engine.deposit(a, Decimal::from(i)).await.unwrap();
        }
        engine.transfer(a, b, dec!(1)).await.unwrap();

        let records = engine.recent_transactions(a).await.unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].destination, b);
        assert!(records.windows(2).all(|w| w[0].created_at > w[1].created_at));

        let records_b = engine.recent_transactions(b).await.unwrap();
        assert_eq!(records_b.len(), 1);
        assert_eq!(records_b[0].source, Some(a));
    }

    #[tokio::test]
    async fn test_recent_transactions_unknown_account() {
        let (engine, _) = setup(&[]).await;
        assert!(matches!(
            engine.recent_transactions(AccountId(5)).await,
            Err(LedgerError::NotFound(AccountId(5)))
        ));
    }

    #[tokio::test]
    async fn test_unit_timeout_is_transient() {
        let store = InMemoryLedgerStore::new();
        let a = store.open_account(dec!(10)).await.unwrap();
        let engine = LedgerEngine::new(
            store.clone(),
            LedgerConfig {
                unit_timeout_ms: 50,
            },
        );

        // an open unit holds the store
        let blocker = store.begin().await.unwrap();
        let err = engine.deposit(a, dec!(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Transient(_)));
        assert!(err.is_retryable());
        drop(blocker);

        assert_eq!(engine.balance(a).await.unwrap(), dec!(10));
    }
}
