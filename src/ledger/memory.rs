//! In-Memory Ledger Store
//!
//! Process-local backend. A unit of work holds the store's lock from
//! `begin` until commit/rollback, so units execute strictly one at a time,
//! which trivially satisfies serializable isolation. Writes go to a private
//! working copy that replaces the shared state only on commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::error::LedgerError;
use super::store::{LedgerStore, UnitOfWork};
use super::types::{
    Account, AccountId, MAX_AMOUNT, RecordId, TransactionRecord, validate_balance,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    /// Append-only, in insertion (and therefore `created_at`) order
    records: Vec<TransactionRecord>,
    last_account_id: i64,
    last_record_id: i64,
    last_created_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    /// Strictly increasing insert timestamp
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }

    fn account_mut(&mut self, account: AccountId) -> Result<&mut Account, LedgerError> {
        self.accounts
            .get_mut(&account)
            .ok_or(LedgerError::NotFound(account))
    }
}

/// Ledger store kept in process memory
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    fail_appends: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with an opening balance.
    ///
    /// Account creation is outside the engine; this is the provisioning hook.
    pub async fn open_account(&self, balance: Decimal) -> Result<AccountId, LedgerError> {
        let balance = validate_balance(balance)?;
        let mut state = self.state.lock().await;
        state.last_account_id += 1;
        let id = AccountId(state.last_account_id);
        state.accounts.insert(
            id,
            Account {
                id,
                balance,
                updated_at: Utc::now(),
            },
        );
        debug!(account = %id, balance = %balance, "Account opened");
        Ok(id)
    }

    /// Committed state of an account
    pub async fn account(&self, account: AccountId) -> Option<Account> {
        self.state.lock().await.accounts.get(&account).cloned()
    }

    /// Number of committed history records
    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Make every subsequent `append_transaction` fail with an internal error
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Unit = MemoryUnit;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<MemoryUnit, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryUnit {
            guard,
            working,
            fail_appends: self.fail_appends.load(Ordering::SeqCst),
        })
    }
}

/// Unit of work over [`InMemoryLedgerStore`]
pub struct MemoryUnit {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
    fail_appends: bool,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn increase_balance(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let entry = self.working.account_mut(account)?;
        // same bound as the NUMERIC(15,2) column
        let balance = entry
            .balance
            .checked_add(amount)
            .filter(|b| *b < MAX_AMOUNT)
            .ok_or(LedgerError::InvalidAmount)?;
        entry.balance = balance;
        entry.updated_at = Utc::now();
        Ok(balance)
    }

    async fn read_balance(&mut self, account: AccountId) -> Result<Decimal, LedgerError> {
        self.working
            .accounts
            .get(&account)
            .map(|a| a.balance)
            .ok_or(LedgerError::NotFound(account))
    }

    async fn decrease_balance(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let entry = self.working.account_mut(account)?;
        if entry.balance - amount < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                account,
                requested: amount,
            });
        }
        entry.balance -= amount;
        entry.updated_at = Utc::now();
        Ok(entry.balance)
    }

    async fn append_transaction(
        &mut self,
        source: Option<AccountId>,
        destination: AccountId,
        amount: Decimal,
        idempotency_key: Option<&str>,
    ) -> Result<TransactionRecord, LedgerError> {
        if self.fail_appends {
            return Err(LedgerError::Internal("injected append failure".to_string()));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        // foreign keys
        for id in source.into_iter().chain(std::iter::once(destination)) {
            if !self.working.accounts.contains_key(&id) {
                return Err(LedgerError::NotFound(id));
            }
        }
        // unique constraint
        if let Some(key) = idempotency_key
            && self
                .working
                .records
                .iter()
                .any(|r| r.idempotency_key.as_deref() == Some(key))
        {
            return Err(LedgerError::DuplicateRequest(key.to_string()));
        }

        self.working.last_record_id += 1;
        let record = TransactionRecord {
            id: RecordId(self.working.last_record_id),
            source,
            destination,
            amount,
            idempotency_key: idempotency_key.map(str::to_string),
            created_at: self.working.next_timestamp(),
        };
        self.working.records.push(record.clone());
        Ok(record)
    }

    async fn recent_transactions(
        &mut self,
        account: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self
            .working
            .records
            .iter()
            .rev()
            .filter(|r| r.involves(account))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> Result<Option<TransactionRecord>, LedgerError> {
        Ok(self
            .working
            .records
            .iter()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn commit(self) -> Result<(), LedgerError> {
        let MemoryUnit {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        // working copy is discarded with the guard
        Ok(())
    }
}
