//! PostgreSQL Ledger Store
//!
//! Every unit of work is a `SERIALIZABLE` transaction on a pooled connection.
//! The pool is owned by the store instance and handed to nothing else.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use super::error::LedgerError;
use super::store::{LedgerStore, UnitOfWork};
use super::types::{Account, AccountId, RecordId, TransactionRecord, validate_balance};

const RECORD_COLUMNS: &str =
    "id, source_account_id, destination_account_id, amount, idempotency_key, created_at";

/// Ledger store backed by PostgreSQL
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create an account with an opening balance.
    ///
    /// Account creation is outside the engine; this is the provisioning hook.
    pub async fn open_account(&self, balance: Decimal) -> Result<AccountId, LedgerError> {
        let balance = validate_balance(balance)?;
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO accounts (balance) VALUES ($1) RETURNING id",
        )
        .bind(balance)
        .fetch_one(&self.pool)
        .await?;

        debug!(account = id, balance = %balance, "Account opened");
        Ok(AccountId(id))
    }

    /// Committed state of an account
    pub async fn account(&self, account: AccountId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query("SELECT id, balance, updated_at FROM accounts WHERE id = $1")
            .bind(account.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Account {
            id: AccountId(row.try_get("id")?),
            balance: row.try_get("balance")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Unit = PgUnit;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<PgUnit, LedgerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(PgUnit { tx })
    }
}

/// Unit of work over [`PgLedgerStore`]; rolled back by sqlx when dropped
pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

impl PgUnit {
    async fn account_exists(&mut self, account: AccountId) -> Result<bool, LedgerError> {
        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM accounts WHERE id = $1")
            .bind(account.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(exists.is_some())
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn increase_balance(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE accounts
            SET balance = balance + $1, updated_at = NOW()
            WHERE id = $2
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(account.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::NotFound(account))
    }

    async fn read_balance(&mut self, account: AccountId) -> Result<Decimal, LedgerError> {
        sqlx::query_scalar::<_, Decimal>("SELECT balance FROM accounts WHERE id = $1")
            .bind(account.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?
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
        // Atomic subtract-if-sufficient: no read/write gap
        let new_balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE accounts
            SET balance = balance - $1, updated_at = NOW()
            WHERE id = $2 AND balance >= $1
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(account.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(balance) = new_balance {
            return Ok(balance);
        }
        if self.account_exists(account).await? {
            Err(LedgerError::InsufficientFunds {
                account,
                requested: amount,
            })
        } else {
            Err(LedgerError::NotFound(account))
        }
    }

    async fn append_transaction(
        &mut self,
        source: Option<AccountId>,
        destination: AccountId,
        amount: Decimal,
        idempotency_key: Option<&str>,
    ) -> Result<TransactionRecord, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let query = format!(
            r#"
            INSERT INTO transactions
                (source_account_id, destination_account_id, amount, idempotency_key)
            VALUES ($1, $2, $3, $4)
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(source.map(|s| s.as_i64()))
            .bind(destination.as_i64())
            .bind(amount)
            .bind(idempotency_key)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| match (&e, idempotency_key) {
                (sqlx::Error::Database(db_err), Some(key)) if db_err.is_unique_violation() => {
                    LedgerError::DuplicateRequest(key.to_string())
                }
                _ => LedgerError::from(e),
            })?;

        row_to_record(&row)
    }

    async fn recent_transactions(
        &mut self,
        account: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM transactions
            WHERE source_account_id = $1 OR destination_account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&query)
            .bind(account.as_i64())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn find_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> Result<Option<TransactionRecord>, LedgerError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM transactions WHERE idempotency_key = $1");
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Convert database row to TransactionRecord
fn row_to_record(row: &PgRow) -> Result<TransactionRecord, LedgerError> {
    let source: Option<i64> = row.try_get("source_account_id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(TransactionRecord {
        id: RecordId(row.try_get("id")?),
        source: source.map(AccountId),
        destination: AccountId(row.try_get("destination_account_id")?),
        amount: row.try_get("amount")?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at,
    })
}
