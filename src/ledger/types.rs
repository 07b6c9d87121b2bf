//! Ledger Domain Types
//!
//! Account and transaction record definitions shared by the engine and
//! every store backend.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Number of fractional digits a monetary amount may carry.
///
/// Matches the `NUMERIC(15,2)` columns of the persisted layout.
pub const MONEY_SCALE: u32 = 2;

/// Exclusive upper bound for amounts and balances (10^13).
///
/// `NUMERIC(15,2)` holds at most 13 integer digits.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_316_134_912, 2_328, 0, false, 0);

/// Account identifier (the `accounts.id` primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl AccountId {
    #[inline]
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Transaction record identifier, assigned by the store on insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A balance-carrying account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Never negative once committed.
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// An immutable entry of the append-only transaction log.
///
/// `source` is `None` for a pure deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: RecordId,
    pub source: Option<AccountId>,
    pub destination: AccountId,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// True if `account` is the source or the destination of this record
    pub fn involves(&self, account: AccountId) -> bool {
        self.destination == account || self.source == Some(account)
    }

    /// True if this record was appended for the given operation parameters.
    ///
    /// Used to tell an honest retry apart from a reused idempotency key.
    pub fn matches(
        &self,
        source: Option<AccountId>,
        destination: AccountId,
        amount: Decimal,
    ) -> bool {
        self.source == source && self.destination == destination && self.amount == amount
    }
}

/// Validate a monetary amount for a mutating operation.
///
/// Rejects zero, negative, amounts finer than [`MONEY_SCALE`] and amounts
/// at or above [`MAX_AMOUNT`].
pub fn validate_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    validate_balance(amount)
}

/// Validate a balance (opening or resulting): like [`validate_amount`], but zero is allowed.
pub fn validate_balance(balance: Decimal) -> Result<Decimal, LedgerError> {
    if balance < Decimal::ZERO || balance >= MAX_AMOUNT {
        return Err(LedgerError::InvalidAmount);
    }
    if balance.normalize().scale() > MONEY_SCALE {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(balance)
}
