//! PostgreSQL schema for the ledger relations
//!
//! Statements are idempotent and safe to apply at every start.

use sqlx::PgPool;

use super::error::LedgerError;

pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    balance     NUMERIC(15, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id                      BIGSERIAL PRIMARY KEY,
    source_account_id       BIGINT REFERENCES accounts (id),
    destination_account_id  BIGINT NOT NULL REFERENCES accounts (id),
    amount                  NUMERIC(15, 2) NOT NULL CHECK (amount > 0),
    idempotency_key         TEXT UNIQUE,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
)
"#;

pub const CREATE_SOURCE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_source_created
    ON transactions (source_account_id, created_at DESC)
"#;

pub const CREATE_DESTINATION_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_destination_created
    ON transactions (destination_account_id, created_at DESC)
"#;

const STATEMENTS: [(&str, &str); 4] = [
    ("accounts", CREATE_ACCOUNTS_TABLE),
    ("transactions", CREATE_TRANSACTIONS_TABLE),
    ("idx_transactions_source_created", CREATE_SOURCE_INDEX),
    ("idx_transactions_destination_created", CREATE_DESTINATION_INDEX),
];

/// Create the ledger tables and indexes if missing
pub async fn init_schema(pool: &PgPool) -> Result<(), LedgerError> {
    tracing::info!("Initializing ledger schema...");

    for (name, ddl) in STATEMENTS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            tracing::error!(object = name, error = %e, "Failed to create schema object");
            LedgerError::from(e)
        })?;
    }

    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_and_amount_constraints_present() {
        assert!(CREATE_ACCOUNTS_TABLE.contains("CHECK (balance >= 0)"));
        assert!(CREATE_TRANSACTIONS_TABLE.contains("CHECK (amount > 0)"));
        assert!(CREATE_TRANSACTIONS_TABLE.contains("idempotency_key         TEXT UNIQUE"));
    }

    #[test]
    fn test_statements_are_idempotent() {
        for (_, ddl) in STATEMENTS {
            assert!(ddl.contains("IF NOT EXISTS"));
        }
    }
}
