//! Ledger Engine - operator CLI
//!
//! ```text
//! ledger_engine [--env dev] migrate
//! ledger_engine [--env dev] open-account [BALANCE]
//! ledger_engine [--env dev] deposit ACCOUNT AMOUNT [--key KEY]
//! ledger_engine [--env dev] transfer SOURCE DESTINATION AMOUNT [--key KEY]
//! ledger_engine [--env dev] history ACCOUNT
//! ledger_engine [--env dev] balance ACCOUNT
//! ```
//!
//! Results are printed as JSON on stdout; logs go to stderr and the log file.

use std::process;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use rust_decimal::Decimal;

use ledger_engine::config::AppConfig;
use ledger_engine::db::Database;
use ledger_engine::ledger::schema::init_schema;
use ledger_engine::{AccountId, LedgerEngine, LedgerError, PgLedgerStore};

const USAGE: &str = "usage: ledger_engine [--env ENV] \
<migrate | open-account [BALANCE] | deposit ACCOUNT AMOUNT [--key KEY] | \
transfer SOURCE DESTINATION AMOUNT [--key KEY] | history ACCOUNT | balance ACCOUNT>";

/// Parsed command line
struct Cli {
    env: String,
    key: Option<String>,
    command: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli> {
    let mut env = "dev".to_string();
    let mut key = None;
    let mut command = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--env" | "-e" => env = args.next().ok_or_else(|| anyhow!("--env needs a value"))?,
            "--key" => key = Some(args.next().ok_or_else(|| anyhow!("--key needs a value"))?),
            _ => command.push(arg),
        }
    }
    Ok(Cli { env, key, command })
}

fn parse_account(s: &str) -> Result<AccountId> {
    let id = i64::from_str(s).with_context(|| format!("invalid account id: {s}"))?;
    Ok(AccountId(id))
}

fn parse_amount(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid amount: {s}"))
}

#[tokio::main]
async fn main() {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {e}\n{USAGE}");
            process::exit(2);
        }
    };

    let config = match AppConfig::load(&cli.env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let _log_guard = ledger_engine::logging::init_logging(&config);
    tracing::info!("Starting ledger engine in {} mode", cli.env);

    if let Err(e) = run(cli, config).await {
        // ledger failures carry a public message; everything else is an operator error
        match e.downcast_ref::<LedgerError>() {
            Some(ledger_err) => {
                tracing::error!(code = ledger_err.code(), error = %ledger_err, "Operation failed");
                eprintln!("Error [{}]: {}", ledger_err.code(), ledger_err.public_message());
            }
            None => {
                tracing::error!(error = %e, "Command failed");
                eprintln!("Error: {e:#}");
            }
        }
        process::exit(1);
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let url = config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured (set it in the config file or DATABASE_URL)")?;
    let db = Database::connect(url, config.postgres_max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    db.health_check()
        .await
        .context("PostgreSQL health check failed")?;

    let args: Vec<&str> = cli.command.iter().map(String::as_str).collect();
    if let ["migrate"] = args.as_slice() {
        init_schema(db.pool()).await?;
        println!("{}", serde_json::json!({ "migrated": true }));
        return Ok(());
    }

    let store = PgLedgerStore::new(db.into_pool());
    let output = match args.as_slice() {
        ["open-account"] => {
            let id = store.open_account(Decimal::ZERO).await?;
            serde_json::json!({ "account": id })
        }
        ["open-account", balance] => {
            let id = store.open_account(parse_amount(balance)?).await?;
            serde_json::json!({ "account": id })
        }
        rest => {
            let engine = LedgerEngine::new(store, config.ledger.clone());
            dispatch(&engine, rest, cli.key.as_deref()).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn dispatch(
    engine: &LedgerEngine<PgLedgerStore>,
    args: &[&str],
    key: Option<&str>,
) -> Result<serde_json::Value> {
    let value = match (args, key) {
        (["deposit", account, amount], None) => {
            let record = engine
                .deposit(parse_account(account)?, parse_amount(amount)?)
                .await?;
            serde_json::to_value(record)?
        }
        (["deposit", account, amount], Some(key)) => {
            let record = engine
                .deposit_idempotent(key, parse_account(account)?, parse_amount(amount)?)
                .await?;
            serde_json::to_value(record)?
        }
        (["transfer", source, destination, amount], None) => {
            let record = engine
                .transfer(
                    parse_account(source)?,
                    parse_account(destination)?,
                    parse_amount(amount)?,
                )
                .await?;
            serde_json::to_value(record)?
        }
        (["transfer", source, destination, amount], Some(key)) => {
            let record = engine
                .transfer_idempotent(
                    key,
                    parse_account(source)?,
                    parse_account(destination)?,
                    parse_amount(amount)?,
                )
                .await?;
            serde_json::to_value(record)?
        }
        (["history", account], _) => {
            let records = engine.recent_transactions(parse_account(account)?).await?;
            serde_json::to_value(records)?
        }
        (["balance", account], _) => {
            let account = parse_account(account)?;
            let balance = engine.balance(account).await?;
            serde_json::json!({ "account": account, "balance": balance })
        }
        _ => bail!("unknown command\n{USAGE}"),
    };
    Ok(value)
}
