//! Bank Ledger CLI
//!
//! ```text
//! bank_ledger [--env dev] migrate
//! bank_ledger [--env dev] health
//! bank_ledger [--env dev] transfer <from> <to> <amount>
//! bank_ledger [--env dev] accrue [--account <id>] [--at <rfc3339>]
//! bank_ledger [--env dev] issue-code <referrer_id>
//! bank_ledger [--env dev] redeem <code> <account_id>
//! ```
//!
//! Results are printed to stdout as JSON; logs go to the configured log file.

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;

use bank_ledger::config::AppConfig;
use bank_ledger::db::Database;
use bank_ledger::logging::init_logging;
use bank_ledger::store::Store;
use bank_ledger::transfer::TransferParams;

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env(args: &[String]) -> String {
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Long options and `-e` take a value; anything else (including `-5`) is positional
fn is_flag(arg: &str) -> bool {
    arg.starts_with("--") || arg == "-e"
}

/// Positional arguments with `--flag value` pairs removed
fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if is_flag(arg) {
            iter.next();
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn parse_i64(value: Option<&&str>, name: &str) -> anyhow::Result<i64> {
    let raw = value.with_context(|| format!("missing <{}>", name))?;
    raw.parse::<i64>()
        .with_context(|| format!("<{}> must be an integer, got {:?}", name, raw))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct AccrualSummary {
    updated: Vec<i64>,
    unchanged: Vec<i64>,
    failed: Vec<FailedAccrual>,
}

#[derive(Serialize)]
struct FailedAccrual {
    account_id: i64,
    code: &'static str,
    message: String,
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = get_env(&args);

    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    tracing::info!("Starting bank ledger in {} mode", env);

    let database_url = app_config
        .database_url()
        .context("no database url: set DATABASE_URL or postgres_url")?;
    let db = Database::connect(&database_url, &app_config.pool).await?;
    let store = Store::from_config(db, &app_config)?;

    let positional = positionals(&args);
    let Some(command) = positional.first().copied() else {
        bail!("usage: bank_ledger [--env <env>] <migrate|health|transfer|accrue|issue-code|redeem>");
    };

    match command {
        "migrate" => {
            store.db().migrate().await?;
            println!("migrations applied");
        }
        "health" => {
            store.db().health_check().await?;
            println!("ok");
        }
        "transfer" => {
            let params = TransferParams::new(
                parse_i64(positional.get(1), "from")?,
                parse_i64(positional.get(2), "to")?,
                parse_i64(positional.get(3), "amount")?,
            );
            let result = store
                .transfers()
                .transfer(params, &store.default_cancellation())
                .await?;
            print_json(&result)?;
        }
        "accrue" => {
            let now = match get_flag_value(&args, "--at") {
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .with_context(|| format!("--at must be RFC 3339, got {:?}", raw))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let cancel = store.default_cancellation();

            match get_flag_value(&args, "--account") {
                Some(raw) => {
                    let id = raw
                        .parse::<i64>()
                        .with_context(|| format!("--account must be an integer, got {:?}", raw))?;
                    let account = store.accrual().accrue_at(id, now, &cancel).await?;
                    print_json(&account)?;
                }
                None => {
                    let report = store.accrual().accrue_all_at(now, &cancel).await?;
                    print_json(&AccrualSummary {
                        updated: report.updated.iter().map(|a| a.id).collect(),
                        unchanged: report.unchanged.clone(),
                        failed: report
                            .failed
                            .iter()
                            .map(|(id, e)| FailedAccrual {
                                account_id: *id,
                                code: e.code(),
                                message: e.to_string(),
                            })
                            .collect(),
                    })?;
                }
            }
        }
        "issue-code" => {
            let referrer = parse_i64(positional.get(1), "referrer_id")?;
            let code = store
                .referrals()
                .issue(referrer, &store.default_cancellation())
                .await?;
            print_json(&code)?;
        }
        "redeem" => {
            let code = positional.get(1).context("missing <code>")?;
            let account_id = parse_i64(positional.get(2), "account_id")?;
            let redemption = store
                .referrals()
                .redeem(code, account_id, &store.default_cancellation())
                .await?;
            print_json(&redemption)?;
        }
        other => bail!("unknown command {:?}", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_get_env_default_and_override() {
        assert_eq!(get_env(&argv(&["bank_ledger", "health"])), "dev");
        assert_eq!(get_env(&argv(&["bank_ledger", "-e", "test", "health"])), "test");
    }

    #[test]
    fn test_positionals_skip_flag_values() {
        let args = argv(&["bank_ledger", "--env", "test", "accrue", "--account", "7"]);
        assert_eq!(positionals(&args), vec!["accrue"]);
        assert_eq!(get_flag_value(&args, "--account"), Some("7"));

        let args = argv(&["bank_ledger", "transfer", "1", "2", "50"]);
        assert_eq!(positionals(&args), vec!["transfer", "1", "2", "50"]);
    }

    #[test]
    fn test_negative_amount_stays_positional() {
        let args = argv(&["bank_ledger", "-e", "test", "transfer", "1", "2", "-5"]);
        let positional = positionals(&args);
        assert_eq!(positional, vec!["transfer", "1", "2", "-5"]);
        assert_eq!(parse_i64(positional.get(3), "amount").unwrap(), -5);

        let params = TransferParams::new(1, 2, -5);
        assert!(params.validate().is_err());
    }
}
