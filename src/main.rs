//! wallet-ledger - operator CLI for the Ledger Transfer Engine
//!
//! Runs transfers, adjustments and deposits against the REST backend in
//! `store.base_url` and prints the outcome as JSON on stdout. Logs go to the
//! configured log file (and stderr in text mode).
//!
//! With `engine.journal_path` set, every run shares one transfer journal, so
//! a repeated `--transfer-id` is answered instead of executed again and
//! `reconcile` sees what earlier runs left unfinished.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use wallet_ledger::config::AppConfig;
use wallet_ledger::ledger::{
    AccountRef, AdjustRequest, BalanceAdjuster, DirectoryResolver, LedgerError, LedgerWriter,
    Platform, ReconciliationWorker, TransferEngine, TransferId, TransferJournal, TransferRequest,
    WorkerConfig,
};
use wallet_ledger::logging::init_logging;
use wallet_ledger::money;
use wallet_ledger::store::HttpStore;

#[derive(Parser)]
#[command(name = "wallet-ledger")]
#[command(about = "Ledger transfer engine for multi-platform wallets", long_about = None)]
struct Cli {
    /// Environment; loads config/<env>.yaml
    #[arg(short, long, default_value = "dev")]
    env: String,

    /// Explicit config file (overrides --env)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move money between two accounts of one platform
    Transfer {
        #[arg(long)]
        platform: Platform,
        /// Sender identifier (email, mobile or $cashtag, per platform)
        #[arg(long)]
        from: String,
        /// Recipient identifier
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        memo: Option<String>,
        /// Idempotency key (ULID); generated when omitted
        #[arg(long)]
        transfer_id: Option<TransferId>,
    },

    /// Staff credit (positive) or debit (negative) of one account
    Adjust {
        #[arg(long)]
        platform: Platform,
        #[arg(long)]
        owner: String,
        #[arg(long, allow_hyphen_values = true)]
        delta: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Deposit into one account
    Fund {
        #[arg(long)]
        platform: Platform,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Transaction history of an account, newest first
    History {
        #[arg(long)]
        platform: Platform,
        #[arg(long)]
        identifier: String,
    },

    /// Run one reconciliation scan, or keep scanning with --watch
    Reconcile {
        #[arg(long)]
        watch: bool,
        /// Seconds between scans in watch mode
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(&cli.env),
    }
    .context("loading configuration")?;
    let _log_guard = init_logging(&config.log);

    tracing::info!(env = %cli.env, base_url = %config.store.base_url, "Starting wallet-ledger");

    let store = Arc::new(HttpStore::new(&config.store).context("creating store client")?);
    let writer = Arc::new(LedgerWriter::new(
        store.clone(),
        store.clone(),
        config.engine.clone(),
    ));
    let resolver = Arc::new(DirectoryResolver::new(
        store.clone(),
        config.engine.call_timeout(),
    ));
    let journal = match &config.engine.journal_path {
        Some(path) => TransferJournal::open(path)
            .with_context(|| format!("opening transfer journal {}", path))?,
        None => {
            tracing::warn!("No journal_path configured; transfer ids are not remembered across runs");
            TransferJournal::new()
        }
    };
    let engine = TransferEngine::with_journal(writer.clone(), resolver, Arc::new(journal));
    let adjuster = BalanceAdjuster::new(writer);

    let outcome = match cli.command {
        Commands::Transfer {
            platform,
            from,
            to,
            amount,
            memo,
            transfer_id,
        } => {
            let amount = money::parse_amount(&amount).context("--amount")?;
            let mut request = TransferRequest::new(platform, from, to, amount);
            request.memo = memo;
            request.transfer_id = transfer_id;
            engine
                .transfer(request)
                .await
                .map(|receipt| json!({ "receipt": receipt }))
        }
        Commands::Adjust {
            platform,
            owner,
            delta,
            reason,
        } => {
            let delta = money::parse_delta(&delta).context("--delta")?;
            adjuster
                .adjust(AdjustRequest {
                    account: AccountRef::new(owner, platform),
                    delta,
                    reason,
                })
                .await
                .map(|receipt| json!({ "receipt": receipt }))
        }
        Commands::Fund {
            platform,
            owner,
            amount,
            reason,
        } => {
            let amount = money::parse_amount(&amount).context("--amount")?;
            adjuster
                .fund(&AccountRef::new(owner, platform), amount, reason)
                .await
                .map(|receipt| json!({ "receipt": receipt }))
        }
        Commands::History {
            platform,
            identifier,
        } => engine
            .history(&identifier, platform)
            .await
            .map(|records| json!({ "transactions": records })),
        Commands::Reconcile {
            watch,
            interval_secs,
        } => {
            let worker = ReconciliationWorker::new(
                engine.clone(),
                WorkerConfig {
                    scan_interval: std::time::Duration::from_secs(interval_secs),
                    ..WorkerConfig::default()
                },
            );
            if watch {
                worker.run().await
            }
            let report = worker.scan_and_recover().await;
            Ok(json!({ "report": report }))
        }
    };

    let (body, code) = match outcome {
        Ok(mut body) => {
            body["status"] = json!("ok");
            (body, ExitCode::SUCCESS)
        }
        Err(e) => (error_body(&e), ExitCode::FAILURE),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&body).context("rendering outcome")?
    );
    Ok(code)
}

fn error_body(e: &LedgerError) -> serde_json::Value {
    json!({
        "status": "error",
        "code": e.code(),
        "category": format!("{:?}", e.category()),
        "message": e.to_string(),
        "money_moved": e.money_moved(),
        "retryable": e.is_retryable(),
    })
}
