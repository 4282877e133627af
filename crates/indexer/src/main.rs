//! `order-indexer` operator CLI.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use order_indexer::application::{
    run_init_db, run_notifier, run_processor, run_reindex, run_rpc_status, run_scanner,
};
use order_indexer::CliError;
use order_indexer_domain::model::{InitOutcome, ReindexPlan};
use order_indexer_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "order-indexer", version, about = "Order-book contract event indexer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the schema and seed the scanner cursor (idempotent).
    InitDb,
    /// Tail contract logs and publish decoded events.
    StartScanner,
    /// Apply queued events to the order tables.
    StartProcessor,
    /// Drain processed-event notifications.
    StartNotifier,
    /// Rewind the projection so blocks from `height` are replayed.
    Reindex { height: u64 },
    /// Probe every RPC provider and print the pool status as JSON.
    RpcStatus,
}

impl Command {
    /// Environment prefix for `<PREFIX>_LOG_FILTER` / `<PREFIX>_METRICS_ADDRESS`.
    fn telemetry_prefix(&self) -> &'static str {
        match self {
            Self::StartScanner => "SCANNER",
            Self::StartProcessor => "PROCESSOR",
            Self::StartNotifier => "NOTIFIER",
            Self::InitDb | Self::Reindex { .. } | Self::RpcStatus => "INDEXER",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("[order-indexer] {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    init_telemetry(&TelemetryConfig::from_env(command.telemetry_prefix()))?;

    match command {
        Command::InitDb => match run_init_db().await? {
            InitOutcome::Seeded => println!("database initialized"),
            InitOutcome::AlreadyInitialized => println!("database already initialized"),
        },
        Command::StartScanner => run_scanner().await?,
        Command::StartProcessor => run_processor().await?,
        Command::StartNotifier => run_notifier().await?,
        Command::Reindex { height } => {
            let report = run_reindex(height).await?;
            let mode = match report.plan {
                ReindexPlan::FullReset { .. } => "full reset",
                ReindexPlan::Rewind { .. } => "rewind",
            };
            println!(
                "reindex ({mode}) complete: cursor={} orders_deleted={} ledger_entries_deleted={} purged_messages={}",
                report.plan.current_block_height(),
                report.summary.orders_deleted,
                report.summary.ledger_entries_deleted,
                report.purged_messages,
            );
        }
        Command::RpcStatus => {
            let status = run_rpc_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_reindex_height() {
        let cli = Cli::try_parse_from(["order-indexer", "reindex", "1200"]).unwrap();
        assert!(matches!(cli.command, Command::Reindex { height: 1200 }));
        assert_eq!(cli.command.telemetry_prefix(), "INDEXER");
    }

    #[test]
    fn subcommands_use_kebab_case() {
        let cli = Cli::try_parse_from(["order-indexer", "start-scanner"]).unwrap();
        assert_eq!(cli.command.telemetry_prefix(), "SCANNER");
        assert!(Cli::try_parse_from(["order-indexer", "reindex", "-1"]).is_err());
    }
}
