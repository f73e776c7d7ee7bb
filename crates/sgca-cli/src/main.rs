use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sgca_core::YearMonth;
use sgca_sync::{SlaType, SourceSelection, StoreBackend, SyncConfig, SyncRequest};

mod report;
mod telemetry;

#[derive(Debug, Parser)]
#[command(name = "sgca-cli")]
#[command(about = "SGCA compliance bridge: sync ERP backlog into compliance checks")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass and print the result.
    Sync(SyncArgs),
    /// Run the twice-daily cron scheduler until interrupted.
    Schedule(StoreArgs),
}

#[derive(Debug, Args, Default)]
struct StoreArgs {
    /// Check store backend: rest or memory.
    #[arg(long, default_value = "rest")]
    store: StoreBackend,
}

#[derive(Debug, Args, Default)]
struct SyncArgs {
    /// Period to sync as YYYY-MM. Defaults to the current month.
    #[arg(long)]
    period: Option<YearMonth>,
    /// Restrict the run to one company alias.
    #[arg(long)]
    only: Option<String>,
    /// odoo, skualo or both.
    #[arg(long, default_value = "both")]
    source: SourceSelection,
    /// all, weekly or monthly.
    #[arg(long, default_value = "all")]
    sla_type: SlaType,
    /// Compute actions without writing anything.
    #[arg(long)]
    dry_run: bool,
    /// Print the full result as JSON.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    store: StoreArgs,
}

impl SyncArgs {
    fn request(&self) -> SyncRequest {
        SyncRequest {
            source: self.source,
            period: self.period,
            only: self.only.clone(),
            dry_run: self.dry_run,
            sla_type: self.sla_type,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("reading configuration")?;
    let level = std::env::var("SGCA_LOG_LEVEL").unwrap_or_else(|_| telemetry::DEFAULT_LOG_LEVEL.to_string());
    telemetry::init(&level)?;

    let command = match cli.command {
        Some(command) => command,
        None if config.scheduler_enabled => Commands::Schedule(StoreArgs::default()),
        None => Commands::Sync(SyncArgs::default()),
    };

    match command {
        Commands::Sync(args) => {
            let orchestrator = sgca_sync::build_orchestrator(config, args.store.store).await?;
            let result = orchestrator.sync_all(&args.request()).await;
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("serializing sync result")?
                );
            } else {
                print!("{}", report::render(&result));
            }
            Ok(ExitCode::from(result.exit_code()))
        }
        Commands::Schedule(args) => {
            let orchestrator = sgca_sync::build_orchestrator(config, args.store).await?;
            sgca_sync::run_scheduler(Arc::new(orchestrator)).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_flags_build_a_request() {
        let cli = Cli::try_parse_from([
            "sgca-cli",
            "sync",
            "--period",
            "2025-01",
            "--only",
            "FactorIT",
            "--source",
            "odoo",
            "--sla-type",
            "monthly",
            "--dry-run",
            "--store",
            "memory",
        ])
        .unwrap();
        let Some(Commands::Sync(args)) = cli.command else {
            panic!("expected sync command");
        };
        let request = args.request();
        assert_eq!(request.period, YearMonth::new(2025, 1));
        assert_eq!(request.only.as_deref(), Some("FactorIT"));
        assert_eq!(request.source, SourceSelection::Odoo);
        assert_eq!(request.sla_type, SlaType::Monthly);
        assert!(request.dry_run);
        assert_eq!(args.store.store, StoreBackend::Memory);
    }

    #[test]
    fn sync_defaults_cover_everything() {
        let cli = Cli::try_parse_from(["sgca-cli", "sync"]).unwrap();
        let Some(Commands::Sync(args)) = cli.command else {
            panic!("expected sync command");
        };
        assert_eq!(args.source, SourceSelection::Both);
        assert_eq!(args.sla_type, SlaType::All);
        assert_eq!(args.store.store, StoreBackend::Rest);
        assert!(args.period.is_none());
        assert!(!args.json);
    }

    #[test]
    fn malformed_period_is_rejected() {
        assert!(Cli::try_parse_from(["sgca-cli", "sync", "--period", "2025-13"]).is_err());
    }
}
