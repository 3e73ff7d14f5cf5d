//! pg-schema-sync CLI - Declarative schema reconciliation for PostgreSQL.

use clap::{Parser, Subcommand};
use pg_schema_sync::{schema_file, Config, Reconciler, SyncError};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-schema-sync")]
#[command(about = "Declarative schema reconciliation for PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to YAML schema definition file
    #[arg(short, long, default_value = "schema.yaml")]
    schema_file: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the database schema with the definitions
    Run {
        /// Override the application schema from the config file
        #[arg(long)]
        db_schema: Option<String>,

        /// Plan and show DDL without executing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the planned DDL statements and exit
    Plan {
        /// Override the application schema from the config file
        #[arg(long)]
        db_schema: Option<String>,
    },

    /// Test database connectivity
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(SyncError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::Run { db_schema, dry_run } => {
            if let Some(schema) = db_schema {
                config.database.schema = schema;
            }

            let targets = schema_file::load(&cli.schema_file)?;
            info!(
                "Loaded {} entity definitions from {:?}",
                targets.len(),
                cli.schema_file
            );

            let reconciler = Reconciler::new(config).await?;
            let report = reconciler.reconcile(&targets, dry_run, cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            }
        }
        Commands::Plan { db_schema } => {
            if let Some(schema) = db_schema {
                config.database.schema = schema;
            }

            let targets = schema_file::load(&cli.schema_file)?;
            let reconciler = Reconciler::new(config).await?;
            let ops = reconciler.plan(&targets).await?;
            let report = reconciler.describe(&ops)?;
            info!("Planned {} operations", report.operations.len());

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                for stmt in &report.statements {
                    println!("{};", stmt);
                }
            }
        }
        Commands::HealthCheck => {
            let reconciler = Reconciler::new(config).await?;
            reconciler.health_check().await?;
            println!("Health check passed");
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM so scheduled runs stop between
/// operations instead of mid-statement.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current operation...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current operation...");
        token_term.cancel();
    });

    cancel_token
}

/// Setup signal handler for Windows (only SIGINT/Ctrl-C).
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Stopping after the current operation...");
        token.cancel();
    });

    cancel_token
}
