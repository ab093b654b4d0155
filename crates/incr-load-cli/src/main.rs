//! incr-load CLI - Incremental table loads into PostgreSQL.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use incr_load::loader::BatchStatus;
use incr_load::runner::required_tables;
use incr_load::{
    Catalog, Config, EmbeddedCatalog, EntityDescription, LoadError, LoadOutput, PgTarget,
    RunOptions, RunReport, Runner, TableRef,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "incr-load")]
#[command(about = "Incremental table loads into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

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
    /// Run a configured load
    Run {
        /// Load name
        name: String,

        /// First day of the window (YYYY-MM-DD)
        #[arg(long, requires = "end_date")]
        start_date: Option<NaiveDate>,

        /// Last day of the window, inclusive (YYYY-MM-DD)
        #[arg(long, requires = "start_date")]
        end_date: Option<NaiveDate>,

        /// Print the SQL instead of executing it
        #[arg(long)]
        dry_run: bool,

        /// Allow a load that truncates the target
        #[arg(long)]
        confirm_full_load: bool,
    },

    /// Print the SQL of a load without executing it
    Render {
        /// Load name
        name: String,

        /// Render the windowed form (YYYY-MM-DD)
        #[arg(long, requires = "end_date")]
        start_date: Option<NaiveDate>,

        /// Render the windowed form (YYYY-MM-DD)
        #[arg(long, requires = "start_date")]
        end_date: Option<NaiveDate>,
    },

    /// Describe a table (columns, keys, foreign keys)
    Describe {
        /// Table as schema.name
        table: String,
    },

    /// Show the batch windows a load would run
    Batches {
        /// Load name
        name: String,
    },

    /// Run a SQL file in one transaction
    ExecSql {
        /// SQL file; statements separated by semicolons
        file: PathBuf,

        /// Bound to :start_date (YYYY-MM-DD)
        #[arg(long, requires = "end_date")]
        start_date: Option<NaiveDate>,

        /// Bound to :end_date (YYYY-MM-DD)
        #[arg(long, requires = "start_date")]
        end_date: Option<NaiveDate>,

        /// Print the statements instead of executing them
        #[arg(long)]
        dry_run: bool,
    },

    /// List configured loads
    List,

    /// Validate the configuration file without connecting
    Validate,

    /// Test the database connection
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

async fn run() -> Result<(), LoadError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(LoadError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let embedded = EmbeddedCatalog::new(&config.entities);

    match cli.command {
        Commands::Run {
            name,
            start_date,
            end_date,
            dry_run,
            confirm_full_load,
        } => {
            let options = RunOptions {
                start_date,
                end_date,
                dry_run,
                confirm_full_load,
            };

            let report = if dry_run && covers(&config, &embedded, &name)? {
                Runner::new(&config, &embedded)
                    .dry_run(&name, &options)
                    .await?
            } else {
                let cancel_token = setup_signal_handler().await?;
                let target = PgTarget::connect(&config.database).await?;
                Runner::new(&config, &target)
                    .with_cancellation(cancel_token)
                    .run(&name, &options)
                    .await?
            };

            print_report(&report, cli.output_json)?;

            if let LoadOutput::Batch(result) = &report.output {
                if result.status == BatchStatus::Cancelled {
                    return Err(LoadError::Cancelled);
                }
            }
        }

        Commands::Render {
            name,
            start_date,
            end_date,
        } => {
            let options = RunOptions {
                start_date,
                end_date,
                dry_run: true,
                ..Default::default()
            };

            let report = if covers(&config, &embedded, &name)? {
                Runner::new(&config, &embedded)
                    .dry_run(&name, &options)
                    .await?
            } else {
                let target = PgTarget::connect(&config.database).await?;
                Runner::new(&config, &target)
                    .dry_run(&name, &options)
                    .await?
            };

            print_report(&report, cli.output_json)?;
        }

        Commands::Describe { table } => {
            let table = TableRef::parse(&table)?;
            let entity = match config.embedded_entity(&table) {
                Some(entity) => entity.clone(),
                None => {
                    let target = PgTarget::connect(&config.database).await?;
                    target.describe_entity(&table).await?
                }
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&entity)?);
            } else {
                print_entity(&entity);
            }
        }

        Commands::Batches { name } => {
            let target = PgTarget::connect(&config.database).await?;
            let windows = Runner::new(&config, &target).plan(&name).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&windows)?);
            } else {
                println!("{} batches for {}:", windows.len(), name);
                for (i, window) in windows.iter().enumerate() {
                    println!("  {:>4}  {} ({} days)", i + 1, window, window.days());
                }
            }
        }

        Commands::ExecSql {
            file,
            start_date,
            end_date,
            dry_run,
        } => {
            let options = RunOptions {
                start_date,
                end_date,
                dry_run,
                ..Default::default()
            };
            let report = if dry_run {
                Runner::new(&config, &embedded).dry_run_sql(&file, &options)?
            } else {
                let target = PgTarget::connect(&config.database).await?;
                Runner::new(&config, &target)
                    .exec_sql(&file, &options)
                    .await?
            };
            print_report(&report, cli.output_json)?;
        }

        Commands::List => {
            if cli.output_json {
                let loads: Vec<serde_json::Value> = config
                    .loads
                    .iter()
                    .map(|l| {
                        serde_json::json!({
                            "name": l.name,
                            "scheme": l.spec.scheme,
                            "target_table": l.spec.target_table,
                            "source_table": l.spec.source_table,
                            "batched": l.spec.batch.is_some(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&loads)?);
            } else {
                println!("Configured loads:");
                for load in &config.loads {
                    println!(
                        "  {:<24} {:<7} {} <- {}{}",
                        load.name,
                        load.spec.scheme,
                        load.spec.target_table,
                        load.spec.source_table,
                        if load.spec.batch.is_some() { " (batched)" } else { "" }
                    );
                }
            }
        }

        Commands::Validate => {
            // Loads whose tables are all embedded are resolved offline too
            let mut checked = 0;
            for load in &config.loads {
                if embedded.covers(&required_tables(&load.spec)) {
                    Runner::new(&config, &embedded).resolve(&load.name).await?;
                    checked += 1;
                }
            }
            println!(
                "Configuration is valid: {} loads, {} resolved offline",
                config.loads.len(),
                checked
            );
        }

        Commands::HealthCheck => {
            let target = PgTarget::connect(&config.database).await?;
            let latency = target.test_connection().await?;

            if cli.output_json {
                let result = serde_json::json!({
                    "healthy": true,
                    "latency_ms": latency.as_millis() as u64,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target (PostgreSQL): OK ({}ms)",
                    latency.as_millis()
                );
            }
        }
    }

    Ok(())
}

/// Whether every table of the load is described in the config file.
fn covers(config: &Config, embedded: &EmbeddedCatalog<'_>, name: &str) -> Result<bool, LoadError> {
    let definition = config.load_definition(name)?;
    Ok(embedded.covers(&required_tables(&definition.spec)))
}

fn print_report(report: &RunReport, output_json: bool) -> Result<(), LoadError> {
    if output_json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    match &report.output {
        LoadOutput::DryRun(result) => {
            println!("-- {} ({})", result.target, result.scheme);
            println!("{}", result.sql);
        }
        LoadOutput::Simple(result) => {
            println!("\nLoad completed!");
            println!("  Run ID: {}", report.run_id);
            println!("  Target: {} ({})", result.target, result.scheme);
            println!("  Duration: {:.2}s", result.duration_secs);
            println!("  Rows: {}", result.rowcount);
            if result.self_reference_rows > 0 {
                println!("  Self-references resolved: {}", result.self_reference_rows);
            }
        }
        LoadOutput::Batch(result) => {
            println!("\nBatched load {}!", result.status);
            println!("  Run ID: {}", report.run_id);
            println!("  Target: {}", result.target);
            println!("  Duration: {:.2}s", result.duration_secs);
            println!("  Batches: {}/{}", result.successful, result.total);
            println!("  Rows: {}", result.rowcount);
            for failed in &result.failed_batches {
                println!(
                    "  ✗ {} → {}: {}",
                    failed.start_date,
                    failed.end_date,
                    failed.error.as_deref().unwrap_or("unknown error")
                );
            }
            if !result.recovery_ddl.is_empty() {
                println!("  Restore manually:");
                for ddl in &result.recovery_ddl {
                    println!("    {};", ddl);
                }
            }
        }
    }
    Ok(())
}

fn print_entity(entity: &EntityDescription) {
    println!("{}", entity.table);
    for col in &entity.columns {
        let mut flags = Vec::new();
        if !col.is_nullable {
            flags.push("not null");
        }
        if col.is_identity {
            flags.push("identity");
        }
        if col.has_server_default {
            flags.push("default");
        }
        println!("  {:<32} {:<24} {}", col.name, col.data_type, flags.join(", "));
    }
    if !entity.primary_key.is_empty() {
        println!("  PRIMARY KEY ({})", entity.primary_key.join(", "));
    }
    for uc in &entity.unique_constraints {
        println!("  UNIQUE {} ({})", uc.name, uc.columns.join(", "));
    }
    for fk in &entity.foreign_keys {
        println!(
            "  FOREIGN KEY {} ({}) REFERENCES {}.{} ({})",
            fk.name,
            fk.columns.join(", "),
            fk.ref_schema,
            fk.ref_table,
            fk.ref_columns.join(", ")
        );
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr; stdout carries SQL and JSON results
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (scheduler shutdown).
/// The running batch finishes; remaining batches are skipped.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, LoadError> {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    let token_term = cancel_token.clone();

    // SIGINT handler (Ctrl-C)
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current batch...");
        token_int.cancel();
    });

    // SIGTERM handler
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current batch...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, LoadError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
        token.cancel();
    });

    Ok(cancel_token)
}
