//! policy-migration - bulk edits of Eclipse Ditto policies
//!
//! Reads a YAML run configuration, streams every matching policy, applies the
//! configured migrations and writes changed policies back.

use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use policy_migration::services::config::{log_level_directive, LoggingConfig};
use policy_migration::{MigrationConfig, PolicyMigration};

#[derive(Parser, Debug)]
#[command(name = "policy-migration", version, about = "Migrate Eclipse Ditto policies in bulk")]
struct Args {
    /// Path to the YAML run configuration
    #[arg(short, long, env = "POLICY_MIGRATION_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Validate every write without modifying any policy
    #[arg(long)]
    dry_run: bool,

    /// Override the search page size
    #[arg(long)]
    page_size: Option<usize>,

    /// Override the in-flight write ceiling
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Override the console log level
    #[arg(long, env = "POLICY_MIGRATION_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut MigrationConfig) {
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            config.max_in_flight = max_in_flight;
        }
        if let Some(level) = &self.log_level {
            config.logging.console.level = level.clone();
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level_directive(&logging.console.level)));
    let console = tracing_subscriber::fmt::layer().with_filter(console_filter);

    let file = match &logging.file {
        Some(file) => {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file.filename)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(handle))
                    .with_filter(EnvFilter::new(log_level_directive(&file.level))),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match MigrationConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };
    args.apply(&mut config);

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("Configuration: {}", args.config.display());

    let migration = match PolicyMigration::from_config(config) {
        Ok(migration) => migration,
        Err(e) => {
            error!("Failed to set up migration: {}", e);
            std::process::exit(1);
        }
    };

    match migration.run().await {
        Ok(summary) => std::process::exit(summary.exit_code()),
        Err(e) => {
            error!("Migration aborted: {}", e);
            std::process::exit(1);
        }
    }
}
