//! `sqlstore-probe`: open the configured `PostgreSQL` connections and report
//! what the server supports

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sqlstore_config::source::{ConfigurationLoader, EnvironmentSource, TomlFileSource};
use sqlstore_config::{ApplicationConfig, LogFormat, LoggingConfig};
use sqlstore_postgres::{ConnectionManager, Dialect, OpenedConnection, PostgresDialect};
use tracing_subscriber::EnvFilter;

/// Check TLS client-certificate connectivity to `PostgreSQL`
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional configuration file path (TOML format)
    #[arg(long, short = 'c')]
    config_file: Option<PathBuf>,

    /// Open only the read-only connection
    #[arg(long)]
    read_only: bool,

    /// Emit logs as JSON regardless of the configured format
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    sqlstore_common::initialize_environment();

    let config = load_config(&args)?;

    let format = if args.json {
        LogFormat::Json
    } else {
        config.logging.format
    };
    init_tracing(&config.logging, format);

    tracing::info!(
        connection = %config.database.safe_connection_string(),
        read_only = args.read_only,
        "Probing database"
    );

    if args.read_only {
        let opened = PostgresDialect
            .connect(&config.database, true)
            .await
            .context("Failed to open read-only connection")?;
        report("read-only", &opened);
        opened.pool.close().await;
    } else {
        let manager = ConnectionManager::open(&config.database)
            .await
            .context("Failed to open database connections")?;
        report("read-write", manager.write_connection());
        if let Some(read) = manager.read_connection() {
            report("read-only", read);
        }
        manager.close().await;
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ApplicationConfig> {
    let mut loader = ConfigurationLoader::new().add_source(Box::new(EnvironmentSource));
    if let Some(path) = &args.config_file {
        loader = loader.add_source(Box::new(TomlFileSource::new(path)));
    }

    loader.load().with_context(|| match &args.config_file {
        Some(path) => format!("Failed to load configuration from '{}'", path.display()),
        None => "Failed to load configuration from the environment".to_string(),
    })
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn report(label: &str, opened: &OpenedConnection) {
    let parsed = opened
        .server_version()
        .map_or_else(|_| "unparsed".to_string(), |v| v.to_string());
    println!(
        "{label}: PostgreSQL {} (major.minor {parsed}), CTE support: {}",
        opened.version,
        if opened.supports_cte { "yes" } else { "no" }
    );
}
