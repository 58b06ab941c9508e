mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use locations::LocationsError;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "plusmaps";

#[derive(Parser)]
#[command(name = "plusmaps", version)]
enum CliCommand {
    /// Run the locations RPC service
    Locations(ServiceArgs),
}

#[derive(Args)]
struct ServiceArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not set up metrics: {0}")]
    Metrics(String),

    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),

    #[error(transparent)]
    Locations(#[from] LocationsError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[Fatal] {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliCommand) -> Result<(), StartupError> {
    match cli {
        CliCommand::Locations(args) => {
            let config = Config::from_file(&args.config_file_path)?;

            let _sentry = init_logging(config.common.logging.as_ref());
            if let Some(metrics) = &config.common.metrics {
                init_metrics(metrics)?;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(StartupError::Runtime)?;

            tracing::info!("Starting locations service");
            runtime.block_on(locations::run(config.locations.unwrap_or_default()))?;
            Ok(())
        }
    }
}

/// Installs the fmt subscriber, plus the sentry layer when a DSN is configured. The
/// returned guard flushes sentry events when dropped.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), StartupError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|_| StartupError::Metrics("a metrics recorder is already installed".into()))?;
    shared::metrics_defs::describe_all(locations::metrics_defs::ALL_METRICS);

    tracing::info!(
        "Sending metrics to {}:{}",
        config.statsd_host,
        config.statsd_port
    );
    Ok(())
}
