mod config;

use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "configd";

#[derive(Parser)]
#[command(about = "Configuration management service")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the configuration service
    Run {
        #[arg(long, env = "CONFIGD_CONFIG", default_value = "configd.yaml")]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit
    CheckConfig {
        #[arg(long, env = "CONFIGD_CONFIG", default_value = "configd.yaml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run { config } => {
            let config = load_config(&config);
            let _sentry = init_logging(config.logging.clone().unwrap_or_default());
            if let Some(metrics) = &config.metrics {
                init_statsd(metrics);
            }

            let rt = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to start tokio runtime: {e}");
                    process::exit(1);
                }
            };

            if let Err(e) = rt.block_on(config_service::run(config.service, shutdown_signal())) {
                tracing::error!(error = %e, "config service failed");
                process::exit(1);
            }
        }
        CliCommand::CheckConfig { config } => {
            let config = load_config(&config);
            match config.service.validate() {
                Ok(()) => println!("config ok"),
                Err(e) => {
                    eprintln!("invalid config: {e}");
                    process::exit(1);
                }
            }
        }
    }
}

fn load_config(path: &std::path::Path) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {e}", path.display());
            process::exit(1);
        }
    }
}

/// Installs the global subscriber. The returned guard flushes Sentry on drop.
fn init_logging(logging: LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let default_level = logging.level.as_deref().unwrap_or("info");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let guard = logging.sentry_dsn.map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_statsd(config: &MetricsConfig) {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX));

    match recorder {
        Ok(recorder) => {
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("a metrics recorder is already installed");
            }
        }
        // Counters stay available on /metrics without the exporter
        Err(e) => tracing::error!(error = %e, "failed to start statsd exporter"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
