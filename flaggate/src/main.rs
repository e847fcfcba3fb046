mod config;
mod logging;

use clap::{Parser, Subcommand};
use config::{Config, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use resolver::key::normalize;
use resolver::{FlagConfig, FlagService, Resolved, Resolver, source_for_url};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(about = "Resolve feature flags against a fetched feature list")]
struct Cli {
    /// YAML file with `flags`, `logging` and `metrics` sections.
    #[arg(long, global = true)]
    config_file_path: Option<PathBuf>,

    /// Resolve every flag as enabled without fetching.
    #[arg(long, global = true)]
    test_mode: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Fetch once and print one JSON line per key.
    Resolve {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Fetch once and print the normalized feature map.
    Dump,
    /// Print the canonical form of each key.
    Normalize {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Keep refreshing and print the keys after every refresh.
    Watch {
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("could not install logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    #[error("could not create statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode output: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = match &cli.config_file_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let _sentry = logging::init(&config.logging)?;
    if let Some(metrics_config) = &config.metrics {
        init_metrics(metrics_config)?;
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(cli, config.flags))
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some("flaggate"))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderInstalled)?;
    resolver::metrics_defs::describe_all();
    Ok(())
}

async fn run(cli: Cli, flags: FlagConfig) -> Result<(), CliError> {
    let mut resolver = Resolver::new(flags);
    if cli.test_mode {
        resolver.enter_test_mode();
    }

    match cli.command {
        CliCommand::Resolve { keys } => {
            load_once(&mut resolver).await;
            for key in keys {
                println!("{}", serde_json::to_string(&describe(&key, resolver.resolve(&key)))?);
            }
        }
        CliCommand::Dump => {
            load_once(&mut resolver).await;
            let data = resolver.current_data().cloned().unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        CliCommand::Watch {
            interval_secs,
            keys,
        } => watch(resolver, Duration::from_secs(interval_secs), keys).await?,
        CliCommand::Normalize { keys } => {
            for key in keys {
                println!("{}", normalize(&key));
            }
        }
    }

    Ok(())
}

// Fetch failures are logged and leave the resolver errored, so every flag
// still resolves to its default.
async fn load_once(resolver: &mut Resolver) {
    if resolver.state().is_test_mode() {
        return;
    }
    let Some(url) = resolver.config().feature_url.clone() else {
        tracing::warn!("no featureUrl configured, flags resolve to their default value");
        return;
    };

    match source_for_url(&url).fetch(&url).await {
        Ok(payload) => {
            if let Err(err) = resolver.receive(&payload) {
                tracing::error!(%url, error = %err, "rejected feature payload");
            }
        }
        Err(err) => {
            tracing::error!(%url, error = %err, "could not fetch features");
            resolver.receive_error(err.to_string());
        }
    }
}

async fn watch(resolver: Resolver, interval: Duration, keys: Vec<String>) -> Result<(), CliError> {
    let url = resolver.config().feature_url.clone().unwrap_or_default();
    let service = FlagService::new(resolver, source_for_url(&url));
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Errors are already logged by the loader.
                let _ = service.refresh(None).await;
                for key in &keys {
                    println!("{}", serde_json::to_string(&describe(key, service.resolve(key)))?);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    service.shutdown().await;
    Ok(())
}

fn describe(key: &str, resolved: Resolved) -> Value {
    match resolved {
        Resolved::Config(value) => json!({"key": key, "config": value}),
        Resolved::Flag(descriptor) => json!({
            "key": key,
            "canonicalKey": normalize(key),
            "enabled": descriptor.is_enabled(),
            "descriptor": descriptor.as_ref(),
        }),
    }
}
