// # buildwatchd - buildwatch daemon
//
// Thin integration layer: reads configuration from environment variables,
// initializes the runtime, wires the core services together and runs the
// polling loop. All business logic lives in buildwatch-core; all protocol
// I/O lives in buildwatch-http.
//
// The chat-platform connector is an external collaborator; this daemon
// runs the poll/cache half of the system and logs what a connected
// dispatcher would deliver. An embedding that links a chat SDK spawns
// `Dispatcher::run` on the poller's event channel instead of the logger
// used here.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// - `BUILDWATCH_ENDPOINT`: base URL of the versioning endpoint (required)
// - `BUILDWATCH_PRODUCTS`: comma-separated catalog entries, each `name` or
//   `name=Public Name` (required)
// - `BUILDWATCH_TOPIC`: topic for all catalog entries (default: games)
// - `BUILDWATCH_REGION`: primary region (default: us)
// - `BUILDWATCH_INTERVAL_SECS`: seconds between cycles (default: 300)
// - `BUILDWATCH_FETCH_CONCURRENCY`: concurrent fetches per cycle (default: 8)
// - `BUILDWATCH_STORE_PATH`: path to the cache document (required)
// - `BUILDWATCH_BACKUP_CAP`: backup snapshots kept (default: 10)
// - `BUILDWATCH_WRITER_ID`: store writer identity (default: OS name)
// - `BUILDWATCH_LOG_LEVEL`: trace|debug|info|warn|error (default: info)
//
// ## Example
//
// ```bash
// export BUILDWATCH_ENDPOINT=http://us.patch.example.net:1119
// export BUILDWATCH_PRODUCTS="wow=Retail,wowt=Retail PTR,wow_beta=Beta"
// export BUILDWATCH_STORE_PATH=/var/lib/buildwatch/builds.json
//
// buildwatchd
// ```

use anyhow::Result;
use buildwatch_core::config::{
    EndpointConfig, NotifyConfig, PollerConfig, ProductConfig, StoreConfig, WatchConfig,
};
use buildwatch_core::poller::{Poller, PollerEvent};
use buildwatch_core::store::FileBuildStore;
use buildwatch_core::traits::BuildStore;
use buildwatch_http::{ConfigProbe, HttpVersionSource};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Raw environment configuration, shaped into a [`WatchConfig`] after
/// validation
struct Config {
    endpoint: String,
    products: Vec<(String, String)>,
    topic: String,
    region: String,
    interval_secs: u64,
    fetch_concurrency: usize,
    store_path: String,
    backup_cap: usize,
    writer_id: Option<String>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let products = env::var("BUILDWATCH_PRODUCTS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((name, public)) => (name.trim().to_string(), public.trim().to_string()),
                None => (entry.to_string(), entry.to_string()),
            })
            .collect();

        Ok(Self {
            endpoint: env::var("BUILDWATCH_ENDPOINT").unwrap_or_default(),
            products,
            topic: env::var("BUILDWATCH_TOPIC").unwrap_or_else(|_| "games".to_string()),
            region: env::var("BUILDWATCH_REGION").unwrap_or_else(|_| "us".to_string()),
            interval_secs: env::var("BUILDWATCH_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            fetch_concurrency: env::var("BUILDWATCH_FETCH_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            store_path: env::var("BUILDWATCH_STORE_PATH").unwrap_or_default(),
            backup_cap: env::var("BUILDWATCH_BACKUP_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            writer_id: env::var("BUILDWATCH_WRITER_ID").ok(),
            log_level: env::var("BUILDWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the raw values and shape them into the typed configuration
    fn into_watch_config(self) -> Result<WatchConfig> {
        if self.endpoint.is_empty() {
            anyhow::bail!(
                "BUILDWATCH_ENDPOINT is required. \
                Set it via: export BUILDWATCH_ENDPOINT=http://us.patch.example.net:1119"
            );
        }

        if self.products.is_empty() {
            anyhow::bail!(
                "BUILDWATCH_PRODUCTS must contain at least one product. \
                Set it via: export BUILDWATCH_PRODUCTS=\"wow=Retail,wowt=Retail PTR\""
            );
        }

        if self.store_path.is_empty() {
            anyhow::bail!(
                "BUILDWATCH_STORE_PATH is required. \
                Set it via: export BUILDWATCH_STORE_PATH=/var/lib/buildwatch/builds.json"
            );
        }

        if !(60..=86_400).contains(&self.interval_secs) {
            anyhow::bail!(
                "BUILDWATCH_INTERVAL_SECS must be between 60 and 86400. Got: {}",
                self.interval_secs
            );
        }

        if !(1..=32).contains(&self.fetch_concurrency) {
            anyhow::bail!(
                "BUILDWATCH_FETCH_CONCURRENCY must be between 1 and 32. Got: {}",
                self.fetch_concurrency
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!(
                "BUILDWATCH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                other
            ),
        }

        let store = StoreConfig {
            path: self.store_path,
            backup_cap: self.backup_cap,
            ledger_cap: 64,
            writer_id: self
                .writer_id
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
        };

        let config = WatchConfig {
            endpoint: EndpointConfig {
                version_url: self.endpoint,
                request_timeout_secs: 20,
                probe_timeout_secs: 2,
            },
            products: self
                .products
                .into_iter()
                .map(|(name, public_name)| ProductConfig {
                    name,
                    public_name,
                    topic: self.topic.clone(),
                    regions: vec![self.region.clone()],
                    test_branch: false,
                    internal: false,
                })
                .collect(),
            poller: PollerConfig {
                interval_secs: self.interval_secs,
                fetch_concurrency: self.fetch_concurrency,
                startup_delay_secs: 0,
            },
            store,
            notify: NotifyConfig::default(),
        };

        // the typed tree has its own invariants; run them too
        config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

        Ok(config)
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return DaemonExitCode::ConfigError.into();
        }
    };

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let watch_config = match config.into_watch_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration validation error: {e}");
            return DaemonExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return DaemonExitCode::ConfigError.into();
    }

    info!("starting buildwatchd");
    info!("tracking {} product(s)", watch_config.products.len());

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(watch_config).await {
            error!("daemon error: {}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Wire the services together and run until a shutdown signal
async fn run_daemon(config: WatchConfig) -> Result<()> {
    let store = Arc::new(
        FileBuildStore::open(
            &config.store,
            Duration::from_secs(config.poller.interval_secs),
        )
        .await?,
    );
    info!(
        "store opened at {} ({} cached product(s))",
        config.store.path,
        store.entry_count().await?
    );

    let source = Arc::new(HttpVersionSource::new(&config.endpoint));
    let region = config.products[0].primary_region().to_string();
    let probe = Arc::new(ConfigProbe::new(&config.endpoint, region));

    let (poller, events) = Poller::new(
        source,
        probe,
        store,
        config.products.clone(),
        &config.poller,
    );

    let logger = tokio::spawn(log_events(events));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut poller_handle = tokio::spawn(async move {
        poller.run_with_shutdown(None, Some(shutdown_rx)).await
    });

    tokio::select! {
        signal = wait_for_shutdown() => {
            info!("received {}, shutting down", signal?);
            let _ = shutdown_tx.send(());
            poller_handle.await??;
        }
        result = &mut poller_handle => {
            result??;
            anyhow::bail!("poller exited unexpectedly");
        }
    }

    logger.await?;
    info!("buildwatchd stopped");
    Ok(())
}

/// Log poller events; this is the stand-in for a connected dispatcher
async fn log_events(mut rx: tokio::sync::mpsc::Receiver<PollerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PollerEvent::Started { products } => {
                info!("poller started, {} product(s) configured", products);
            }
            PollerEvent::FetchFailed {
                product,
                error,
                retryable,
            } => {
                warn!(
                    "fetch failed for '{}' (retryable={}): {}",
                    product, retryable, error
                );
            }
            PollerEvent::CycleCompleted {
                events,
                warmed,
                fetched,
                failed,
                ..
            } => {
                if warmed {
                    info!("cache warmed: {} fetched, {} failed", fetched, failed);
                } else if events.is_empty() {
                    info!("no changes found ({} fetched, {} failed)", fetched, failed);
                } else {
                    for event in &events {
                        let old = event
                            .old
                            .as_ref()
                            .map(|o| format!("{}.{}", o.build_text, o.build))
                            .unwrap_or_else(|| "untracked".to_string());
                        info!(
                            "{} ({}): {} --> {}.{}",
                            event.public_name, event.product, old, event.new.build_text,
                            event.new.build
                        );
                    }
                }
            }
            PollerEvent::CycleFailed { error } => {
                error!("poll cycle failed: {}", error);
            }
            PollerEvent::Stopped { reason } => {
                info!("poller stopped: {}", reason);
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to setup SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to setup SIGINT handler: {e}"))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for CTRL-C (non-Unix fallback)
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to wait for CTRL-C: {e}"))?;
    Ok("SIGINT")
}
