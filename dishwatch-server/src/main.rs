//! Dashboard server for Starlink dish telemetry.
//!
//! Polls the dish through `grpcurl` and the speedtest tool, keeps the
//! recent history in memory and serves it over HTTP and WebSocket together
//! with the static dashboard.

mod api;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dishwatch::collect::grpcurl::DEFAULT_DISH_ADDR;
use dishwatch::collect::{GrpcurlDish, LocalAddress, SpeedtestCli};
use dishwatch::store::DEFAULT_RETENTION_SECS;
use dishwatch::{
    Broadcaster, Monitor, Poller, PollerConfig, RetentionPolicy, SeriesStore, SettingsFile,
    StoreConfig,
};

/// dishwatch-server — Starlink dish dashboard.
#[derive(Parser)]
#[command(name = "dishwatch-server", version, about)]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port for the HTTP server.
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Dish gRPC address (host:port).
    #[arg(long, env = "STARLINK_URI", default_value = DEFAULT_DISH_ADDR)]
    dish_addr: String,

    /// Path to the settings file, created with defaults if missing.
    #[arg(long, env = "DISHWATCH_SETTINGS", default_value = "dishwatch.toml")]
    settings: PathBuf,

    /// Directory holding the static dashboard.
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// Seconds between status polls.
    #[arg(long, default_value = "1")]
    status_interval_secs: u64,

    /// Seconds between history polls.
    #[arg(long, default_value = "30")]
    history_interval_secs: u64,

    /// Seconds between scheduled speedtests.
    #[arg(long, default_value = "900")]
    speedtest_interval_secs: u64,

    /// Milliseconds between WebSocket pushes.
    #[arg(long, default_value = "1000")]
    push_interval_ms: u64,

    /// Retention of status and history rows in seconds.
    #[arg(long, default_value_t = DEFAULT_RETENTION_SECS)]
    retention_secs: f64,

    /// Retention of speedtest rows in seconds (kept forever if unset).
    #[arg(long)]
    speedtest_retention_secs: Option<f64>,

    /// grpcurl executable.
    #[arg(long, default_value = "grpcurl")]
    grpcurl: String,

    /// Timeout for a single grpcurl call in seconds.
    #[arg(long, default_value = "10")]
    grpcurl_timeout_secs: u64,

    /// Speedtest executable.
    #[arg(long, default_value = "speedtest-cli")]
    speedtest_command: String,

    /// Arguments passed to the speedtest executable.
    #[arg(long = "speedtest-arg", default_values_t = ["--json".to_string()], allow_hyphen_values = true)]
    speedtest_args: Vec<String>,

    /// Timeout for a single speedtest in seconds.
    #[arg(long, default_value = "180")]
    speedtest_timeout_secs: u64,
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        let window = RetentionPolicy::Window(self.retention_secs);
        StoreConfig {
            status: window,
            history: window,
            speedtest: self
                .speedtest_retention_secs
                .map_or(RetentionPolicy::RetainAll, RetentionPolicy::Window),
        }
    }

    fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            status_interval: Duration::from_secs(self.status_interval_secs),
            history_interval: Duration::from_secs(self.history_interval_secs),
            speedtest_interval: Duration::from_secs(self.speedtest_interval_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let settings = Arc::new(
        SettingsFile::load_or_create(&cli.settings)
            .with_context(|| format!("loading settings from {}", cli.settings.display()))?,
    );
    tracing::info!(path = %cli.settings.display(), settings = ?settings.get(), "settings loaded");

    let store = Arc::new(SeriesStore::new(cli.store_config()));

    let dish = GrpcurlDish::new(cli.dish_addr.clone())
        .with_program(cli.grpcurl.clone())
        .with_timeout(Duration::from_secs(cli.grpcurl_timeout_secs));
    let speedtester = SpeedtestCli::new(cli.speedtest_command.clone(), cli.speedtest_args.clone())
        .with_timeout(Duration::from_secs(cli.speedtest_timeout_secs));

    let poller = Arc::new(Poller::new(dish, speedtester, Arc::clone(&store), Arc::clone(&settings)));
    let mut tasks = poller.spawn(cli.poller_config());

    let monitor = Arc::new(Monitor::new(store, settings, LocalAddress::new(cli.dish_addr.clone())));
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&monitor)));
    let (updates, _) = tokio::sync::broadcast::channel(16);

    let state = api::AppState {
        monitor,
        poller,
        broadcaster: Arc::clone(&broadcaster),
        updates,
        push_interval: Duration::from_millis(cli.push_interval_ms),
    };
    let app = api::router(state, &cli.static_dir);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.bind, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, dish = %cli.dish_addr, static_dir = %cli.static_dir.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    broadcaster.stop().await;
    tasks.shutdown().await;
    tracing::info!("dishwatch-server exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
