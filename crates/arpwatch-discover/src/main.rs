//! CLI entry point for the arpwatch subnet sweeper.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::{fmt, EnvFilter};

use arpwatch_core::enumerate_hosts;
use arpwatch_ledger::{spawn_watch, Ledger, PromRegistry};

use arpwatch_discover::config::{load_watch_config, WatchConfig};
use arpwatch_discover::exporter;
use arpwatch_discover::probe::ArpResolver;
use arpwatch_discover::scheduler::SweepScheduler;

#[derive(Parser)]
#[command(name = "arpwatch")]
#[command(about = "Watch a subnet for IP/MAC conflicts and export them as metrics")]
struct Cli {
    /// Interface to send ARP requests on.
    #[arg(short, long)]
    interface: Option<String>,

    /// Subnet to monitor (CIDR notation, e.g., 10.25.0.0/23).
    #[arg(long = "cidrs", alias = "cidr")]
    cidr: Option<String>,

    /// Port to serve metrics on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file prefix (default: arpwatch).
    #[arg(short, long, default_value = "arpwatch")]
    config: String,
}

impl Cli {
    /// Flags win over the config file and environment.
    fn apply(&self, config: &mut WatchConfig) {
        if let Some(interface) = &self.interface {
            config.interface = interface.clone();
        }
        if let Some(cidr) = &self.cidr {
            config.cidr = cidr.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut watch = load_watch_config(&cli.config)?;
    cli.apply(&mut watch);
    watch.validate()?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let span = tracing::info_span!(
        "arpwatch",
        hostname = %host,
        cidr = %watch.cidr,
        interface = %watch.interface
    );

    run(watch).instrument(span).await
}

async fn run(watch: WatchConfig) -> anyhow::Result<()> {
    let hosts = enumerate_hosts(&watch.cidr)?;
    let resolver = ArpResolver::for_interface(&watch.interface)?;

    let registry = Arc::new(PromRegistry::new());
    let ledger = Arc::new(Ledger::new(registry.clone()));
    let shutdown = CancellationToken::new();

    let mut sweeper = SweepScheduler::new(
        hosts,
        resolver,
        watch.sweep_options(),
        shutdown.child_token(),
    )?;
    let events = sweeper.start()?;

    let watcher = spawn_watch(ledger, events, shutdown.clone(), watch.metrics_interval());
    let exporter = tokio::spawn(
        exporter::serve_metrics(watch.metrics_addr(), registry, shutdown.clone())
            .in_current_span(),
    );

    tracing::info!("No news is good news...");

    wait_for_shutdown().await;
    tracing::info!("Shutting down");

    shutdown.cancel();
    sweeper.stop().await;
    watcher.join().await;
    if let Err(e) = exporter.await {
        tracing::error!(error = %e, "Metrics endpoint task panicked");
    }

    Ok(())
}

/// Resolve on SIGTERM or Ctrl-C.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to wait for Ctrl-C");
    }
}
