//! Ledger loops: one task folds inbound events into the ledger, a second
//! recomputes metrics on a fixed tick.

use std::sync::Arc;

use arpwatch_core::ObservationEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::ledger::Ledger;
use crate::metrics::MetricsSink;

/// Production cadence for metric recomputation.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Handles to the ingestion and expiry tasks.
pub struct WatchHandle {
    ingest: JoinHandle<()>,
    expiry: JoinHandle<()>,
}

impl WatchHandle {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        for (task, handle) in [("ingest", self.ingest), ("expiry", self.expiry)] {
            if let Err(e) = handle.await {
                tracing::error!(task, error = %e, "Ledger task panicked");
            }
        }
    }
}

/// Start consuming `events` into `ledger` and recomputing metrics every
/// `tick`. Both loops exit when `cancel` fires; ingestion also exits when
/// the event stream closes.
pub fn spawn_watch<M>(
    ledger: Arc<Ledger<M>>,
    events: mpsc::Receiver<ObservationEvent>,
    cancel: CancellationToken,
    tick: Duration,
) -> WatchHandle
where
    M: MetricsSink + 'static,
{
    let ingest =
        tokio::spawn(run_ingest(ledger.clone(), events, cancel.clone()).in_current_span());
    let expiry = tokio::spawn(run_expiry(ledger, cancel, tick).in_current_span());
    WatchHandle { ingest, expiry }
}

async fn run_ingest<M: MetricsSink>(
    ledger: Arc<Ledger<M>>,
    mut events: mpsc::Receiver<ObservationEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => ledger.record(&event),
                None => {
                    tracing::debug!("Observation stream closed");
                    break;
                }
            },
        }
    }
    tracing::debug!("Ledger ingestion stopped");
}

async fn run_expiry<M: MetricsSink>(
    ledger: Arc<Ledger<M>>,
    cancel: CancellationToken,
    tick: Duration,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = ledger.recompute_metrics();
                tracing::trace!(
                    active_ips = snapshot.active_ips,
                    unique_macs = snapshot.unique_macs,
                    "Metrics recomputed"
                );
            }
        }
    }
    tracing::debug!("Ledger expiry stopped");
}
