//! Sweep scheduling engine.
//!
//! One blocking task walks the host list round-robin forever, probing each
//! host up to `retries + 1` times per visit and giving up on the first miss.
//! Every reply becomes an [`ObservationEvent`] on a bounded stream. A second
//! task counts finished visits and reports sweep-cycle progress on a fixed
//! tick.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arpwatch_core::{HostList, MacAddr, ObservationEvent};
use ipnet::Ipv4Net;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{DiscoverError, Result};
use crate::probe::Resolver;

/// Retries after the first probe of a visit.
pub const RETRIES: usize = 10;

/// Default deadline for one probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between progress reports.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables for a [`SweepScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    pub probe_timeout: Duration,
    pub retries: usize,
    pub heartbeat: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            probe_timeout: PROBE_TIMEOUT,
            retries: RETRIES,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

/// Sweep counters shared between the probing loop, the heartbeat, and
/// anyone who wants to watch.
#[derive(Debug, Default)]
pub struct SweepProgress {
    cycle: AtomicU64,
    completed_in_cycle: AtomicU64,
    visits_total: AtomicU64,
}

impl SweepProgress {
    /// Full sweeps completed so far.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    /// Visits finished since the last cycle boundary.
    pub fn completed_in_cycle(&self) -> u64 {
        self.completed_in_cycle.load(Ordering::Relaxed)
    }

    /// Visits finished since start.
    pub fn visits_total(&self) -> u64 {
        self.visits_total.load(Ordering::Relaxed)
    }
}

struct Tasks {
    prober: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// Round-robin ARP sweeper over one subnet.
pub struct SweepScheduler<R> {
    hosts: Arc<[Ipv4Addr]>,
    network: Ipv4Net,
    resolver: Arc<R>,
    options: SweepOptions,
    cancel: CancellationToken,
    progress: Arc<SweepProgress>,
    started: bool,
    tasks: Option<Tasks>,
}

impl<R: Resolver> SweepScheduler<R> {
    pub fn new(
        hosts: HostList,
        resolver: R,
        options: SweepOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if hosts.is_empty() {
            return Err(DiscoverError::EmptySubnet {
                cidr: hosts.network.to_string(),
            });
        }

        Ok(Self {
            hosts: hosts.hosts.into(),
            network: hosts.network,
            resolver: Arc::new(resolver),
            options,
            cancel,
            progress: Arc::new(SweepProgress::default()),
            started: false,
            tasks: None,
        })
    }

    pub fn progress(&self) -> Arc<SweepProgress> {
        self.progress.clone()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Spawn the probing and heartbeat loops and hand back the observation
    /// stream. The stream holds one event per host; a slow consumer blocks
    /// the prober.
    ///
    /// Must be called from within a tokio runtime, at most once.
    pub fn start(&mut self) -> Result<mpsc::Receiver<ObservationEvent>> {
        if self.started {
            return Err(DiscoverError::AlreadyStarted);
        }
        self.started = true;

        let capacity = self.hosts.len();
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (done_tx, done_rx) = mpsc::channel(capacity);

        tracing::info!(cidr = %self.network, count = capacity, "Starting sweeper");

        let prober = Prober {
            hosts: self.hosts.clone(),
            network: self.network,
            resolver: self.resolver.clone(),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
            runtime: Handle::current(),
            events: events_tx,
            done: done_tx,
        };
        let span = tracing::Span::current();
        let prober = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            prober.run();
        });

        let heartbeat = tokio::spawn(
            run_heartbeat(
                capacity as u64,
                done_rx,
                self.options.heartbeat,
                self.cancel.clone(),
                self.progress.clone(),
            )
            .in_current_span(),
        );

        self.tasks = Some(Tasks { prober, heartbeat });
        Ok(events_rx)
    }

    /// Cancel both loops and wait for them to exit. No event is sent after
    /// this returns. Calling it again does nothing.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let Some(tasks) = self.tasks.take() else {
            return;
        };
        if let Err(e) = tasks.prober.await {
            tracing::error!(error = %e, "Probing task panicked");
        }
        if let Err(e) = tasks.heartbeat.await {
            tracing::error!(error = %e, "Heartbeat task panicked");
        }
        tracing::info!(
            cycle = self.progress.cycle(),
            visits = self.progress.visits_total(),
            "Sweeper stopped"
        );
    }
}

/// State owned by the blocking probing loop.
struct Prober<R> {
    hosts: Arc<[Ipv4Addr]>,
    network: Ipv4Net,
    resolver: Arc<R>,
    options: SweepOptions,
    cancel: CancellationToken,
    progress: Arc<SweepProgress>,
    runtime: Handle,
    events: mpsc::Sender<ObservationEvent>,
    done: mpsc::Sender<()>,
}

impl<R: Resolver> Prober<R> {
    fn run(self) {
        let mut index = 0;
        while !self.cancel.is_cancelled() {
            if index == self.hosts.len() {
                index = 0;
            }
            if !self.visit(self.hosts[index]) {
                break;
            }
            index += 1;
        }
        tracing::debug!("Probing loop stopped");
    }

    /// Probe one host until it stops answering or the retry budget is spent.
    /// Returns false once the sweep should end.
    fn visit(&self, ip: Ipv4Addr) -> bool {
        let mut responses: BTreeMap<MacAddr, u32> = BTreeMap::new();
        let mut keep_going = true;

        for _ in 0..=self.options.retries {
            if self.cancel.is_cancelled() {
                keep_going = false;
                break;
            }
            match self.resolver.resolve(ip, self.options.probe_timeout) {
                Ok(Some(mac)) => {
                    *responses.entry(mac).or_insert(0) += 1;
                    if !self.emit(ObservationEvent::new(ip, mac, self.network)) {
                        keep_going = false;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(ip = %ip, error = %e, "Probe failed");
                    break;
                }
            }
        }

        if responses.len() > 1 {
            tracing::warn!(
                ip = %ip,
                duplicates = responses.len(),
                "duplicate mac address responded"
            );
            for (mac, count) in &responses {
                tracing::warn!(ip = %ip, hw_addr = %mac, count, "duplicate responder");
            }
        }

        self.progress.visits_total.fetch_add(1, Ordering::Relaxed);
        // The heartbeat may already be gone during shutdown.
        let _ = self.done.blocking_send(());

        keep_going
    }

    /// Push one event, waiting for room. Returns false if cancelled or the
    /// consumer is gone.
    fn emit(&self, event: ObservationEvent) -> bool {
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = self.events.send(event) => sent.is_ok(),
            }
        })
    }
}

async fn run_heartbeat(
    total: u64,
    mut done: mpsc::Receiver<()>,
    period: Duration,
    cancel: CancellationToken,
    progress: Arc<SweepProgress>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(()) = done.recv() => {
                progress.completed_in_cycle.fetch_add(1, Ordering::Relaxed);
            }
            _ = ticker.tick() => report_progress(total, &progress),
        }
    }
    tracing::debug!("Heartbeat stopped");
}

/// Roll completed visits into whole cycles and log where the sweep stands.
fn report_progress(total: u64, progress: &SweepProgress) {
    let completed = progress.completed_in_cycle();
    let cycles = completed / total;

    if cycles > 0 {
        progress
            .completed_in_cycle
            .fetch_sub(cycles * total, Ordering::Relaxed);
        let cycle = progress.cycle.fetch_add(cycles, Ordering::Relaxed) + cycles;
        tracing::info!(cycle, "starting cycle");
    } else {
        tracing::info!(
            remaining = total - completed,
            total,
            cycle = progress.cycle(),
            "Sweep progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use arpwatch_core::enumerate_hosts;

    use crate::error::ProbeError;

    /// Answers from a per-host script, then falls silent. Hosts listed in
    /// `always` answer every probe.
    #[derive(Default)]
    struct FakeResolver {
        scripts: Mutex<HashMap<Ipv4Addr, Vec<Option<MacAddr>>>>,
        always: HashMap<Ipv4Addr, MacAddr>,
        failing: Vec<Ipv4Addr>,
        calls: Arc<Mutex<Vec<Ipv4Addr>>>,
    }

    impl FakeResolver {
        fn script(self, ip: Ipv4Addr, answers: Vec<Option<MacAddr>>) -> Self {
            self.scripts.lock().unwrap().insert(ip, answers);
            self
        }

        fn always(mut self, ip: Ipv4Addr, mac: MacAddr) -> Self {
            self.always.insert(ip, mac);
            self
        }

        fn failing(mut self, ip: Ipv4Addr) -> Self {
            self.failing.push(ip);
            self
        }
    }

    impl Resolver for FakeResolver {
        fn resolve(
            &self,
            target: Ipv4Addr,
            _timeout: Duration,
        ) -> std::result::Result<Option<MacAddr>, ProbeError> {
            self.calls.lock().unwrap().push(target);

            if self.failing.contains(&target) {
                std::thread::sleep(Duration::from_millis(1));
                return Err(ProbeError::UnsupportedChannel);
            }
            if let Some(mac) = self.always.get(&target) {
                return Ok(Some(*mac));
            }
            let answer = {
                let mut scripts = self.scripts.lock().unwrap();
                match scripts.get_mut(&target) {
                    Some(script) if !script.is_empty() => script.remove(0),
                    _ => None,
                }
            };
            if answer.is_none() {
                // Keep an all-silent sweep from spinning.
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(answer)
        }
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, last)
    }

    fn fast_options() -> SweepOptions {
        SweepOptions {
            probe_timeout: Duration::from_millis(5),
            retries: RETRIES,
            heartbeat: Duration::from_millis(20),
        }
    }

    /// 10.0.0.1 and 10.0.0.2.
    fn two_hosts() -> (HostList, Ipv4Addr, Ipv4Addr) {
        let list = enumerate_hosts("10.0.0.0/30").unwrap();
        let (a, b) = (list.hosts[0], list.hosts[1]);
        (list, a, b)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_visit_ends_on_first_miss() {
        let (hosts, a, b) = two_hosts();
        let resolver = FakeResolver::default().script(a, vec![Some(mac(1)), None]);
        let calls = resolver.calls.clone();

        let mut sweeper =
            SweepScheduler::new(hosts, resolver, fast_options(), CancellationToken::new())
                .unwrap();
        let mut events = sweeper.start().unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.ip, a);
        assert_eq!(first.mac, mac(1));
        assert_eq!(first.subnet.to_string(), "10.0.0.0/30");

        wait_for(|| calls.lock().unwrap().len() >= 5).await;
        sweeper.stop().await;

        let calls = calls.lock().unwrap();
        assert_eq!(&calls[..5], &[a, a, b, a, b]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_answering_host_gets_full_retry_budget() {
        let (hosts, a, b) = two_hosts();
        let resolver = FakeResolver::default().always(a, mac(1));
        let calls = resolver.calls.clone();

        let mut sweeper =
            SweepScheduler::new(hosts, resolver, fast_options(), CancellationToken::new())
                .unwrap();
        let mut events = sweeper.start().unwrap();

        for _ in 0..=RETRIES {
            let event = events.recv().await.unwrap();
            assert_eq!(event.ip, a);
        }
        // The next visit of `a` starts only after `b` has been probed.
        let next = events.recv().await.unwrap();
        assert_eq!(next.ip, a);

        sweeper.stop().await;

        let calls = calls.lock().unwrap();
        assert!(calls[..=RETRIES].iter().all(|ip| *ip == a));
        assert_eq!(calls[RETRIES + 1], b);
        assert_eq!(calls[RETRIES + 2], a);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duplicate_responders_emit_every_reply() {
        let (hosts, a, _) = two_hosts();
        let resolver =
            FakeResolver::default().script(a, vec![Some(mac(1)), Some(mac(2)), Some(mac(1))]);

        let mut sweeper =
            SweepScheduler::new(hosts, resolver, fast_options(), CancellationToken::new())
                .unwrap();
        let mut events = sweeper.start().unwrap();

        let mut macs = Vec::new();
        for _ in 0..3 {
            macs.push(events.recv().await.unwrap().mac);
        }
        sweeper.stop().await;

        assert_eq!(macs, vec![mac(1), mac(2), mac(1)]);
    }

    /// One captured log event: level plus every recorded field.
    #[derive(Debug, Clone)]
    struct Captured {
        level: tracing::Level,
        fields: HashMap<String, String>,
    }

    impl Captured {
        fn field(&self, name: &str) -> Option<&str> {
            self.fields.get(name).map(String::as_str)
        }
    }

    struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    #[derive(Clone, Default)]
    struct CaptureLayer {
        events: Arc<Mutex<Vec<Captured>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CaptureLayer {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut fields = HashMap::new();
            event.record(&mut FieldVisitor(&mut fields));
            self.events.lock().unwrap().push(Captured {
                level: *event.metadata().level(),
                fields,
            });
        }
    }

    #[test]
    fn test_duplicate_responders_are_warned_per_mac() {
        use tracing_subscriber::layer::SubscriberExt;

        let (hosts, a, _) = two_hosts();
        let resolver =
            FakeResolver::default().script(a, vec![Some(mac(1)), Some(mac(2)), Some(mac(1))]);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (done_tx, mut done_rx) = mpsc::channel(16);
        let prober = Prober {
            hosts: hosts.hosts.into(),
            network: hosts.network,
            resolver: Arc::new(resolver),
            options: fast_options(),
            cancel: CancellationToken::new(),
            progress: Arc::new(SweepProgress::default()),
            runtime: runtime.handle().clone(),
            events: events_tx,
            done: done_tx,
        };

        let capture = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let keep_going = tracing::subscriber::with_default(subscriber, || prober.visit(a));

        assert!(keep_going);
        assert_eq!(prober.progress.visits_total(), 1);
        assert!(done_rx.try_recv().is_ok());
        let mut emitted = 0;
        while events_rx.try_recv().is_ok() {
            emitted += 1;
        }
        assert_eq!(emitted, 3);

        let warnings: Vec<Captured> = capture
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == tracing::Level::WARN)
            .cloned()
            .collect();
        assert_eq!(warnings.len(), 3);

        let summary = &warnings[0];
        assert_eq!(summary.field("message"), Some("duplicate mac address responded"));
        assert_eq!(summary.field("ip"), Some("10.0.0.1"));
        assert_eq!(summary.field("duplicates"), Some("2"));

        let per_mac: HashMap<&str, &str> = warnings[1..]
            .iter()
            .map(|w| (w.field("hw_addr").unwrap(), w.field("count").unwrap()))
            .collect();
        assert_eq!(per_mac.len(), 2);
        assert_eq!(per_mac.get(mac(1).to_string().as_str()), Some(&"2"));
        assert_eq!(per_mac.get(mac(2).to_string().as_str()), Some(&"1"));
        assert!(warnings[1..].iter().all(|w| w.field("ip") == Some("10.0.0.1")));
    }

    #[test]
    fn test_single_responder_is_not_warned() {
        use tracing_subscriber::layer::SubscriberExt;

        let (hosts, a, _) = two_hosts();
        let resolver = FakeResolver::default().script(a, vec![Some(mac(1)), Some(mac(1))]);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (done_tx, _done_rx) = mpsc::channel(16);
        let prober = Prober {
            hosts: hosts.hosts.into(),
            network: hosts.network,
            resolver: Arc::new(resolver),
            options: fast_options(),
            cancel: CancellationToken::new(),
            progress: Arc::new(SweepProgress::default()),
            runtime: runtime.handle().clone(),
            events: events_tx,
            done: done_tx,
        };

        let capture = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::with_default(subscriber, || prober.visit(a));

        let warned = capture
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.level == tracing::Level::WARN);
        assert!(!warned);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_error_moves_to_next_host() {
        let (hosts, a, b) = two_hosts();
        let resolver = FakeResolver::default().failing(a).always(b, mac(2));

        let mut sweeper =
            SweepScheduler::new(hosts, resolver, fast_options(), CancellationToken::new())
                .unwrap();
        let mut events = sweeper.start().unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.ip, b);
        sweeper.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_twice_fails() {
        let (hosts, _, _) = two_hosts();
        let mut sweeper = SweepScheduler::new(
            hosts,
            FakeResolver::default(),
            fast_options(),
            CancellationToken::new(),
        )
        .unwrap();

        let _events = sweeper.start().unwrap();
        assert!(matches!(sweeper.start(), Err(DiscoverError::AlreadyStarted)));
        sweeper.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_closes_stream() {
        let (hosts, a, b) = two_hosts();
        let resolver = FakeResolver::default().always(a, mac(1)).always(b, mac(2));

        let mut sweeper =
            SweepScheduler::new(hosts, resolver, fast_options(), CancellationToken::new())
                .unwrap();
        let mut events = sweeper.start().unwrap();

        events.recv().await.unwrap();
        sweeper.stop().await;
        sweeper.stop().await;

        // Whatever was buffered drains, then the stream ends.
        let mut drained = 0;
        while events.recv().await.is_some() {
            drained += 1;
        }
        assert!(drained <= sweeper.host_count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parent_cancellation_stops_sweep() {
        let (hosts, a, _) = two_hosts();
        let resolver = FakeResolver::default().always(a, mac(1));
        let root = CancellationToken::new();

        let mut sweeper =
            SweepScheduler::new(hosts, resolver, fast_options(), root.child_token()).unwrap();
        let mut events = sweeper.start().unwrap();
        events.recv().await.unwrap();

        root.cancel();
        while events.recv().await.is_some() {}
        sweeper.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_heartbeat_counts_cycles() {
        let list = enumerate_hosts("10.0.0.0/29").unwrap();
        let mut sweeper = SweepScheduler::new(
            list,
            FakeResolver::default(),
            fast_options(),
            CancellationToken::new(),
        )
        .unwrap();
        let progress = sweeper.progress();
        let _events = sweeper.start().unwrap();

        wait_for(|| progress.cycle() >= 1).await;
        sweeper.stop().await;

        assert!(progress.visits_total() >= sweeper.host_count() as u64);
        assert!(progress.completed_in_cycle() < progress.visits_total());
    }

    #[test]
    fn test_empty_subnet_rejected() {
        let list = enumerate_hosts("10.0.0.0/31").unwrap();
        let result = SweepScheduler::new(
            list,
            FakeResolver::default(),
            SweepOptions::default(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(DiscoverError::EmptySubnet { .. })));
    }

    #[test]
    fn test_report_progress_rolls_over() {
        let progress = SweepProgress::default();
        progress.completed_in_cycle.store(7, Ordering::Relaxed);

        report_progress(3, &progress);
        assert_eq!(progress.cycle(), 2);
        assert_eq!(progress.completed_in_cycle(), 1);

        report_progress(3, &progress);
        assert_eq!(progress.cycle(), 2);
    }
}
