use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser;
use rtsp_source::{
    DefaultAllocator, PeriodId, RtspMediaSource, SessionClient, SessionClientFactory,
    SessionConfig, SourceEvent, SourceEventListener, TransportMode, TransportProtocol,
};

#[derive(Parser)]
#[command(
    name = "rtsp-source",
    about = "Drive an RTSP media source against a simulated session"
)]
struct Args {
    /// RTSP resource to open
    #[arg(long, short, default_value = "rtsp://127.0.0.1:8554/stream")]
    uri: String,

    /// Treat the stream as live
    #[arg(long)]
    live: bool,

    /// Transport mode (automatic, prefer-udp, tcp, udp)
    #[arg(long, short, default_value = "automatic")]
    transport: TransportMode,

    /// Duration reported by the session description; omit for unknown
    #[arg(long)]
    duration_secs: Option<f64>,

    /// Transport the simulated network rejects (repeatable)
    #[arg(long = "fail", value_name = "PROTOCOL")]
    failing: Vec<TransportProtocol>,

    /// Refuse the connection when the session is opened
    #[arg(long)]
    refuse: bool,

    /// Report the description as this unsupported media type
    #[arg(long, value_name = "TYPE")]
    unsupported: Option<String>,

    /// Time to keep the session open before releasing (ms)
    #[arg(long, default_value_t = 200)]
    hold_ms: u64,
}

/// What the simulated server and network do.
#[derive(Clone)]
struct Scenario {
    failing: Vec<TransportProtocol>,
    refuse: bool,
    duration: Option<Duration>,
    unsupported: Option<String>,
}

struct SimulatedFactory(Scenario);

impl SessionClientFactory for SimulatedFactory {
    fn create(&self, config: SessionConfig) -> io::Result<Box<dyn SessionClient>> {
        Ok(Box::new(SimulatedClient {
            config,
            scenario: self.0.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

/// Session client that negotiates against [`Scenario`] on a worker thread.
struct SimulatedClient {
    config: SessionConfig,
    scenario: Scenario,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SessionClient for SimulatedClient {
    fn open(&mut self) -> io::Result<()> {
        if self.scenario.refuse {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }

        let config = self.config.clone();
        let scenario = self.scenario.clone();
        let stop = self.stop.clone();
        self.worker = Some(thread::spawn(move || negotiate(config, scenario, stop)));
        Ok(())
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("session worker panicked");
        }
    }
}

fn negotiate(config: SessionConfig, scenario: Scenario, stop: Arc<AtomicBool>) {
    let listener = config.listener;

    let negotiated = loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let candidate = config.fallback_policy.lock().next_candidate();
        match candidate {
            Some(protocol) if scenario.failing.contains(&protocol) => {
                tracing::info!(%protocol, "SETUP rejected, falling back");
                config.fallback_policy.lock().candidate_failed(protocol);
            }
            Some(protocol) => break protocol,
            None => {
                listener.client_error(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no transport could be negotiated",
                ));
                return;
            }
        }
    };
    listener.transport_negotiated(negotiated);

    if stop.load(Ordering::SeqCst) {
        return;
    }
    if let Some(media_type) = &scenario.unsupported {
        listener.description_type_unsupported(media_type);
    }
    listener.description_refreshed(scenario.duration);
}

struct Printer;

impl SourceEventListener for Printer {
    fn on_event(&self, event: &SourceEvent) {
        match event {
            SourceEvent::TimelineRefreshed { timeline, .. } => println!(
                "timeline: duration={:?} seekable={} live={}",
                timeline.duration, timeline.seekable, timeline.live
            ),
            SourceEvent::LoadError(e) => println!("load error ({}): {}", e.kind, e.cause),
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let duration = match args.duration_secs.map(Duration::try_from_secs_f64).transpose() {
        Ok(duration) => duration,
        Err(e) => {
            eprintln!("Invalid --duration-secs: {}", e);
            return;
        }
    };

    let factory = SimulatedFactory(Scenario {
        failing: args.failing,
        refuse: args.refuse,
        duration,
        unsupported: args.unsupported,
    });

    let source = match RtspMediaSource::builder(Arc::new(factory))
        .live(args.live)
        .transport_mode(args.transport)
        .event_listener(Arc::new(Printer))
        .build(&args.uri)
    {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to build source: {}", e);
            return;
        }
    };

    if let Err(e) = source.prepare() {
        eprintln!("Failed to prepare source: {}", e);
        return;
    }

    thread::sleep(Duration::from_millis(args.hold_ms));

    if let Err(e) = source.maybe_throw_refresh_error() {
        eprintln!("Source unavailable: {}", e);
        return;
    }

    match source.create_period(
        PeriodId(0),
        Arc::new(DefaultAllocator::default()),
        Duration::ZERO,
    ) {
        Ok(period) => {
            println!(
                "period {} on session {} (state {:?}, transport {})",
                period.id(),
                period.session_id(),
                source.state(),
                source
                    .negotiated_transport()
                    .map_or_else(|| "unknown".to_string(), |p| p.profile().to_string())
            );
            source.release_period(period);
        }
        Err(e) => eprintln!("Failed to create period: {}", e),
    }

    source.release();
}
