//! Integration tests: drive a source through its lifecycle against a fake
//! session client that records what the source asked of it.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use rtsp_source::{
    DataKind, DefaultAllocator, DrmSessionManager, FallbackPolicy, PeriodId, RtspMediaSource,
    SessionClient, SessionClientFactory, SessionConfig, SessionListener, SourceError, SourceEvent,
    SourceEventListener, SourceState, TransportMode, TransportProtocol,
};

type SharedPolicy = Arc<parking_lot::Mutex<FallbackPolicy>>;
type OpenHook = dyn Fn(&SessionListener, &SharedPolicy) -> io::Result<()> + Send + Sync;

const URI: &str = "rtsp://host/stream";

#[derive(Default)]
struct ClientLog {
    listeners: Mutex<Vec<SessionListener>>,
    policies: Mutex<Vec<SharedPolicy>>,
    user_agents: Mutex<Vec<String>>,
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl ClientLog {
    fn listener(&self, index: usize) -> SessionListener {
        self.listeners.lock().unwrap()[index].clone()
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeClient {
    listener: SessionListener,
    policy: SharedPolicy,
    hook: Arc<OpenHook>,
    client_log: Arc<ClientLog>,
}

impl SessionClient for FakeClient {
    fn open(&mut self) -> io::Result<()> {
        self.client_log.opened.fetch_add(1, Ordering::SeqCst);
        (self.hook)(&self.listener, &self.policy)
    }

    fn release(&mut self) {
        self.client_log.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeFactory {
    mode: TransportMode,
    fail_create: AtomicBool,
    hook: Arc<OpenHook>,
    client_log: Arc<ClientLog>,
}

impl SessionClientFactory for FakeFactory {
    fn transport_mode(&self) -> TransportMode {
        self.mode
    }

    fn create(&self, config: SessionConfig) -> io::Result<Box<dyn SessionClient>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad config"));
        }
        self.client_log
            .listeners
            .lock()
            .unwrap()
            .push(config.listener.clone());
        self.client_log
            .policies
            .lock()
            .unwrap()
            .push(config.fallback_policy.clone());
        self.client_log
            .user_agents
            .lock()
            .unwrap()
            .push(config.host.user_agent.clone());
        Ok(Box::new(FakeClient {
            listener: config.listener,
            policy: config.fallback_policy,
            hook: self.hook.clone(),
            client_log: self.client_log.clone(),
        }))
    }
}

fn fake_factory<F>(hook: F) -> (Arc<FakeFactory>, Arc<ClientLog>)
where
    F: Fn(&SessionListener, &SharedPolicy) -> io::Result<()> + Send + Sync + 'static,
{
    let client_log = Arc::new(ClientLog::default());
    let factory = Arc::new(FakeFactory {
        mode: TransportMode::Automatic,
        fail_create: AtomicBool::new(false),
        hook: Arc::new(hook),
        client_log: client_log.clone(),
    });
    (factory, client_log)
}

fn opens_ok() -> (Arc<FakeFactory>, Arc<ClientLog>) {
    fake_factory(|_, _| Ok(()))
}

#[derive(Default)]
struct RecordingDrm {
    prepared: AtomicUsize,
    released: AtomicUsize,
}

impl DrmSessionManager for RecordingDrm {
    fn prepare(&self) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn build(factory: Arc<FakeFactory>, live: bool) -> (RtspMediaSource, Receiver<SourceEvent>) {
    let (tx, rx) = mpsc::channel();
    let source = RtspMediaSource::builder(factory)
        .live(live)
        .event_listener(Arc::new(tx))
        .build(URI)
        .expect("valid uri");
    (source, rx)
}

fn drain(rx: &Receiver<SourceEvent>) -> Vec<SourceEvent> {
    rx.try_iter().collect()
}

/// Releases the source from inside `on_event` when a load error arrives.
#[derive(Default)]
struct ReleaseOnLoadError {
    source: OnceLock<Weak<RtspMediaSource>>,
    seen: AtomicUsize,
}

impl SourceEventListener for ReleaseOnLoadError {
    fn on_event(&self, event: &SourceEvent) {
        if let SourceEvent::LoadError(_) = event {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if let Some(source) = self.source.get().and_then(Weak::upgrade) {
                source.release();
            }
        }
    }
}

/// Counts events delivered after the test marked `release()` as returned.
struct LateEvents {
    release_returned: Arc<AtomicBool>,
    late: Arc<AtomicUsize>,
}

impl SourceEventListener for LateEvents {
    fn on_event(&self, _event: &SourceEvent) {
        if self.release_returned.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn refused_open_reports_one_initialization_error() {
    let (factory, client_log) = fake_factory(|_, _| {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    });
    let (source, rx) = build(factory, true);

    source.prepare().expect("open failure is not fatal");

    let events = drain(&rx);
    assert_eq!(events.len(), 1, "events: {events:?}");
    match &events[0] {
        SourceEvent::LoadError(e) => {
            assert_eq!(e.kind, DataKind::MediaInitialization);
            assert_eq!(e.uri, URI);
            assert_eq!(e.source_id, source.id());
            assert!(!e.retryable);
            assert!(e.cause.to_string().contains("connection refused"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(matches!(
        source.maybe_throw_refresh_error(),
        Err(SourceError::SourceUnavailable(_))
    ));
    assert_eq!(source.state(), SourceState::Idle);
    // The half-opened client was torn down.
    assert_eq!(client_log.released(), 1);
}

#[test]
fn failed_client_construction_reports_initialization_error() {
    let (factory, client_log) = opens_ok();
    factory.fail_create.store(true, Ordering::SeqCst);
    let (source, rx) = build(factory, false);

    source.prepare().unwrap();

    let events = drain(&rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SourceEvent::LoadError(e) if e.kind == DataKind::MediaInitialization
    ));
    assert_eq!(client_log.opened.load(Ordering::SeqCst), 0);
    assert!(source.maybe_throw_refresh_error().is_err());
}

#[test]
fn description_refresh_publishes_and_replaces_timeline() {
    let (factory, client_log) = opens_ok();
    let (source, rx) = build(factory, true);
    source.prepare().unwrap();
    assert_eq!(source.state(), SourceState::Preparing);
    assert!(source.maybe_throw_refresh_error().is_ok());

    let listener = client_log.listener(0);
    listener.description_refreshed(Some(Duration::from_micros(120_000_000)));

    let timeline = source.timeline().expect("timeline published");
    assert_eq!(timeline.duration, Some(Duration::from_secs(120)));
    assert!(timeline.seekable);
    assert!(timeline.live);
    assert!(!timeline.dynamic);
    assert_eq!(source.state(), SourceState::Active);

    listener.description_refreshed(None);
    let timeline = source.timeline().unwrap();
    assert_eq!(timeline.duration, None);
    assert!(!timeline.seekable);
    assert_eq!(source.state(), SourceState::Active);

    let published: Vec<_> = drain(&rx)
        .into_iter()
        .filter_map(|e| match e {
            SourceEvent::TimelineRefreshed { timeline, source_id } => {
                assert_eq!(source_id, source.id());
                Some(timeline)
            }
            SourceEvent::LoadError(_) => None,
        })
        .collect();
    assert_eq!(published.len(), 2);
    assert!(published[0].seekable);
    assert!(!published[1].seekable);
}

#[test]
fn notifications_after_release_change_nothing() {
    let (factory, client_log) = opens_ok();
    let (source, rx) = build(factory, false);
    source.prepare().unwrap();

    let listener = client_log.listener(0);
    listener.transport_negotiated(TransportProtocol::Udp);
    listener.description_refreshed(Some(Duration::from_secs(10)));
    let timeline = source.timeline();
    drain(&rx);

    source.release();

    listener.description_refreshed(None);
    listener.transport_negotiated(TransportProtocol::Tcp);
    listener.description_type_unsupported("application/mpd");
    listener.client_error(io::Error::other("late"));

    assert_eq!(source.timeline(), timeline);
    assert_eq!(source.negotiated_transport(), Some(TransportProtocol::Udp));
    assert!(drain(&rx).is_empty());
    assert_eq!(source.state(), SourceState::Released);
}

#[test]
fn release_tears_down_drm_and_session_exactly_once() {
    let (factory, client_log) = opens_ok();
    let drm = Arc::new(RecordingDrm::default());
    let source = RtspMediaSource::builder(factory)
        .drm_session_manager(drm.clone())
        .build(URI)
        .unwrap();

    source.prepare().unwrap();
    assert_eq!(drm.prepared.load(Ordering::SeqCst), 1);

    source.release();
    source.release();
    drop(source);

    assert_eq!(drm.released.load(Ordering::SeqCst), 1);
    assert_eq!(client_log.released(), 1);
}

#[test]
fn dropping_prepared_source_releases_session() {
    let (factory, client_log) = opens_ok();
    let (source, _rx) = build(factory, false);
    source.prepare().unwrap();

    drop(source);
    assert_eq!(client_log.released(), 1);
}

#[test]
fn create_period_before_prepare_is_a_precondition_error() {
    let (factory, _client_log) = opens_ok();
    let (source, _rx) = build(factory, false);

    let err = source
        .create_period(PeriodId(0), Arc::new(DefaultAllocator::default()), Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, SourceError::NotPrepared));

    let refresh = source.maybe_throw_refresh_error().unwrap_err();
    assert!(matches!(refresh, SourceError::SourceUnavailable(_)));
}

#[test]
fn periods_share_the_session_and_release_independently() {
    let (factory, client_log) = opens_ok();
    let (source, rx) = build(factory, false);
    source.prepare().unwrap();

    let allocator = Arc::new(DefaultAllocator::new(1024));
    let first = source
        .create_period(PeriodId(0), allocator.clone(), Duration::ZERO)
        .unwrap();
    let second = source
        .create_period(PeriodId(1), allocator, Duration::from_secs(30))
        .unwrap();

    assert_eq!(first.session_id(), second.session_id());
    assert_eq!(second.start_position(), Duration::from_secs(30));
    assert_eq!(second.allocator().allocate().len(), 1024);

    source.release_period(first);
    assert_eq!(client_log.released(), 0);
    assert!(!second.is_session_released());

    // Errors now carry the most recent period.
    client_log.listener(0).client_error(io::Error::other("rtp timeout"));
    match drain(&rx).pop() {
        Some(SourceEvent::LoadError(e)) => {
            assert_eq!(e.kind, DataKind::Media);
            assert_eq!(e.period_id, Some(PeriodId(1)));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    source.release();
    assert!(second.is_session_released());
    source.release_period(second);
}

#[test]
fn period_loses_drm_access_after_release() {
    let (factory, _client_log) = opens_ok();
    let drm = Arc::new(RecordingDrm::default());
    let source = RtspMediaSource::builder(factory)
        .drm_session_manager(drm)
        .build(URI)
        .unwrap();
    source.prepare().unwrap();

    let period = source
        .create_period(PeriodId(0), Arc::new(DefaultAllocator::default()), Duration::ZERO)
        .unwrap();
    assert!(period.with_drm_session_manager(|_| ()).is_ok());

    source.release();
    assert!(matches!(
        period.with_drm_session_manager(|_| ()),
        Err(SourceError::Released)
    ));
    assert!(matches!(
        source.create_period(PeriodId(1), Arc::new(DefaultAllocator::default()), Duration::ZERO),
        Err(SourceError::Released)
    ));
}

#[test]
fn unsupported_description_is_a_non_fatal_manifest_error() {
    let (factory, client_log) = opens_ok();
    let (source, rx) = build(factory, false);
    source.prepare().unwrap();

    client_log.listener(0).description_type_unsupported("application/mpd");

    let events = drain(&rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        SourceEvent::LoadError(e) => {
            assert_eq!(e.kind, DataKind::Manifest);
            assert_eq!(e.period_id, None);
            assert!(matches!(
                e.cause.as_ref(),
                SourceError::UnsupportedMediaType(t) if t == "application/mpd"
            ));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(client_log.released(), 0);
    assert!(source.maybe_throw_refresh_error().is_ok());
}

#[test]
fn client_error_is_forwarded_without_teardown() {
    let (factory, client_log) = opens_ok();
    let (source, rx) = build(factory, false);
    source.prepare().unwrap();

    client_log
        .listener(0)
        .client_error(io::Error::new(io::ErrorKind::TimedOut, "keepalive timeout"));

    let events = drain(&rx);
    assert!(matches!(
        &events[..],
        [SourceEvent::LoadError(e)] if e.kind == DataKind::Media
    ));
    assert_eq!(client_log.released(), 0);
    assert_eq!(source.state(), SourceState::Preparing);
}

#[test]
fn negotiated_transport_is_recorded() {
    let (factory, client_log) = opens_ok();
    let (source, _rx) = build(factory, false);
    source.prepare().unwrap();
    assert_eq!(source.negotiated_transport(), None);
    assert!(!source.is_on_tcp());

    client_log.listener(0).transport_negotiated(TransportProtocol::Tcp);

    assert_eq!(source.negotiated_transport(), Some(TransportProtocol::Tcp));
    assert!(source.is_on_tcp());
}

#[test]
fn prepare_is_only_valid_from_idle() {
    let (factory, _client_log) = opens_ok();
    let (source, _rx) = build(factory, false);

    source.prepare().unwrap();
    assert!(matches!(source.prepare(), Err(SourceError::AlreadyPrepared)));

    source.release();
    assert!(matches!(source.prepare(), Err(SourceError::Released)));
}

#[test]
fn retry_after_failed_open_keeps_drm_prepared_once_and_fallback_exclusions() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let (factory, client_log) = fake_factory(move |listener, policy| {
        let mut policy = policy.lock();
        let protocol = policy.next_candidate().ok_or_else(|| io::Error::other("exhausted"))?;
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            policy.candidate_failed(protocol);
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        }
        listener.transport_negotiated(protocol);
        Ok(())
    });
    let drm = Arc::new(RecordingDrm::default());
    let source = RtspMediaSource::builder(factory)
        .drm_session_manager(drm.clone())
        .build(URI)
        .unwrap();

    source.prepare().unwrap();
    assert_eq!(source.state(), SourceState::Idle);
    source.prepare().unwrap();

    assert_eq!(drm.prepared.load(Ordering::SeqCst), 1);
    assert_eq!(source.negotiated_transport(), Some(TransportProtocol::Udp));
    let policies = client_log.policies.lock().unwrap();
    assert!(Arc::ptr_eq(&policies[0], &policies[1]));
    assert!(Arc::ptr_eq(&policies[0], &source.fallback_policy()));
    assert!(policies[0].lock().has_failed(TransportProtocol::Tcp));
}

#[test]
fn notifications_from_a_superseded_session_are_dropped() {
    let fail_first = Arc::new(AtomicBool::new(true));
    let flag = fail_first.clone();
    let (factory, client_log) = fake_factory(move |_, _| {
        if flag.swap(false, Ordering::SeqCst) {
            Err(io::Error::other("first attempt fails"))
        } else {
            Ok(())
        }
    });
    let (source, rx) = build(factory, false);

    source.prepare().unwrap();
    source.prepare().unwrap();
    drain(&rx);

    let stale = client_log.listener(0);
    let current = client_log.listener(1);
    assert_ne!(stale.session_id(), current.session_id());

    stale.description_refreshed(Some(Duration::from_secs(5)));
    stale.transport_negotiated(TransportProtocol::Tcp);
    assert_eq!(source.timeline(), None);
    assert_eq!(source.negotiated_transport(), None);
    assert!(drain(&rx).is_empty());

    current.description_refreshed(Some(Duration::from_secs(5)));
    assert!(source.timeline().is_some());
}

#[test]
fn synchronous_notifications_during_open_are_applied() {
    let (factory, _client_log) = fake_factory(|listener, _| {
        listener.transport_negotiated(TransportProtocol::Tcp);
        listener.description_refreshed(Some(Duration::from_secs(60)));
        Ok(())
    });
    let (source, rx) = build(factory, false);

    source.prepare().unwrap();

    assert_eq!(source.state(), SourceState::Active);
    assert!(source.is_on_tcp());
    assert_eq!(drain(&rx).len(), 1);
}

#[test]
fn release_racing_with_notifications_stops_publication() {
    let (factory, client_log) = opens_ok();
    let release_returned = Arc::new(AtomicBool::new(false));
    let late = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let source = RtspMediaSource::builder(factory)
        .event_listener(Arc::new(LateEvents {
            release_returned: release_returned.clone(),
            late: late.clone(),
        }))
        .event_listener(Arc::new(tx))
        .build(URI)
        .unwrap();
    source.prepare().unwrap();

    let listener = client_log.listener(0);
    let io_thread = thread::spawn(move || {
        for i in 0..500u64 {
            listener.description_refreshed(Some(Duration::from_millis(i)));
        }
        listener
    });

    thread::sleep(Duration::from_millis(1));
    source.release();
    release_returned.store(true, Ordering::SeqCst);
    drain(&rx);

    let listener = io_thread.join().unwrap();
    listener.description_refreshed(None);

    assert_eq!(late.load(Ordering::SeqCst), 0, "published after release returned");
    assert!(drain(&rx).is_empty());
    assert_eq!(client_log.released(), 1);
}

#[test]
fn listener_can_release_the_source_from_on_event() {
    let (factory, client_log) = opens_ok();
    let teardown = Arc::new(ReleaseOnLoadError::default());
    let source = Arc::new(
        RtspMediaSource::builder(factory)
            .event_listener(teardown.clone())
            .build(URI)
            .unwrap(),
    );
    assert!(teardown.source.set(Arc::downgrade(&source)).is_ok());
    source.prepare().unwrap();

    let listener = client_log.listener(0);
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        listener.client_error(io::Error::new(io::ErrorKind::TimedOut, "keepalive timeout"));
        listener.client_error(io::Error::other("after teardown"));
        let _ = done_tx.send(());
    });

    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("client_error notification returned");
    assert_eq!(source.state(), SourceState::Released);
    assert_eq!(teardown.seen.load(Ordering::SeqCst), 1);
    assert_eq!(client_log.released(), 1);
}

#[test]
fn failed_open_forgets_what_the_attempt_reported() {
    let (factory, client_log) = fake_factory(|listener, _| {
        listener.transport_negotiated(TransportProtocol::Tcp);
        listener.description_refreshed(Some(Duration::from_secs(30)));
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset after DESCRIBE"))
    });
    let (source, rx) = build(factory, false);

    source.prepare().unwrap();

    assert_eq!(source.state(), SourceState::Idle);
    assert_eq!(source.timeline(), None);
    assert_eq!(source.negotiated_transport(), None);
    assert!(!source.is_on_tcp());
    assert!(source.maybe_throw_refresh_error().is_err());
    assert_eq!(client_log.released(), 1);
    assert!(matches!(
        drain(&rx).last(),
        Some(SourceEvent::LoadError(e)) if e.kind == DataKind::MediaInitialization
    ));
}

#[test]
fn builder_defaults_and_validation() {
    let (factory, client_log) = opens_ok();
    let source = RtspMediaSource::builder(factory.clone())
        .build("rtsp://camera.local:8554/live")
        .unwrap();
    assert_eq!(source.descriptor().transport_mode(), factory.mode);
    assert!(!source.is_live());

    source.prepare().unwrap();
    assert!(client_log.user_agents.lock().unwrap()[0].starts_with("rtsp-source/"));

    let err = RtspMediaSource::builder(factory.clone())
        .build("http://camera.local/live")
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidUri(_)));

    let source = RtspMediaSource::builder(factory.clone())
        .build("RTSP://camera.local/live")
        .unwrap();
    assert_eq!(source.descriptor().uri(), "RTSP://camera.local/live");
    assert!(matches!(
        RtspMediaSource::builder(factory.clone()).build("rtsp://camera.local:notaport/live"),
        Err(SourceError::InvalidUri(_))
    ));

    let source = RtspMediaSource::builder(factory)
        .transport_mode(TransportMode::UdpOnly)
        .build(URI)
        .unwrap();
    assert_eq!(source.descriptor().transport_mode(), TransportMode::UdpOnly);
    assert_eq!(
        source.fallback_policy().lock().remaining().collect::<Vec<_>>(),
        vec![TransportProtocol::Udp]
    );
}

#[test]
fn listeners_can_be_removed() {
    let (factory, client_log) = opens_ok();
    let source = RtspMediaSource::builder(factory).build(URI).unwrap();
    let (tx, rx) = mpsc::channel();
    let id = source.add_event_listener(Arc::new(tx));
    source.prepare().unwrap();

    client_log.listener(0).description_refreshed(None);
    assert_eq!(drain(&rx).len(), 1);

    assert!(source.remove_event_listener(id));
    client_log.listener(0).description_refreshed(None);
    assert!(drain(&rx).is_empty());
}
