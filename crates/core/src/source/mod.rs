//! RTSP media source lifecycle.
//!
//! [`RtspMediaSource`] owns one protocol session at a time and republishes
//! what the session reports as a [`Timeline`] and load errors.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --prepare()--> Preparing --description refreshed--> Active
//!   ^                     |
//!   +-- open() failed ----+
//!
//! any state --release()--> Released (terminal)
//! ```
//!
//! Lifecycle calls come from the owning thread. Session notifications may
//! arrive from the client's I/O threads at any time; both paths serialize on
//! one lock. Notifications that arrive after [`release`](RtspMediaSource::release),
//! or that come from a session attempt other than the current one, are
//! dropped.
//!
//! State changes are decided under that lock; the resulting event is
//! published after it is dropped, under a separate reentrant dispatch lock.
//! `release()` takes the dispatch lock too, so once it returns nothing more is
//! published, and a listener may call back into the source (including
//! `release()`) from `on_event`.

mod builder;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};

pub use builder::{SourceBuilder, SourceDescriptor};

use crate::drm::DrmGate;
use crate::error::{Result, SourceError};
use crate::events::{DataKind, EventSink, ListenerId, SourceEventListener, SourceId};
use crate::period::{Allocator, Period, PeriodId};
use crate::session::listener::SessionEventHandler;
use crate::session::{
    HostContext, SessionClientFactory, SessionConfig, SessionEvent, SessionHandle, SessionId,
    SessionListener,
};
use crate::timeline::Timeline;
use crate::transport::{FallbackPolicy, TransportProtocol};

/// Lifecycle state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Built, or back here after a failed open.
    Idle,
    /// Session opened, no description published yet.
    Preparing,
    /// At least one timeline has been published.
    Active,
    /// Terminal.
    Released,
}

struct Inner {
    state: SourceState,
    /// Attempt whose notifications are accepted; set before the client is built.
    session_id: Option<SessionId>,
    session: Option<Arc<SessionHandle>>,
    transport: Option<TransportProtocol>,
    timeline: Option<Timeline>,
    /// Current sink, rebound to the latest period.
    events: EventSink,
}

/// Event decided under the state lock and published once it is dropped.
enum Pending {
    Timeline(Timeline),
    LoadError(DataKind, SourceError),
}

/// State shared with session listeners.
struct Shared {
    descriptor: SourceDescriptor,
    /// Held while publishing; always taken before `inner`.
    dispatch: ReentrantMutex<()>,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Publish `pending` on `sink`. The caller holds `dispatch` and not `inner`.
    fn publish(&self, sink: &EventSink, pending: Pending) {
        match pending {
            Pending::Timeline(timeline) => sink.timeline_refreshed(timeline),
            Pending::LoadError(kind, cause) => {
                sink.load_error(self.descriptor.uri(), kind, cause);
            }
        }
    }
}

impl SessionEventHandler for Shared {
    fn handle_session_event(&self, session_id: SessionId, event: SessionEvent) {
        let _dispatch = self.dispatch.lock();

        let (sink, pending) = {
            let mut inner = self.inner.lock();

            if inner.state == SourceState::Released {
                tracing::debug!(%session_id, ?event, "source released, notification dropped");
                return;
            }
            if inner.session_id != Some(session_id) {
                tracing::warn!(%session_id, ?event, "notification from stale session dropped");
                return;
            }

            let pending = match event {
                SessionEvent::DescriptionRefreshed { duration } => {
                    let timeline = Timeline::single_period(duration, self.descriptor.is_live());
                    inner.timeline = Some(timeline);
                    if inner.state == SourceState::Preparing {
                        inner.state = SourceState::Active;
                        let uri = self.descriptor.uri();
                        tracing::info!(%session_id, uri, "source active");
                    }
                    tracing::debug!(
                        %session_id,
                        duration_us = ?timeline.duration_us(),
                        seekable = timeline.seekable,
                        "timeline refreshed"
                    );
                    Pending::Timeline(timeline)
                }
                SessionEvent::DescriptionTypeUnsupported { media_type } => {
                    tracing::warn!(%session_id, %media_type, "unsupported media description");
                    Pending::LoadError(
                        DataKind::Manifest,
                        SourceError::UnsupportedMediaType(media_type),
                    )
                }
                SessionEvent::TransportNegotiated(protocol) => {
                    tracing::debug!(%session_id, %protocol, "transport negotiated");
                    inner.transport = Some(protocol);
                    return;
                }
                SessionEvent::ClientError(error) => {
                    tracing::warn!(%session_id, %error, "session client error");
                    Pending::LoadError(DataKind::Media, SourceError::Io(error))
                }
            };
            (inner.events.clone(), pending)
        };

        self.publish(&sink, pending);
    }
}

/// A media source backed by an RTSP protocol session.
///
/// Build one with [`RtspMediaSource::builder`]. Dropping the source releases
/// it.
pub struct RtspMediaSource {
    id: SourceId,
    shared: Arc<Shared>,
    factory: Arc<dyn SessionClientFactory>,
    fallback_policy: Arc<Mutex<FallbackPolicy>>,
    drm: DrmGate,
    host: HostContext,
    /// Unbound sink; owns the listener list every rebound sink shares.
    events: EventSink,
}

impl RtspMediaSource {
    pub fn builder(factory: Arc<dyn SessionClientFactory>) -> SourceBuilder {
        SourceBuilder::new(factory)
    }

    pub(crate) fn new(
        descriptor: SourceDescriptor,
        factory: Arc<dyn SessionClientFactory>,
        drm: DrmGate,
        host: HostContext,
    ) -> Self {
        let id = SourceId::next();
        let events = EventSink::new(id);
        let fallback_policy = FallbackPolicy::new(descriptor.transport_mode());

        tracing::debug!(
            source_id = %id,
            uri = descriptor.uri(),
            live = descriptor.is_live(),
            mode = %descriptor.transport_mode(),
            "source created"
        );

        Self {
            id,
            shared: Arc::new(Shared {
                descriptor,
                dispatch: ReentrantMutex::new(()),
                inner: Mutex::new(Inner {
                    state: SourceState::Idle,
                    session_id: None,
                    session: None,
                    transport: None,
                    timeline: None,
                    events: events.clone(),
                }),
            }),
            factory,
            fallback_policy: Arc::new(Mutex::new(fallback_policy)),
            drm,
            host,
            events,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.shared.descriptor
    }

    pub fn is_live(&self) -> bool {
        self.shared.descriptor.is_live()
    }

    pub fn state(&self) -> SourceState {
        self.shared.inner.lock().state
    }

    /// Most recently published timeline.
    pub fn timeline(&self) -> Option<Timeline> {
        self.shared.inner.lock().timeline
    }

    /// Transport the current session reported using.
    pub fn negotiated_transport(&self) -> Option<TransportProtocol> {
        self.shared.inner.lock().transport
    }

    /// Whether media is interleaved on the RTSP TCP connection.
    pub fn is_on_tcp(&self) -> bool {
        self.negotiated_transport() == Some(TransportProtocol::Tcp)
    }

    /// Fallback policy shared with the session client.
    pub fn fallback_policy(&self) -> Arc<Mutex<FallbackPolicy>> {
        self.fallback_policy.clone()
    }

    pub fn add_event_listener(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId {
        self.events.add_listener(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    /// Open a protocol session.
    ///
    /// Valid only from [`SourceState::Idle`]. A synchronous failure to build
    /// or open the session is reported once as a
    /// [`DataKind::MediaInitialization`] load error; the source then returns
    /// to `Idle` with no session and the call still succeeds.
    pub fn prepare(&self) -> Result<()> {
        let uri = self.shared.descriptor.uri();
        let session_id = SessionId::next();

        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                SourceState::Idle => {}
                SourceState::Released => return Err(SourceError::Released),
                SourceState::Preparing | SourceState::Active => {
                    return Err(SourceError::AlreadyPrepared);
                }
            }
            self.drm.acquire();
            inner.state = SourceState::Preparing;
            inner.session_id = Some(session_id);
            inner.transport = None;
            inner.events = self.events.clone();
        }

        tracing::info!(source_id = %self.id, %session_id, uri, "preparing source");

        // The lock stays free while the client is built and opened so it can
        // notify synchronously.
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let config = SessionConfig {
            uri: uri.to_string(),
            listener: SessionListener::new(session_id, shared),
            fallback_policy: self.fallback_policy.clone(),
            host: self.host.clone(),
        };
        let opened = self.factory.create(config).and_then(|client| {
            let handle = Arc::new(SessionHandle::new(session_id, uri, client));
            match handle.open() {
                Ok(()) => Ok(handle),
                Err(e) => {
                    handle.release();
                    Err(e)
                }
            }
        });

        let dispatch = self.shared.dispatch.lock();
        let mut inner = self.shared.inner.lock();
        match opened {
            Ok(handle) if inner.state == SourceState::Released => {
                drop(inner);
                drop(dispatch);
                handle.release();
                Err(SourceError::Released)
            }
            Ok(handle) => {
                inner.session = Some(handle);
                tracing::info!(source_id = %self.id, %session_id, "session opened");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(source_id = %self.id, %session_id, %error, "session open failed");
                // Whatever the dead attempt reported during open() goes with it.
                inner.session_id = None;
                inner.transport = None;
                inner.timeline = None;
                if inner.state == SourceState::Released {
                    return Ok(());
                }
                inner.state = SourceState::Idle;
                let sink = inner.events.clone();
                drop(inner);

                self.shared.publish(
                    &sink,
                    Pending::LoadError(DataKind::MediaInitialization, SourceError::Io(error)),
                );
                Ok(())
            }
        }
    }

    /// Fail if no live session exists.
    ///
    /// Called by the driver before trusting the timeline.
    pub fn maybe_throw_refresh_error(&self) -> Result<()> {
        if self.shared.inner.lock().session.is_some() {
            Ok(())
        } else {
            Err(SourceError::unavailable())
        }
    }

    /// Create a period over the current session.
    ///
    /// Load errors reported after this call carry `id`.
    pub fn create_period(
        &self,
        id: PeriodId,
        allocator: Arc<dyn Allocator>,
        start_position: Duration,
    ) -> Result<Period> {
        let mut inner = self.shared.inner.lock();
        if inner.state == SourceState::Released {
            return Err(SourceError::Released);
        }
        let session = inner.session.clone().ok_or(SourceError::NotPrepared)?;

        let events = self.events.for_period(id);
        inner.events = events.clone();

        Ok(Period::new(
            id,
            start_position,
            session,
            events,
            self.drm.clone(),
            allocator,
        ))
    }

    /// Release a period. The session is unaffected.
    pub fn release_period(&self, period: Period) {
        period.release();
    }

    /// Tear down the session and the DRM manager. Idempotent.
    pub fn release(&self) {
        let session = {
            // Waits out a publication in progress on another thread.
            let _dispatch = self.shared.dispatch.lock();
            let mut inner = self.shared.inner.lock();
            if inner.state == SourceState::Released {
                return;
            }
            inner.state = SourceState::Released;
            inner.session_id = None;
            inner.session.take()
        };

        // Outside the lock: a client may block in release() until its I/O
        // thread, possibly waiting on the lock to notify, has exited.
        self.drm.release();
        if let Some(session) = session {
            session.release();
        }

        tracing::info!(
            source_id = %self.id,
            uri = self.shared.descriptor.uri(),
            "source released"
        );
    }
}

impl Drop for RtspMediaSource {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RtspMediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtspMediaSource")
            .field("id", &self.id)
            .field("descriptor", &self.shared.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
