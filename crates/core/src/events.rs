//! Outbound events: timeline publications and load errors.
//!
//! An [`EventSink`] forwards [`SourceEvent`]s to every registered
//! [`SourceEventListener`] in registration order. With no listeners it is a
//! no-op. A listener that panics is logged and skipped; the panic never
//! reaches the source.
//!
//! Listeners that must handle events on their own thread register a
//! [`std::sync::mpsc::Sender<SourceEvent>`], which implements
//! [`SourceEventListener`] by queueing a clone of each event.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use parking_lot::RwLock;

use crate::error::SourceError;
use crate::period::PeriodId;
use crate::timeline::Timeline;

static SOURCE_COUNTER: AtomicU64 = AtomicU64::new(0);
static LISTENER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of one [`RtspMediaSource`](crate::RtspMediaSource) instance.
///
/// Every event a source publishes carries its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) fn next() -> Self {
        Self(SOURCE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Handle returned by listener registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What was being loaded when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Opening the protocol session.
    MediaInitialization,
    /// The session description (SDP or otherwise).
    Manifest,
    /// Media delivery over an established session.
    Media,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::MediaInitialization => "media-initialization",
            Self::Manifest => "manifest",
            Self::Media => "media",
        })
    }
}

/// Structured load error.
#[derive(Debug, Clone)]
pub struct LoadErrorEvent {
    pub source_id: SourceId,
    /// Period the sink was bound to when the error was raised, if any.
    pub period_id: Option<PeriodId>,
    /// Resource being loaded.
    pub uri: String,
    pub kind: DataKind,
    pub cause: Arc<SourceError>,
    /// Always `false`: the source does not classify errors for retry.
    pub retryable: bool,
}

/// Event published by a source.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A new timeline replaced the previous one.
    TimelineRefreshed {
        source_id: SourceId,
        timeline: Timeline,
    },
    LoadError(LoadErrorEvent),
}

impl SourceEvent {
    pub fn source_id(&self) -> SourceId {
        match self {
            Self::TimelineRefreshed { source_id, .. } => *source_id,
            Self::LoadError(e) => e.source_id,
        }
    }
}

/// Observer of source events.
pub trait SourceEventListener: Send + Sync {
    fn on_event(&self, event: &SourceEvent);
}

impl SourceEventListener for mpsc::Sender<SourceEvent> {
    fn on_event(&self, event: &SourceEvent) {
        if self.send(event.clone()).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

type ListenerList = Vec<(ListenerId, Arc<dyn SourceEventListener>)>;

/// Forwarder from a source to its listeners.
///
/// Clones share one listener list. [`for_period`](Self::for_period) yields a
/// sink that stamps errors with a period id.
#[derive(Clone)]
pub struct EventSink {
    source_id: SourceId,
    period_id: Option<PeriodId>,
    listeners: Arc<RwLock<ListenerList>>,
}

impl EventSink {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            period_id: None,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn period_id(&self) -> Option<PeriodId> {
        self.period_id
    }

    /// A sink sharing this sink's listeners, bound to `period_id`.
    pub fn for_period(&self, period_id: PeriodId) -> Self {
        Self {
            source_id: self.source_id,
            period_id: Some(period_id),
            listeners: self.listeners.clone(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId {
        let id = ListenerId(LISTENER_COUNTER.fetch_add(1, Ordering::SeqCst));
        let mut listeners = self.listeners.write();
        listeners.push((id, listener));
        tracing::debug!(
            source_id = %self.source_id,
            total = listeners.len(),
            "event listener added"
        );
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    pub fn timeline_refreshed(&self, timeline: Timeline) {
        self.dispatch(SourceEvent::TimelineRefreshed {
            source_id: self.source_id,
            timeline,
        });
    }

    pub fn load_error(&self, uri: &str, kind: DataKind, cause: SourceError) {
        self.dispatch(SourceEvent::LoadError(LoadErrorEvent {
            source_id: self.source_id,
            period_id: self.period_id,
            uri: uri.to_string(),
            kind,
            cause: Arc::new(cause),
            retryable: false,
        }));
    }

    fn dispatch(&self, event: SourceEvent) {
        // Snapshot so a listener may (un)register others without deadlocking.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if delivered.is_err() {
                tracing::warn!(source_id = %self.source_id, "event listener panicked");
            } else {
                tracing::trace!(source_id = %self.source_id, "event delivered");
            }
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("source_id", &self.source_id)
            .field("period_id", &self.period_id)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
