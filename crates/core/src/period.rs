//! Playable periods bound to the source's live session.
//!
//! A [`Period`] is created by
//! [`RtspMediaSource::create_period`](crate::RtspMediaSource::create_period)
//! and handed back through
//! [`release_period`](crate::RtspMediaSource::release_period). Several
//! periods may share one session over its life, e.g. one per seek.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::drm::{DrmGate, DrmSessionManager};
use crate::error::Result;
use crate::events::EventSink;
use crate::session::{SessionHandle, SessionId};

/// Default size of one buffer segment handed out by [`DefaultAllocator`].
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;

/// Identifies a period within its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodId(pub u64);

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "period-{}", self.0)
    }
}

/// Source of media buffer memory for a period.
pub trait Allocator: Send + Sync {
    /// Length of each segment returned by [`allocate`](Self::allocate).
    fn individual_allocation_length(&self) -> usize;

    fn allocate(&self) -> Vec<u8> {
        vec![0; self.individual_allocation_length()]
    }
}

/// Allocator handing out fixed-size zeroed segments.
#[derive(Debug, Clone, Copy)]
pub struct DefaultAllocator {
    segment_size: usize,
}

impl DefaultAllocator {
    pub fn new(segment_size: usize) -> Self {
        Self { segment_size }
    }
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_SIZE)
    }
}

impl Allocator for DefaultAllocator {
    fn individual_allocation_length(&self) -> usize {
        self.segment_size
    }
}

/// A playback attempt over the source's session.
pub struct Period {
    id: PeriodId,
    start_position: Duration,
    session: Arc<SessionHandle>,
    events: EventSink,
    drm: DrmGate,
    allocator: Arc<dyn Allocator>,
}

impl Period {
    pub(crate) fn new(
        id: PeriodId,
        start_position: Duration,
        session: Arc<SessionHandle>,
        events: EventSink,
        drm: DrmGate,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        tracing::debug!(
            period = %id,
            session_id = %session.id(),
            ?start_position,
            "period created"
        );
        Self {
            id,
            start_position,
            session,
            events,
            drm,
            allocator,
        }
    }

    pub fn id(&self) -> PeriodId {
        self.id
    }

    pub fn start_position(&self) -> Duration {
        self.start_position
    }

    /// Session this period reads from.
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Whether the underlying session has been torn down.
    pub fn is_session_released(&self) -> bool {
        self.session.is_released()
    }

    /// Sink bound to this period, for reporting load errors.
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Run `f` against the source's DRM session manager.
    ///
    /// Fails with [`SourceError::Released`](crate::SourceError::Released)
    /// once the source has been released.
    pub fn with_drm_session_manager<R>(
        &self,
        f: impl FnOnce(&dyn DrmSessionManager) -> R,
    ) -> Result<R> {
        self.drm.with(f)
    }

    pub(crate) fn release(self) {
        tracing::debug!(period = %self.id, session_id = %self.session.id(), "period released");
    }
}

impl fmt::Debug for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Period")
            .field("id", &self.id)
            .field("start_position", &self.start_position)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
