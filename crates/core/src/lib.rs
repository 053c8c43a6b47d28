pub mod drm;
pub mod error;
pub mod events;
pub mod period;
pub mod registry;
pub mod session;
pub mod source;
pub mod timeline;
pub mod transport;

pub use drm::{DrmSessionManager, NoopDrmSessionManager};
pub use error::{Result, SourceError};
pub use events::{
    DataKind, EventSink, ListenerId, LoadErrorEvent, SourceEvent, SourceEventListener, SourceId,
};
pub use period::{Allocator, DefaultAllocator, Period, PeriodId};
pub use session::{
    HostContext, SessionClient, SessionClientFactory, SessionConfig, SessionEvent, SessionHandle,
    SessionId, SessionListener,
};
pub use source::{RtspMediaSource, SourceBuilder, SourceDescriptor, SourceState};
pub use timeline::Timeline;
pub use transport::{FallbackPolicy, TransportMode, TransportProtocol};
