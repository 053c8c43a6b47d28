use std::sync::Arc;

use url::Url;

use super::RtspMediaSource;
use crate::drm::{DrmGate, DrmSessionManager, NoopDrmSessionManager};
use crate::error::{Result, SourceError};
use crate::events::SourceEventListener;
use crate::session::{HostContext, SessionClientFactory};
use crate::transport::TransportMode;

/// Immutable identity of a source: what to play and how it was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    uri: String,
    is_live: bool,
    transport_mode: TransportMode,
}

impl SourceDescriptor {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.transport_mode
    }
}

/// Configures and builds an [`RtspMediaSource`].
///
/// [`build`](Self::build) consumes the builder, so settings cannot change
/// after a source exists.
///
/// ```
/// # use std::io;
/// # use std::sync::Arc;
/// # use rtsp_source::{SessionClient, SessionClientFactory, SessionConfig};
/// # struct Factory;
/// # impl SessionClientFactory for Factory {
/// #     fn create(&self, _: SessionConfig) -> io::Result<Box<dyn SessionClient>> {
/// #         Err(io::Error::other("unused"))
/// #     }
/// # }
/// use rtsp_source::{RtspMediaSource, TransportMode};
///
/// let source = RtspMediaSource::builder(Arc::new(Factory))
///     .live(true)
///     .transport_mode(TransportMode::PreferUdp)
///     .build("rtsp://camera.local:8554/stream")
///     .unwrap();
/// assert!(source.is_live());
/// ```
pub struct SourceBuilder {
    factory: Arc<dyn SessionClientFactory>,
    is_live: bool,
    transport_mode: Option<TransportMode>,
    drm: Arc<dyn DrmSessionManager>,
    host: HostContext,
    listeners: Vec<Arc<dyn SourceEventListener>>,
}

impl SourceBuilder {
    pub fn new(factory: Arc<dyn SessionClientFactory>) -> Self {
        Self {
            factory,
            is_live: false,
            transport_mode: None,
            drm: Arc::new(NoopDrmSessionManager),
            host: HostContext::default(),
            listeners: Vec::new(),
        }
    }

    pub fn live(mut self, is_live: bool) -> Self {
        self.is_live = is_live;
        self
    }

    /// Override the factory's default transport mode.
    pub fn transport_mode(mut self, mode: TransportMode) -> Self {
        self.transport_mode = Some(mode);
        self
    }

    pub fn drm_session_manager(mut self, drm: Arc<dyn DrmSessionManager>) -> Self {
        self.drm = drm;
        self
    }

    pub fn host_context(mut self, host: HostContext) -> Self {
        self.host = host;
        self
    }

    /// Register a listener on the built source.
    pub fn event_listener(mut self, listener: Arc<dyn SourceEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate `uri` and build the source.
    pub fn build(self, uri: &str) -> Result<RtspMediaSource> {
        validate_uri(uri)?;

        let descriptor = SourceDescriptor {
            uri: uri.to_string(),
            is_live: self.is_live,
            transport_mode: self
                .transport_mode
                .unwrap_or_else(|| self.factory.transport_mode()),
        };

        let source = RtspMediaSource::new(
            descriptor,
            self.factory,
            DrmGate::new(self.drm),
            self.host,
        );
        for listener in self.listeners {
            source.add_event_listener(listener);
        }
        Ok(source)
    }
}

/// Accept `rtsp://` and `rtsps://` URIs with a non-empty host and a valid
/// port, if one is given. The scheme is matched case-insensitively.
fn validate_uri(uri: &str) -> Result<()> {
    let invalid = || SourceError::InvalidUri(uri.to_string());

    let parsed = Url::parse(uri).map_err(|error| {
        tracing::debug!(uri, %error, "rejecting unparseable uri");
        invalid()
    })?;
    if !matches!(parsed.scheme(), "rtsp" | "rtsps") {
        return Err(invalid());
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }
    Ok(())
}
