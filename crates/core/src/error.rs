//! Error types for the RTSP media source.

use std::io;

/// Errors that can occur while driving an RTSP media source.
///
/// Variants map to specific failure modes across the lifecycle:
///
/// - **Session**: [`Io`](Self::Io), for synchronous open failures and errors
///   reported by the protocol session client.
/// - **Description**: [`UnsupportedMediaType`](Self::UnsupportedMediaType),
///   when the session described content this source cannot play.
/// - **Lifecycle**: [`NotPrepared`](Self::NotPrepared),
///   [`AlreadyPrepared`](Self::AlreadyPrepared),
///   [`Released`](Self::Released),
///   [`SourceUnavailable`](Self::SourceUnavailable).
/// - **Configuration**: [`InvalidUri`](Self::InvalidUri),
///   [`InvalidTransport`](Self::InvalidTransport).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Underlying I/O or session error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A period was requested before any protocol session existed.
    #[error("source not prepared: no protocol session")]
    NotPrepared,

    /// [`prepare`](crate::RtspMediaSource::prepare) was called outside the idle state.
    #[error("source already prepared")]
    AlreadyPrepared,

    /// The source has been released; no further lifecycle calls are accepted.
    #[error("source released")]
    Released,

    /// The refresh check found no live protocol session.
    #[error("source info unavailable: {0}")]
    SourceUnavailable(#[source] io::Error),

    /// The session described content of a type this source cannot play.
    #[error("media description type [{0}] is not supported")]
    UnsupportedMediaType(String),

    /// The resource identifier is not an `rtsp://` or `rtsps://` URI.
    #[error("invalid RTSP URI: {0}")]
    InvalidUri(String),

    /// A transport protocol or mode name that is not recognised.
    #[error("unknown transport: {0}")]
    InvalidTransport(String),
}

impl SourceError {
    /// Build the error surfaced by the refresh check when no session exists.
    pub(crate) fn unavailable() -> Self {
        Self::SourceUnavailable(io::Error::new(
            io::ErrorKind::NotConnected,
            "no protocol session",
        ))
    }
}

/// Convenience alias for `Result<T, SourceError>`.
pub type Result<T> = std::result::Result<T, SourceError>;
