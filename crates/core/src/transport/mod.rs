//! Transport selection for the RTSP media session.
//!
//! RTSP negotiates where RTP media travels during SETUP (RFC 2326 §12.39):
//!
//! - **UDP** (`RTP/AVP`): best-effort datagrams on a separate port pair.
//!   Lowest latency, but loss and reordering are visible to the player and
//!   middleboxes frequently drop it.
//!
//! - **TCP** (`RTP/AVP/TCP;interleaved=0-1`): RTP framed with `$` onto the
//!   RTSP connection itself (RFC 2326 §10.12). Reliable and ordered.
//!
//! Which protocols are tried, and in what order, is decided by the
//! [`FallbackPolicy`]. The session client consults it while it retries; the
//! source only records the protocol the client finally reports.

pub mod fallback;

use std::fmt;
use std::str::FromStr;

pub use fallback::FallbackPolicy;

use crate::error::{Result, SourceError};

/// Concrete transport used to carry RTP media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    /// RTP over UDP (`RTP/AVP`).
    Udp,
    /// RTP interleaved on the RTSP TCP connection (`RTP/AVP/TCP`).
    Tcp,
}

impl TransportProtocol {
    /// Whether media delivery is reliable and ordered.
    ///
    /// ```
    /// use rtsp_source::TransportProtocol;
    ///
    /// assert!(TransportProtocol::Tcp.is_connection_oriented());
    /// assert!(!TransportProtocol::Udp.is_connection_oriented());
    /// ```
    pub fn is_connection_oriented(self) -> bool {
        matches!(self, Self::Tcp)
    }

    /// Transport specifier as written in the RTSP `Transport` header.
    pub fn profile(self) -> &'static str {
        match self {
            Self::Udp => "RTP/AVP",
            Self::Tcp => "RTP/AVP/TCP",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        })
    }
}

impl FromStr for TransportProtocol {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            other => Err(SourceError::InvalidTransport(other.to_string())),
        }
    }
}

/// Transport preference requested when the source is built.
///
/// The mode fixes the candidate priority list once, at policy construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Interleaved TCP first, then UDP.
    #[default]
    Automatic,
    /// UDP first, then interleaved TCP.
    PreferUdp,
    /// Interleaved TCP only.
    TcpOnly,
    /// UDP only.
    UdpOnly,
}

impl TransportMode {
    /// Candidate protocols in priority order.
    pub fn candidates(self) -> &'static [TransportProtocol] {
        use TransportProtocol::{Tcp, Udp};
        match self {
            Self::Automatic => &[Tcp, Udp],
            Self::PreferUdp => &[Udp, Tcp],
            Self::TcpOnly => &[Tcp],
            Self::UdpOnly => &[Udp],
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Automatic => "automatic",
            Self::PreferUdp => "prefer-udp",
            Self::TcpOnly => "tcp",
            Self::UdpOnly => "udp",
        })
    }
}

impl FromStr for TransportMode {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(Self::Automatic),
            "prefer-udp" => Ok(Self::PreferUdp),
            "tcp" => Ok(Self::TcpOnly),
            "udp" => Ok(Self::UdpOnly),
            other => Err(SourceError::InvalidTransport(other.to_string())),
        }
    }
}
