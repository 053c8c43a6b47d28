//! Boundary with the external RTSP protocol session client.
//!
//! The protocol exchange itself (OPTIONS/DESCRIBE/SETUP/PLAY, RTP and RTCP)
//! belongs to the client. The source only:
//!
//! - builds one client per prepare through a [`SessionClientFactory`],
//!   handing it a [`SessionConfig`];
//! - calls [`SessionClient::open`] once and [`SessionClient::release`] once;
//! - consumes the client's asynchronous notifications through the
//!   [`SessionListener`] carried in the config.
//!
//! ## Session handle lifecycle
//!
//! ```text
//! prepare()          -> factory.create(config) -> open()
//! open() fails       -> release(), handle dropped
//! source.release()   -> release(), handle dropped
//! ```
//!
//! At most one live [`SessionHandle`] exists per source.

pub mod listener;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::registry;
use crate::transport::{FallbackPolicy, TransportMode};
pub use listener::{SessionEvent, SessionListener};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of one session attempt. Notifications carry it so that events
/// from a superseded attempt can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Host-side parameters passed through to the session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Value for the RTSP `User-Agent` header.
    pub user_agent: String,
}

impl Default for HostContext {
    fn default() -> Self {
        Self {
            user_agent: registry::MODULE.user_agent(),
        }
    }
}

/// Everything a session client needs at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub uri: String,
    pub listener: SessionListener,
    /// Shared with the source for its whole lifetime. Candidates excluded
    /// during one attempt stay excluded in later attempts.
    pub fallback_policy: Arc<Mutex<FallbackPolicy>>,
    pub host: HostContext,
}

/// A protocol session owned by the source.
pub trait SessionClient: Send {
    /// Start the session. Returns once the exchange is underway; progress
    /// is reported through the [`SessionListener`].
    fn open(&mut self) -> io::Result<()>;

    /// Tear the session down. Called at most once.
    fn release(&mut self);
}

/// Constructs session clients.
pub trait SessionClientFactory: Send + Sync {
    /// Transport mode used when the source does not request one.
    fn transport_mode(&self) -> TransportMode {
        TransportMode::Automatic
    }

    fn create(&self, config: SessionConfig) -> io::Result<Box<dyn SessionClient>>;
}

/// Live session owned by a source and shared with its periods.
///
/// Release is idempotent: the client sees exactly one
/// [`release`](SessionClient::release) call.
pub struct SessionHandle {
    id: SessionId,
    uri: String,
    client: Mutex<Box<dyn SessionClient>>,
    released: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, uri: &str, client: Box<dyn SessionClient>) -> Self {
        Self {
            id,
            uri: uri.to_string(),
            client: Mutex::new(client),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn open(&self) -> io::Result<()> {
        tracing::debug!(session_id = %self.id, uri = %self.uri, "opening session");
        self.client.lock().open()
    }

    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.lock().release();
        tracing::debug!(session_id = %self.id, "session released");
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("released", &self.is_released())
            .finish()
    }
}
