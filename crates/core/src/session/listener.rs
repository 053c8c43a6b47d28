use std::fmt;
use std::io;
use std::sync::Weak;
use std::time::Duration;

use super::SessionId;
use crate::transport::TransportProtocol;

/// Notification emitted by a session client.
#[derive(Debug)]
pub enum SessionEvent {
    /// The session description was parsed (or re-parsed). `None` means the
    /// presentation has no known duration.
    DescriptionRefreshed { duration: Option<Duration> },
    /// The description is of a type the client cannot play.
    DescriptionTypeUnsupported { media_type: String },
    /// The transport the session actually uses.
    TransportNegotiated(TransportProtocol),
    /// Asynchronous failure inside the session.
    ClientError(io::Error),
}

/// Receiver of session notifications on the source side.
pub(crate) trait SessionEventHandler: Send + Sync {
    fn handle_session_event(&self, session_id: SessionId, event: SessionEvent);
}

/// Handle a session client uses to notify its source.
///
/// Safe to clone and call from any thread. Holds only a weak reference, so
/// a client that outlives its source keeps nothing alive; notifications
/// sent after that are discarded.
#[derive(Clone)]
pub struct SessionListener {
    session_id: SessionId,
    target: Weak<dyn SessionEventHandler>,
}

impl SessionListener {
    pub(crate) fn new(session_id: SessionId, target: Weak<dyn SessionEventHandler>) -> Self {
        Self { session_id, target }
    }

    /// Session attempt this listener belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn notify(&self, event: SessionEvent) {
        match self.target.upgrade() {
            Some(target) => target.handle_session_event(self.session_id, event),
            None => tracing::trace!(
                session_id = %self.session_id,
                ?event,
                "source gone, notification dropped"
            ),
        }
    }

    pub fn description_refreshed(&self, duration: Option<Duration>) {
        self.notify(SessionEvent::DescriptionRefreshed { duration });
    }

    pub fn description_type_unsupported(&self, media_type: &str) {
        self.notify(SessionEvent::DescriptionTypeUnsupported {
            media_type: media_type.to_string(),
        });
    }

    pub fn transport_negotiated(&self, protocol: TransportProtocol) {
        self.notify(SessionEvent::TransportNegotiated(protocol));
    }

    pub fn client_error(&self, error: io::Error) {
        self.notify(SessionEvent::ClientError(error));
    }
}

impl fmt::Debug for SessionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionListener")
            .field("session_id", &self.session_id)
            .field("attached", &(self.target.strong_count() > 0))
            .finish()
    }
}
