//! Content-decryption session management boundary.
//!
//! Key exchange is owned by the implementor. The source only brackets the
//! manager's lifetime: [`prepare`](DrmSessionManager::prepare) when the
//! source is prepared and [`release`](DrmSessionManager::release) when it is
//! released.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, SourceError};

/// External content-decryption session manager.
pub trait DrmSessionManager: Send + Sync {
    /// Acquire resources needed to open decryption sessions.
    fn prepare(&self);

    /// Release everything acquired by [`prepare`](Self::prepare).
    fn release(&self);
}

/// Manager used when the source is built without one. Does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDrmSessionManager;

impl DrmSessionManager for NoopDrmSessionManager {
    fn prepare(&self) {}

    fn release(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrmState {
    Unprepared,
    Prepared,
    Released,
}

/// Shared gate around the source's DRM manager.
///
/// Prepares the manager at most once and releases it at most once. Periods
/// reach the manager only through [`with`](Self::with), which holds the gate
/// open for the duration of the call; [`release`](Self::release) waits for
/// such calls to finish, so no period touches the manager after release.
#[derive(Clone)]
pub(crate) struct DrmGate {
    manager: Arc<dyn DrmSessionManager>,
    state: Arc<RwLock<DrmState>>,
}

impl DrmGate {
    pub(crate) fn new(manager: Arc<dyn DrmSessionManager>) -> Self {
        Self {
            manager,
            state: Arc::new(RwLock::new(DrmState::Unprepared)),
        }
    }

    /// Prepare the manager unless already prepared. No-op once released.
    pub(crate) fn acquire(&self) {
        let mut state = self.state.write();
        if *state == DrmState::Unprepared {
            self.manager.prepare();
            *state = DrmState::Prepared;
            tracing::debug!("DRM session manager prepared");
        }
    }

    /// Release the manager if it was prepared, and close the gate for good.
    pub(crate) fn release(&self) {
        let mut state = self.state.write();
        if *state == DrmState::Prepared {
            self.manager.release();
            tracing::debug!("DRM session manager released");
        }
        *state = DrmState::Released;
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&dyn DrmSessionManager) -> R) -> Result<R> {
        let state = self.state.read();
        match *state {
            DrmState::Prepared => Ok(f(self.manager.as_ref())),
            DrmState::Unprepared => Err(SourceError::NotPrepared),
            DrmState::Released => Err(SourceError::Released),
        }
    }
}
