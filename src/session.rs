// Session teardown
// Clears credentials and hands control back to the login surface, once per expiry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::auth::CredentialStore;

/// Returns the user to an unauthenticated state
pub trait SessionTeardown: Send + Sync {
    fn on_session_expired(&self);
}

impl<F> SessionTeardown for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_expired(&self) {
        (self)()
    }
}

/// Gate in front of the teardown handler
///
/// `expire` runs the teardown only for the first call after the last `rearm`,
/// so any number of requests made without credentials produce a single redirect.
/// `tear_down` always runs; a failed refresh cycle calls it exactly once.
#[derive(Clone)]
pub struct SessionGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    store: Arc<dyn CredentialStore>,
    handler: Arc<dyn SessionTeardown>,
    expired: AtomicBool,
}

impl SessionGate {
    pub fn new(store: Arc<dyn CredentialStore>, handler: Arc<dyn SessionTeardown>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                store,
                handler,
                expired: AtomicBool::new(false),
            }),
        }
    }

    /// Clear credentials and notify the handler; returns false if already torn down
    pub fn expire(&self) -> bool {
        if self.inner.expired.swap(true, Ordering::AcqRel) {
            tracing::debug!("Session already torn down");
            return false;
        }

        self.run_teardown();
        true
    }

    /// Clear credentials and notify the handler unconditionally
    pub fn tear_down(&self) {
        self.inner.expired.store(true, Ordering::Release);
        self.run_teardown();
    }

    fn run_teardown(&self) {
        tracing::warn!("Session expired, clearing credentials");
        if let Err(e) = self.inner.store.clear() {
            tracing::error!("Failed to clear credentials: {:#}", e);
        }
        self.inner.handler.on_session_expired();
    }

    /// Mark a fresh session as live
    pub fn rearm(&self) {
        self.inner.expired.store(false, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.inner.expired.load(Ordering::Acquire)
    }
}
