// Single-flight token refresh
// At most one refresh call is in flight; every caller that arrives meanwhile joins it

use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};

use super::credentials::CredentialStore;
use super::refresh::AuthEndpoint;
use super::types::TokenPair;
use crate::session::SessionGate;

/// Pending refresh result, awaitable by any number of joiners
pub type SharedRefresh = Shared<BoxFuture<'static, Option<TokenPair>>>;

enum RefreshState {
    Idle,
    Refreshing(SharedRefresh),
}

/// Owns the refresh state and drives refresh calls
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn AuthEndpoint>,
    session: SessionGate,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Puts the coordinator back to `Idle` when the refresh task finishes,
/// including when it unwinds
struct SettleGuard {
    inner: Arc<Inner>,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        *self.inner.lock_state() = RefreshState::Idle;
        tracing::debug!("Token refresh settled");
    }
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn AuthEndpoint>,
        session: SessionGate,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                store,
                endpoint,
                session,
            }),
        }
    }

    /// Start a refresh, or join the one already running
    ///
    /// The check of the current state and the switch to `Refreshing` happen under
    /// one lock with no suspension in between, so of two simultaneous callers
    /// exactly one starts the refresh. Resolves to `None` when no new pair could be
    /// obtained; in that case the session has already been torn down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_or_join_refresh(&self) -> SharedRefresh {
        let mut state = self.inner.lock_state();

        if let RefreshState::Refreshing(pending) = &*state {
            tracing::debug!("Joining in-flight token refresh");
            return pending.clone();
        }

        let Some(refresh_token) = self.inner.store.refresh_token() else {
            drop(state);
            tracing::warn!("No refresh token available");
            self.inner.session.expire();
            return future::ready(None).boxed().shared();
        };

        let task = tokio::spawn(run_refresh(self.inner.clone(), refresh_token));
        let session = self.inner.session.clone();
        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Token refresh task failed: {}", e);
                    session.tear_down();
                    None
                }
            }
        }
        .boxed()
        .shared();

        *state = RefreshState::Refreshing(pending.clone());
        pending
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_state(), RefreshState::Refreshing(_))
    }
}

/// Body of the refresh task; the settle guard is dropped last
async fn run_refresh(inner: Arc<Inner>, refresh_token: String) -> Option<TokenPair> {
    let _settle = SettleGuard {
        inner: inner.clone(),
    };

    let pair = match inner.endpoint.refresh(&refresh_token).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!("Token refresh failed: {:#}", e);
            inner.session.tear_down();
            return None;
        }
    };

    if let Err(e) = inner.store.set_tokens(&pair) {
        tracing::error!("Failed to store refreshed tokens: {:#}", e);
        inner.session.tear_down();
        return None;
    }

    inner.session.rearm();
    let prefix: String = pair.access_token.chars().take(8).collect();
    tracing::info!("Access token refreshed ({}...)", prefix);
    Some(pair)
}
