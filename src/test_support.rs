// Fakes shared by unit tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::auth::{AuthEndpoint, CredentialStore, MemoryCredentialStore, TokenPair};
use crate::request::{ApiResponse, OutgoingRequest};
use crate::session::SessionTeardown;
use crate::transport::{PipelineOutcome, Transport, TransportError, TransportErrorKind};

/// Auth endpoint with a fixed answer, optionally held open until released
pub(crate) struct FakeEndpoint {
    grant: Option<TokenPair>,
    hold: bool,
    gate: Notify,
    calls: AtomicUsize,
    presented: Mutex<Vec<String>>,
}

impl FakeEndpoint {
    pub fn granting(pair: TokenPair) -> Self {
        Self {
            grant: Some(pair),
            hold: false,
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
            presented: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            grant: None,
            ..Self::granting(TokenPair::new("", "", 0))
        }
    }

    pub fn held(mut self) -> Self {
        self.hold = true;
        self
    }

    /// Let one held refresh call finish
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthEndpoint for FakeEndpoint {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.presented.lock().unwrap().push(refresh_token.to_string());

        if self.hold {
            self.gate.notified().await;
        }

        self.grant
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Token refresh failed: 401 Unauthorized"))
    }
}

/// Transport that accepts exactly one bearer token and rejects everything else with 401
pub(crate) struct FakeTransport {
    accepted: Option<String>,
    offline: bool,
    dispatched: Mutex<Vec<OutgoingRequest>>,
    rejections: AtomicUsize,
}

impl FakeTransport {
    pub fn accepting(token: &str) -> Self {
        Self {
            accepted: Some(token.to_string()),
            offline: false,
            dispatched: Mutex::new(Vec::new()),
            rejections: AtomicUsize::new(0),
        }
    }

    pub fn rejecting_all() -> Self {
        Self {
            accepted: None,
            ..Self::accepting("")
        }
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::accepting("")
        }
    }

    pub fn dispatched(&self) -> Vec<OutgoingRequest> {
        self.dispatched.lock().unwrap().clone()
    }

    /// Authorization header of every dispatched request, in order
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.dispatched()
            .iter()
            .map(|r| {
                r.headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .collect()
    }

    pub fn rejections(&self) -> usize {
        self.rejections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn dispatch(&self, request: &OutgoingRequest) -> PipelineOutcome {
        self.dispatched.lock().unwrap().push(request.clone());

        if self.offline {
            return PipelineOutcome::OtherFailure(TransportError::new(
                TransportErrorKind::Timeout,
                "operation timed out",
            ));
        }

        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let expected = self.accepted.as_ref().map(|t| format!("Bearer {}", t));

        if presented.is_some() && presented == expected.as_deref() {
            PipelineOutcome::Success(ApiResponse::new(StatusCode::OK, "ok"))
        } else {
            self.rejections.fetch_add(1, Ordering::SeqCst);
            PipelineOutcome::AuthFailure(ApiResponse::new(StatusCode::UNAUTHORIZED, "unauthorized"))
        }
    }
}

/// Teardown handler that only counts
#[derive(Default)]
pub(crate) struct CountingTeardown {
    calls: AtomicUsize,
}

impl CountingTeardown {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SessionTeardown for CountingTeardown {
    fn on_session_expired(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Store that holds its initial pair but cannot persist a new one
pub(crate) struct ReadOnlyStore {
    inner: MemoryCredentialStore,
}

impl ReadOnlyStore {
    pub fn with_tokens(pair: &TokenPair) -> Self {
        Self {
            inner: MemoryCredentialStore::with_tokens(pair),
        }
    }
}

impl CredentialStore for ReadOnlyStore {
    fn access_token(&self) -> Option<String> {
        self.inner.access_token()
    }

    fn refresh_token(&self) -> Option<String> {
        self.inner.refresh_token()
    }

    fn set_tokens(&self, _pair: &TokenPair) -> anyhow::Result<()> {
        anyhow::bail!("attempt to write a readonly database")
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.inner.clear()
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.expires_at()
    }
}
