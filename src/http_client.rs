use anyhow::Result as AnyResult;
use reqwest::header::HeaderName;
use reqwest::Method;
use std::sync::Arc;
use url::Url;

use crate::activity::ActivityTracker;
use crate::auth::{AuthEndpoint, CredentialStore, RefreshCoordinator, TokenPair};
use crate::authenticator::{authorize, RequestAuthenticator};
use crate::classifier::{EndpointClassifier, EndpointKind};
use crate::config::{Config, DEFAULT_SKIP_LOADER_HEADER};
use crate::error::{ApiError, Result};
use crate::request::{ApiResponse, OutgoingRequest};
use crate::session::{SessionGate, SessionTeardown};
use crate::transport::{HttpTransport, PipelineOutcome, Transport};

/// HTTP client for the marketplace API with bearer authentication
///
/// Every request goes through the same pipeline:
/// - public and external endpoints are dispatched as-is
/// - protected endpoints get the stored access token
/// - a 401 starts (or joins) the single in-flight token refresh and the
///   request is replayed once with the new token
/// - if no new token can be obtained the session is torn down
pub struct MarketplaceHttpClient {
    transport: Arc<dyn Transport>,
    classifier: Arc<EndpointClassifier>,
    authenticator: RequestAuthenticator,
    coordinator: RefreshCoordinator,
    session: SessionGate,
    store: Arc<dyn CredentialStore>,
    activity: ActivityTracker,
    skip_loader_header: HeaderName,
}

impl MarketplaceHttpClient {
    /// Assemble a pipeline from its collaborators
    pub fn new(
        classifier: EndpointClassifier,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        endpoint: Arc<dyn AuthEndpoint>,
        teardown: Arc<dyn SessionTeardown>,
    ) -> Self {
        let classifier = Arc::new(classifier);
        let session = SessionGate::new(store.clone(), teardown);

        Self {
            transport,
            authenticator: RequestAuthenticator::new(classifier.clone(), store.clone()),
            coordinator: RefreshCoordinator::new(store.clone(), endpoint, session.clone()),
            classifier,
            session,
            store,
            activity: ActivityTracker::new(),
            skip_loader_header: HeaderName::from_static(DEFAULT_SKIP_LOADER_HEADER),
        }
    }

    /// Build the pipeline over reqwest using the loaded configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn AuthEndpoint>,
        teardown: Arc<dyn SessionTeardown>,
    ) -> AnyResult<Self> {
        let classifier =
            EndpointClassifier::new(config.api_origin()?, config.public_endpoints.iter().cloned());
        let transport = Arc::new(HttpTransport::new(
            config.http_max_connections,
            config.http_connect_timeout,
            config.http_request_timeout,
        )?);

        Ok(Self::new(classifier, store, transport, endpoint, teardown)
            .with_skip_loader_header(config.skip_loader_header()?))
    }

    /// Header that opts a request out of activity tracking
    pub fn with_skip_loader_header(mut self, name: HeaderName) -> Self {
        self.skip_loader_header = name;
        self
    }

    /// Resolve an API-relative path, or accept an absolute URL as-is
    pub fn url(&self, target: &str) -> Result<Url> {
        if target.starts_with("http://") || target.starts_with("https://") {
            Url::parse(target).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", target, e)))
        } else {
            Ok(self.classifier.origin().join(target))
        }
    }

    /// Start building a request to `target`
    pub fn request(&self, method: Method, target: &str) -> Result<OutgoingRequest> {
        Ok(OutgoingRequest::new(method, self.url(target)?))
    }

    /// Send a request through the authenticated pipeline
    pub async fn send(&self, request: OutgoingRequest) -> Result<ApiResponse> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

        let (request, _activity) = if request.has_header(&self.skip_loader_header) {
            (request.without_header(&self.skip_loader_header), None)
        } else {
            (request, Some(self.activity.track()))
        };

        let kind = self.classifier.classify(request.url());
        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            url = %request.url(),
            endpoint = ?kind,
            "Dispatching request"
        );

        if kind != EndpointKind::Protected {
            return match self.transport.dispatch(&request).await {
                PipelineOutcome::Success(response) => Ok(response),
                PipelineOutcome::AuthFailure(response) => Err(ApiError::Unauthorized(response)),
                PipelineOutcome::OtherFailure(e) => Err(e.into()),
            };
        }

        let authenticated = self.authenticator.authenticate(&request);
        match self.transport.dispatch(&authenticated).await {
            PipelineOutcome::Success(response) => return Ok(response),
            PipelineOutcome::OtherFailure(e) => return Err(e.into()),
            PipelineOutcome::AuthFailure(_) => {}
        }

        tracing::warn!(
            request_id = %request_id,
            url = %request.url(),
            "Received 401, refreshing access token"
        );

        let Some(pair) = self.coordinator.begin_or_join_refresh().await else {
            tracing::warn!(request_id = %request_id, "Token refresh unavailable, session expired");
            return Err(ApiError::SessionExpired);
        };

        // Replay from the original request, exactly once
        let replay = authorize(&request, &pair.access_token);
        match self.transport.dispatch(&replay).await {
            PipelineOutcome::Success(response) => Ok(response),
            PipelineOutcome::AuthFailure(response) => {
                tracing::error!(
                    request_id = %request_id,
                    url = %request.url(),
                    "Request rejected again after token refresh"
                );
                Err(ApiError::ReplayRejected(response))
            }
            PipelineOutcome::OtherFailure(e) => Err(e.into()),
        }
    }

    /// Install a pair obtained from login or OTP verification
    pub fn establish_session(&self, pair: &TokenPair) -> AnyResult<()> {
        self.store.set_tokens(pair)?;
        self.session.rearm();
        tracing::info!("Session established");
        Ok(())
    }

    /// Forget the stored session without notifying the teardown handler
    pub fn logout(&self) -> AnyResult<()> {
        self.store.clear()?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> &SessionGate {
        &self.session
    }

    pub fn classifier(&self) -> &EndpointClassifier {
        &self.classifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::classifier::ApiOrigin;
    use crate::test_support::{CountingTeardown, FakeEndpoint, FakeTransport};
    use reqwest::header::{HeaderValue, AUTHORIZATION};
    use reqwest::StatusCode;
    use std::time::Duration;

    struct Harness {
        client: Arc<MarketplaceHttpClient>,
        store: Arc<MemoryCredentialStore>,
        transport: Arc<FakeTransport>,
        endpoint: Arc<FakeEndpoint>,
        teardown: Arc<CountingTeardown>,
    }

    fn harness(store: MemoryCredentialStore, transport: FakeTransport, endpoint: FakeEndpoint) -> Harness {
        let store = Arc::new(store);
        let transport = Arc::new(transport);
        let endpoint = Arc::new(endpoint);
        let teardown = Arc::new(CountingTeardown::default());
        let classifier = EndpointClassifier::with_defaults(
            ApiOrigin::parse("https://api.market.test/api/v1").unwrap(),
        );
        let client = MarketplaceHttpClient::new(
            classifier,
            store.clone(),
            transport.clone(),
            endpoint.clone(),
            teardown.clone(),
        );
        Harness {
            client: Arc::new(client),
            store,
            transport,
            endpoint,
            teardown,
        }
    }

    fn logged_in() -> MemoryCredentialStore {
        MemoryCredentialStore::with_tokens(&TokenPair::new("T1", "R1", 3600))
    }

    fn get(h: &Harness, path: &str) -> OutgoingRequest {
        h.client.request(Method::GET, path).unwrap()
    }

    /// Lets a held refresh finish once `rejections` 401s have been handed out
    async fn release_after(h: &Harness, rejections: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.transport.rejections() < rejections {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("requests never reached the refresh path");
        h.endpoint.release();
    }

    #[tokio::test]
    async fn test_valid_token_passes_through() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T1"),
            FakeEndpoint::rejecting(),
        );

        let response = h.client.send(get(&h, "orders")).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(h.transport.authorizations(), vec![Some("Bearer T1".to_string())]);
        assert_eq!(h.endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T2"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)).held(),
        );

        let (a, b, _) = tokio::join!(
            h.client.send(get(&h, "orders")),
            h.client.send(get(&h, "cart")),
            release_after(&h, 2),
        );

        assert_eq!(a.unwrap().status, StatusCode::OK);
        assert_eq!(b.unwrap().status, StatusCode::OK);
        assert_eq!(h.endpoint.calls(), 1);

        let replays: Vec<_> = h.transport.authorizations().into_iter().skip(2).collect();
        assert_eq!(
            replays,
            vec![Some("Bearer T2".to_string()), Some("Bearer T2".to_string())]
        );
        assert_eq!(h.store.access_token().as_deref(), Some("T2"));
        assert_eq!(h.store.refresh_token().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_many_concurrent_401s_single_refresh() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T2"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)).held(),
        );

        let sends = futures::future::join_all(
            (0..8).map(|i| h.client.send(get(&h, &format!("listings/{}", i)))),
        );
        let (results, _) = tokio::join!(sends, release_after(&h, 8));

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|r| r.status == StatusCode::OK)));
        assert_eq!(h.endpoint.calls(), 1);
        assert_eq!(h.transport.dispatched().len(), 16);
    }

    #[tokio::test]
    async fn test_failed_refresh_tears_down_once() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T2"),
            FakeEndpoint::rejecting().held(),
        );

        let sends = futures::future::join_all((0..3).map(|_| h.client.send(get(&h, "orders"))));
        let (results, _) = tokio::join!(sends, release_after(&h, 3));

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ApiError::SessionExpired))));
        assert_eq!(h.endpoint.calls(), 1);
        assert_eq!(h.teardown.count(), 1);
        assert!(h.store.access_token().is_none());
        // Nothing replayed
        assert_eq!(h.transport.dispatched().len(), 3);
    }

    #[tokio::test]
    async fn test_replay_rejection_is_terminal() {
        let h = harness(
            logged_in(),
            FakeTransport::rejecting_all(),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)),
        );

        let err = h.client.send(get(&h, "orders")).await.unwrap_err();

        assert!(matches!(err, ApiError::ReplayRejected(ref r) if r.status == StatusCode::UNAUTHORIZED));
        assert_eq!(h.endpoint.calls(), 1);
        assert_eq!(h.transport.dispatched().len(), 2);
        assert_eq!(h.teardown.count(), 0);
    }

    #[tokio::test]
    async fn test_public_endpoint_401_passes_through() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T1"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)),
        );

        let login = h
            .client
            .request(Method::POST, "auth/login")
            .unwrap()
            .json(serde_json::json!({"email": "a@b.test", "password": "wrong"}));
        let err = h.client.send(login).await.unwrap_err();

        match err {
            ApiError::Unauthorized(response) => assert_eq!(response.text(), "unauthorized"),
            other => panic!("expected pass-through 401, got {:?}", other),
        }
        assert_eq!(h.transport.authorizations(), vec![None]);
        assert_eq!(h.endpoint.calls(), 0);
        assert!(!h.client.coordinator().is_refreshing());
    }

    #[tokio::test]
    async fn test_external_request_never_authenticated() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T1"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)),
        );

        let cdn = h.client.request(Method::GET, "https://cdn.images.test/p/1.jpg").unwrap();
        let result = h.client.send(cdn).await;

        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
        assert_eq!(h.transport.authorizations(), vec![None]);
        assert_eq!(h.endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_tears_down_without_call() {
        let h = harness(
            MemoryCredentialStore::new(),
            FakeTransport::accepting("T1"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)),
        );

        let err = h.client.send(get(&h, "orders")).await.unwrap_err();

        assert!(err.is_session_expired());
        assert_eq!(h.transport.authorizations(), vec![None]);
        assert_eq!(h.endpoint.calls(), 0);
        assert_eq!(h.teardown.count(), 1);
    }

    #[tokio::test]
    async fn test_tokens_stored_after_teardown_are_cleared_on_failed_refresh() {
        let h = harness(
            MemoryCredentialStore::new(),
            FakeTransport::rejecting_all(),
            FakeEndpoint::rejecting(),
        );

        let err = h.client.send(get(&h, "orders")).await.unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(h.teardown.count(), 1);

        // Another process signs in through the shared store
        h.store.set_tokens(&TokenPair::new("T1", "R1", 3600)).unwrap();

        let err = h.client.send(get(&h, "orders")).await.unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(h.endpoint.calls(), 1);
        assert_eq!(h.teardown.count(), 2);
        assert!(h.store.access_token().is_none());
        assert!(h.store.refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_later_request_uses_refreshed_token() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T2"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)),
        );

        h.client.send(get(&h, "orders")).await.unwrap();
        h.client.send(get(&h, "profile")).await.unwrap();

        assert_eq!(
            h.transport.authorizations(),
            vec![
                Some("Bearer T1".to_string()),
                Some("Bearer T2".to_string()),
                Some("Bearer T2".to_string()),
            ]
        );
        assert_eq!(h.endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_passed_through() {
        let h = harness(
            logged_in(),
            FakeTransport::offline(),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)),
        );

        let err = h.client.send(get(&h, "orders")).await.unwrap_err();

        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(h.endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_replay_rebuilt_from_original_request() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T2"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)),
        );

        let request = h
            .client
            .request(Method::POST, "orders")
            .unwrap()
            .json(serde_json::json!({"listing": 9}));
        h.client.send(request.clone()).await.unwrap();

        let dispatched = h.transport.dispatched();
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[1].request_body(), request.request_body());
        assert_eq!(dispatched[1].method(), &Method::POST);
        assert_eq!(dispatched[1].headers().get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_skip_loader_header_stripped_and_untracked() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T1"),
            FakeEndpoint::rejecting(),
        );
        let mut rx = h.client.activity().subscribe();

        let quiet = get(&h, "notifications")
            .header(HeaderName::from_static("x-skip-loader"), HeaderValue::from_static("1"));
        h.client.send(quiet).await.unwrap();

        assert!(!rx.has_changed().unwrap());
        assert!(!h.transport.dispatched()[0].has_header(&HeaderName::from_static("x-skip-loader")));

        h.client.send(get(&h, "orders")).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(h.client.activity().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_activity_spans_refresh_and_replay() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T2"),
            FakeEndpoint::granting(TokenPair::new("T2", "R2", 3600)).held(),
        );

        let send = h.client.send(get(&h, "orders"));
        let observe = async {
            release_after(&h, 1).await;
            h.client.activity().in_flight()
        };
        let (result, in_flight_during_refresh) = tokio::join!(send, observe);

        assert!(result.is_ok());
        assert_eq!(in_flight_during_refresh, 1);
        assert_eq!(h.client.activity().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_establish_session_rearms_teardown() {
        let h = harness(
            MemoryCredentialStore::new(),
            FakeTransport::accepting("T5"),
            FakeEndpoint::rejecting(),
        );

        assert!(h.client.send(get(&h, "orders")).await.is_err());
        assert!(h.client.session().is_expired());

        h.client
            .establish_session(&TokenPair::new("T5", "R5", 3600))
            .unwrap();
        assert!(!h.client.session().is_expired());
        assert!(h.client.send(get(&h, "orders")).await.is_ok());

        h.client.logout().unwrap();
        assert!(h.store.access_token().is_none());
        assert_eq!(h.teardown.count(), 1);
    }

    #[test]
    fn test_url_resolution() {
        let h = harness(
            logged_in(),
            FakeTransport::accepting("T1"),
            FakeEndpoint::rejecting(),
        );
        assert_eq!(
            h.client.url("orders/7").unwrap().as_str(),
            "https://api.market.test/api/v1/orders/7"
        );
        assert_eq!(
            h.client.url("https://cdn.images.test/a.png").unwrap().as_str(),
            "https://cdn.images.test/a.png"
        );
        assert!(matches!(h.client.url("https://"), Err(ApiError::InvalidUrl(_))));
    }
}
