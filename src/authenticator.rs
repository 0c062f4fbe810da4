// Request authentication
// Attaches the current bearer token to requests bound for the protected API

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;

use crate::auth::CredentialStore;
use crate::classifier::{EndpointClassifier, EndpointKind};
use crate::request::OutgoingRequest;

/// Produces authenticated copies of outgoing requests
#[derive(Clone)]
pub struct RequestAuthenticator {
    classifier: Arc<EndpointClassifier>,
    store: Arc<dyn CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(classifier: Arc<EndpointClassifier>, store: Arc<dyn CredentialStore>) -> Self {
        Self { classifier, store }
    }

    /// Copy of `request` carrying the stored access token, when one applies
    ///
    /// External and public requests, and requests made while no token is
    /// stored, come back unchanged.
    pub fn authenticate(&self, request: &OutgoingRequest) -> OutgoingRequest {
        if self.classifier.classify(request.url()) != EndpointKind::Protected {
            return request.clone();
        }

        match self.store.access_token() {
            Some(token) => authorize(request, &token),
            None => {
                tracing::debug!(url = %request.url(), "No access token, sending unauthenticated");
                request.clone()
            }
        }
    }
}

/// Copy of `request` with `Authorization: Bearer <token>`
///
/// Non-opaque bodies also get `Content-Type: application/json` unless one is set.
pub fn authorize(request: &OutgoingRequest, token: &str) -> OutgoingRequest {
    let mut value = match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("Access token is not a valid header value, sending unauthenticated");
            return request.clone();
        }
    };
    value.set_sensitive(true);

    let mut headers = request.headers().clone();
    headers.insert(AUTHORIZATION, value);

    if !request.request_body().is_opaque() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    request.with_headers(headers)
}
