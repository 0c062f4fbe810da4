// Request transport
// Performs the network call and classifies the outcome

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::request::{ApiResponse, FormPart, OutgoingRequest, RequestBody};

/// Result of a single dispatch
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Any HTTP response other than 401, whatever its status
    Success(ApiResponse),
    /// HTTP 401
    AuthFailure(ApiResponse),
    /// The call never produced a response
    OtherFailure(TransportError),
}

/// Category of a transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Decode,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connection_failed",
            TransportErrorKind::Request => "request_error",
            TransportErrorKind::Body => "body_error",
            TransportErrorKind::Decode => "decode_error",
            TransportErrorKind::Other => "unknown",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network unreachable, timeout, or a request that could not be built
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if e.is_request() || e.is_builder() {
            TransportErrorKind::Request
        } else if e.is_body() {
            TransportErrorKind::Body
        } else if e.is_decode() {
            TransportErrorKind::Decode
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

/// Performs the actual network call
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, request: &OutgoingRequest) -> PipelineOutcome;
}

/// reqwest-backed transport with connection pooling
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(max_connections: usize, connect_timeout: u64, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &OutgoingRequest) -> Result<reqwest::Request, TransportError> {
        let builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());

        let builder = match request.request_body() {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::Binary {
                bytes,
                content_type,
            } => {
                let builder = builder.body(bytes.clone());
                match content_type {
                    Some(ct) if !request.has_content_type() => builder.header(CONTENT_TYPE, ct),
                    _ => builder,
                }
            }
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        builder.build().map_err(TransportError::from)
    }
}

fn build_form(parts: &[FormPart]) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for field in parts {
        let mut part = Part::bytes(field.data.to_vec());
        if let Some(ref file_name) = field.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(ref mime) = field.mime {
            part = part.mime_str(mime).map_err(TransportError::from)?;
        }
        form = form.part(field.name.clone(), part);
    }
    Ok(form)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, request: &OutgoingRequest) -> PipelineOutcome {
        let req = match self.build(request) {
            Ok(req) => req,
            Err(e) => return PipelineOutcome::OtherFailure(e),
        };

        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            "Sending HTTP request"
        );

        let response = match self.client.execute(req).await {
            Ok(response) => response,
            Err(e) => {
                let error = TransportError::from(e);
                tracing::warn!(
                    error_kind = error.kind.as_str(),
                    error = %error.message,
                    url = %request.url(),
                    "HTTP request error"
                );
                return PipelineOutcome::OtherFailure(error);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return PipelineOutcome::OtherFailure(TransportError::from(e)),
        };

        tracing::debug!(status = %status, "Received HTTP response");

        let response = ApiResponse {
            status,
            headers,
            body,
        };

        if status == StatusCode::UNAUTHORIZED {
            PipelineOutcome::AuthFailure(response)
        } else {
            PipelineOutcome::Success(response)
        }
    }
}
