// Remote authentication endpoint
// Token refresh plus the calls that establish a session

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::types::{
    LoginRequest, RefreshRequest, SendOtpRequest, TokenPair, TokenResponse, VerifyOtpRequest,
};
use crate::classifier::ApiOrigin;

const REFRESH_PATH: &str = "auth/refresh-token";
const LOGIN_PATH: &str = "auth/login";
const SEND_OTP_PATH: &str = "auth/send-otp";
const VERIFY_OTP_PATH: &str = "auth/verify-otp";

/// Exchanges a refresh token for a new pair
///
/// Any failure (rejection, transport error, timeout, unreadable body) is an
/// error; there is no partial success.
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair>;
}

/// Get machine fingerprint for User-Agent
fn get_machine_fingerprint() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// User-Agent sent on authentication calls
pub fn user_agent() -> String {
    format!(
        "marketplace-client/{}-{}",
        env!("CARGO_PKG_VERSION"),
        get_machine_fingerprint()
    )
}

/// Authentication endpoint of the marketplace API
pub struct HttpAuthEndpoint {
    client: Client,
    origin: ApiOrigin,
}

impl HttpAuthEndpoint {
    pub fn new(origin: ApiOrigin, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout))
            .user_agent(user_agent())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, origin })
    }

    pub fn with_client(origin: ApiOrigin, client: Client) -> Self {
        Self { client, origin }
    }

    /// Email/password login
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        tracing::info!("Logging in with email and password");
        let data = self
            .post_json(LOGIN_PATH, &LoginRequest { email, password }, "Login")
            .await?;
        data.into_pair()
    }

    /// Ask the API to text a one-time code
    pub async fn send_otp(&self, phone: &str) -> Result<()> {
        tracing::info!("Requesting one-time code");
        let url = self.origin.join(SEND_OTP_PATH);

        let response = self
            .client
            .post(url)
            .json(&SendOtpRequest { phone })
            .send()
            .await
            .context("Failed to send OTP request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OTP request failed: {} - {}", status, error_text);
        }

        Ok(())
    }

    /// Exchange a one-time code for a session
    pub async fn verify_otp(&self, phone: &str, otp: &str) -> Result<TokenPair> {
        let data = self
            .post_json(VERIFY_OTP_PATH, &VerifyOtpRequest { phone, otp }, "OTP verification")
            .await?;
        data.into_pair()
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        operation: &str,
    ) -> Result<TokenResponse> {
        let url = self.origin.join(path);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", operation))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed: {} - {}", operation, status, error_text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", operation))
    }
}

#[async_trait]
impl AuthEndpoint for HttpAuthEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        tracing::info!("Refreshing access token...");

        let data = self
            .post_json(REFRESH_PATH, &RefreshRequest { refresh_token }, "Token refresh")
            .await?;
        let pair = data.into_pair()?;

        tracing::info!(
            "Token refreshed, expires: {}",
            pair.expires_at().to_rfc3339()
        );

        Ok(pair)
    }
}
