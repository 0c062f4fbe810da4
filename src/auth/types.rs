// Authentication types

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds shaved off the server-reported lifetime
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Upper bound on a lifetime we are willing to represent (one year)
const MAX_EXPIRES_IN: i64 = 365 * 24 * 3600;

/// Access/refresh credential pair issued by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    pub expires_in: u64,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in,
        }
    }

    /// Absolute expiry, issued now, with a safety buffer
    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.expires_in)
            .unwrap_or(MAX_EXPIRES_IN)
            .min(MAX_EXPIRES_IN);
        Utc::now() + Duration::seconds((secs - EXPIRY_BUFFER_SECS).max(0))
    }
}

/// Session document kept by credential stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&TokenPair> for StoredSession {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            expires_at: Some(pair.expires_at()),
        }
    }
}

/// Refresh request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// OTP send request body
#[derive(Serialize)]
pub struct SendOtpRequest<'a> {
    pub phone: &'a str,
}

/// OTP verification request body
#[derive(Serialize)]
pub struct VerifyOtpRequest<'a> {
    pub phone: &'a str,
    pub otp: &'a str,
}

/// Token-bearing response of login, OTP verification and refresh
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Convert into a pair; all three fields must be present
    pub fn into_pair(self) -> Result<TokenPair> {
        if self.access_token.is_empty() {
            anyhow::bail!("Response does not contain accessToken");
        }

        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Response does not contain refreshToken"))?;
        let expires_in = self
            .expires_in
            .ok_or_else(|| anyhow::anyhow!("Response does not contain expiresIn"))?;

        Ok(TokenPair {
            access_token: self.access_token,
            refresh_token,
            expires_in,
        })
    }
}
