use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::header::HeaderName;
use std::path::PathBuf;

use crate::classifier::{ApiOrigin, DEFAULT_PUBLIC_ENDPOINTS};

/// Default header that keeps a request out of the loading indicator
pub const DEFAULT_SKIP_LOADER_HEADER: &str = "x-skip-loader";

/// Marketplace client - authenticated access to the marketplace API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the marketplace API (origin plus base path)
    #[arg(short = 'a', long, env = "API_BASE_URL")]
    pub api_base: Option<String>,

    /// Path to the SQLite credential store
    #[arg(short = 'd', long, env = "CREDENTIALS_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Send a one-time code to a phone number
    SendOtp {
        #[arg(long)]
        phone: String,
    },
    /// Log in with a one-time code
    VerifyOtp {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        code: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show whether a session is stored
    Status,
    /// Send one request through the authenticated pipeline
    Request {
        /// HTTP method
        method: String,
        /// API-relative path or absolute URL
        path: String,
        /// JSON body
        #[arg(long)]
        data: Option<String>,
        /// Keep this request out of the loading indicator
        #[arg(long)]
        no_loader: bool,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_base: String,
    pub public_endpoints: Vec<String>,

    // Credentials
    pub credentials_db_file: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Loading indicator
    pub skip_loader_header: String,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    /// Build configuration from parsed arguments plus environment-only settings
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            api_base: args
                .api_base
                .context("API_BASE_URL is required (use -a or set API_BASE_URL env var)")?,

            public_endpoints: std::env::var("PUBLIC_ENDPOINTS")
                .ok()
                .map(|s| parse_public_endpoints(&s))
                .unwrap_or_else(|| {
                    DEFAULT_PUBLIC_ENDPOINTS
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),

            credentials_db_file: args
                .db_file
                .map(|s| expand_tilde(&s))
                .or_else(default_db_path)
                .context("CREDENTIALS_DB_FILE is required (use -d or set CREDENTIALS_DB_FILE env var)")?,

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            skip_loader_header: std::env::var("SKIP_LOADER_HEADER")
                .unwrap_or_else(|_| DEFAULT_SKIP_LOADER_HEADER.to_string()),

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.api_origin()?;

        if self.public_endpoints.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("PUBLIC_ENDPOINTS contains an empty entry");
        }

        self.skip_loader_header()?;

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    /// API origin parsed from `api_base`; only absolute http(s) URLs are accepted
    pub fn api_origin(&self) -> Result<ApiOrigin> {
        let origin = ApiOrigin::parse(&self.api_base)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.api_base))?;

        let url = origin.as_url();
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            anyhow::bail!("API_BASE_URL must be an http(s) URL: {}", self.api_base);
        }

        Ok(origin)
    }

    pub fn skip_loader_header(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.skip_loader_header.as_bytes()).with_context(|| {
            format!(
                "SKIP_LOADER_HEADER is not a valid header name: {}",
                self.skip_loader_header
            )
        })
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Default credential store location under the platform data directory
fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("marketplace-client").join("credentials.sqlite3"))
}

/// Parse a comma-separated list of public endpoint fragments
fn parse_public_endpoints(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
