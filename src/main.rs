use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use reqwest::header::HeaderValue;
use reqwest::Method;
use std::sync::Arc;

use marketplace_client::auth::{CredentialStore, HttpAuthEndpoint, SqliteCredentialStore};
use marketplace_client::config::{self, Command};
use marketplace_client::http_client::MarketplaceHttpClient;
use marketplace_client::request::ApiResponse;
use marketplace_client::session::SessionTeardown;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = config::Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("API base: {}", config.api_base);
    tracing::debug!(
        "Credential store: {}",
        config.credentials_db_file.display()
    );

    let store: Arc<dyn CredentialStore> =
        Arc::new(SqliteCredentialStore::open(&config.credentials_db_file)?);
    let auth = Arc::new(HttpAuthEndpoint::new(
        config.api_origin()?,
        config.http_request_timeout,
    )?);
    let teardown: Arc<dyn SessionTeardown> = Arc::new(redirect_to_login);

    let client =
        MarketplaceHttpClient::from_config(&config, store.clone(), auth.clone(), teardown)?;

    match command {
        Command::Login { email, password } => {
            let email = match email {
                Some(email) => email,
                None => Input::<String>::new()
                    .with_prompt("Email")
                    .interact_text()
                    .context("Failed to read email")?,
            };
            let password = match password {
                Some(password) => password,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };

            let pair = auth.login(&email, &password).await?;
            client.establish_session(&pair)?;
            println!("✅ Logged in (token expires {})", pair.expires_at().to_rfc3339());
        }

        Command::SendOtp { phone } => {
            auth.send_otp(&phone).await?;
            println!("✅ Code sent to {}", phone);
        }

        Command::VerifyOtp { phone, code } => {
            let code = match code {
                Some(code) => code,
                None => Input::<String>::new()
                    .with_prompt("One-time code")
                    .interact_text()
                    .context("Failed to read one-time code")?,
            };

            let pair = auth.verify_otp(&phone, &code).await?;
            client.establish_session(&pair)?;
            println!("✅ Logged in (token expires {})", pair.expires_at().to_rfc3339());
        }

        Command::Logout => {
            client.logout()?;
            println!("👋 Logged out");
        }

        Command::Status => match store.access_token() {
            Some(_) => match store.expires_at() {
                Some(at) => println!("Session stored, access token expires {}", at.to_rfc3339()),
                None => println!("Session stored"),
            },
            None => println!("No session stored. Run `marketplace-client login`."),
        },

        Command::Request {
            method,
            path,
            data,
            no_loader,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;

            let mut request = client.request(method, &path)?;
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data must be valid JSON")?;
                request = request.json(body);
            }
            if no_loader {
                request = request.header(config.skip_loader_header()?, HeaderValue::from_static("1"));
            }

            spawn_loading_indicator(&client);

            let response = client.send(request).await?;
            print_response(&response);
        }
    }

    Ok(())
}

/// Session teardown for the command line: credentials are already cleared
fn redirect_to_login() {
    tracing::warn!("Session expired");
    eprintln!("⚠️  Session expired. Run `marketplace-client login` to sign in again.");
}

/// Print a waiting notice on stderr while requests are in flight
fn spawn_loading_indicator(client: &MarketplaceHttpClient) {
    let mut rx = client.activity().subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() > 0 {
                eprintln!("⏳ Waiting for the marketplace API...");
                break;
            }
        }
    });
}

fn print_response(response: &ApiResponse) {
    println!("{}", response.status);
    match response.json::<serde_json::Value>() {
        Ok(json) => println!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| response.text())
        ),
        Err(_) => println!("{}", response.text()),
    }
}
