//! OAuth authorization-code flow against the Spotify accounts service.
//!
//! The orchestrator owns the local callback server and the current token
//! pair. `authenticate()` drives a full browser round trip; `refresh_tokens()`
//! mints a new access token from a stored refresh token. Every successful
//! exchange or refresh replaces the pair as a whole and notifies the
//! registered persistence callback.

pub mod callback;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Deserialize;
use tokio::time::timeout;

use crate::config::Config;
use crate::types::Tokens;
use callback::CallbackServer;

const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";
const AUTH_SCOPES: &str = "user-read-currently-playing user-modify-playback-state";
const REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";
const CALLBACK_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 8888);
const CODE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub type TokensCallback = Box<dyn Fn(&Tokens) + Send + Sync>;

pub struct AuthOrchestrator {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    server: CallbackServer,
    tokens: Tokens,
    on_tokens: Option<TokensCallback>,
    code_wait: Duration,
}

impl AuthOrchestrator {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            server: CallbackServer::new(SocketAddr::from(CALLBACK_ADDR)),
            tokens: Tokens::default(),
            on_tokens: None,
            code_wait: CODE_WAIT,
        }
    }

    #[cfg(test)]
    fn with_code_wait(mut self, code_wait: Duration) -> Self {
        self.code_wait = code_wait;
        self
    }

    /// Seed the orchestrator with tokens loaded from disk.
    pub fn set_tokens(&mut self, tokens: Tokens) {
        self.tokens = tokens;
    }

    pub fn tokens(&self) -> &Tokens {
        &self.tokens
    }

    /// Register the callback fired on every successful exchange or refresh.
    /// This is the sole notification path for credential persistence.
    pub fn on_tokens(&mut self, callback: impl Fn(&Tokens) + Send + Sync + 'static) {
        self.on_tokens = Some(Box::new(callback));
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_valid()
    }

    /// Run the full browser flow: open the callback listener, send the user
    /// to the authorization page, wait up to 60 seconds for the redirect and
    /// exchange the code for tokens. The listener is closed on every path.
    pub async fn authenticate(&mut self) -> bool {
        tracing::info!("Starting authentication");

        let rx = self.server.reset();
        if let Err(e) = self.server.open().await {
            tracing::error!(error = %e, "Could not start callback server");
            return false;
        }
        tracing::debug!(addr = ?self.server.local_addr(), "Callback server ready");

        let auth_url = self.build_auth_url();
        if let Err(e) = open_browser(&auth_url) {
            tracing::warn!(error = %e, "Could not open browser automatically");
            println!("Please visit this URL to authorize the application:");
            println!("{auth_url}");
        }

        tracing::info!(
            timeout_secs = self.code_wait.as_secs_f64(),
            "Waiting for authorization code"
        );
        let code = match timeout(self.code_wait, rx).await {
            Ok(Ok(code)) => code,
            Ok(Err(_)) => {
                tracing::error!("Callback server dropped the code channel");
                self.server.close().await;
                return false;
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.code_wait.as_secs_f64(),
                    "Authentication timeout, no redirect received"
                );
                self.server.close().await;
                return false;
            }
        };
        self.server.close().await;

        match self.exchange_code(&code).await {
            Ok(tokens) => {
                self.install_tokens(tokens);
                tracing::info!("Token exchange successful");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Token exchange failed");
                false
            }
        }
    }

    /// Mint a new access token from `refresh_token`. On failure the current
    /// token pair is left untouched.
    pub async fn refresh_tokens(&mut self, refresh_token: &str) -> bool {
        tracing::info!("Refreshing tokens");

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        match self.request_tokens(&params).await {
            Ok(response) => {
                // The refresh grant may omit a new refresh token; keep the old one.
                let refresh = response
                    .refresh_token
                    .unwrap_or_else(|| refresh_token.to_string());
                self.install_tokens(Tokens::new(response.access_token, refresh));
                tracing::info!("Tokens refreshed");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed");
                false
            }
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<Tokens> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self.request_tokens(&params).await?;
        let refresh_token = response
            .refresh_token
            .ok_or_else(|| anyhow!("token response missing refresh_token"))?;
        Ok(Tokens::new(response.access_token, refresh_token))
    }

    async fn request_tokens(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(format!("{ACCOUNTS_BASE}/api/token"))
            .form(params)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "Token endpoint answered");
        if !status.is_success() {
            return Err(anyhow!("token request failed with status {}", status.as_u16()));
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    fn install_tokens(&mut self, tokens: Tokens) {
        self.tokens = tokens;
        if let Some(callback) = &self.on_tokens {
            callback(&self.tokens);
        }
    }

    fn build_auth_url(&self) -> String {
        format!(
            "{ACCOUNTS_BASE}/authorize?response_type=code&client_id={}&scope={}&redirect_uri={}",
            self.client_id,
            urlencoding::encode(AUTH_SCOPES),
            urlencoding::encode(REDIRECT_URI),
        )
    }
}

/// Hand the authorization URL to the user's environment. Failure here is
/// non-fatal; the caller falls back to printing the URL.
fn open_browser(url: &str) -> std::io::Result<()> {
    let status = std::process::Command::new("xdg-open").arg(url).status()?;
    if !status.success() {
        return Err(std::io::Error::other("xdg-open exited with failure"));
    }
    Ok(())
}
