//! Short-lived repository token from the SFP server.
//!
//! Tokens expire quickly, so callers fetch one right before the operation
//! that needs it. The fetch is retried a fixed number of times with a fixed
//! delay between attempts.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::RemoteError;
use crate::http::{HttpRequest, HttpTransport};
use crate::secret::{mask_secret, AuthToken};
use crate::Result;

/// Attempts before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

const AUTH_TOKEN_PATH: &str = "/sfp/api/repository/auth-token";

/// Hook invoked with every token before it is returned.
pub type MaskHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    // `type`, `provider` and `scope` are also sent; unused here.
    token: Option<String>,
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
}

/// Fetches repository tokens with bounded retries.
pub struct TokenFetcher {
    transport: Arc<dyn HttpTransport>,
    max_attempts: u32,
    retry_delay: Duration,
    mask: MaskHook,
}

impl TokenFetcher {
    /// Create a fetcher with the default attempt count and delay.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            mask: Arc::new(mask_secret),
        }
    }

    /// Override the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override how fetched tokens are registered as secrets.
    pub fn with_mask_hook(mut self, mask: MaskHook) -> Self {
        self.mask = mask;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fetch a token for `repository`, authenticating with `server_token`.
    pub async fn fetch(
        &self,
        server_url: &str,
        server_token: &str,
        repository: &str,
    ) -> Result<AuthToken> {
        let url = auth_token_url(server_url, repository)?;
        let mut last_error: Option<RemoteError> = None;

        for attempt in 1..=self.max_attempts {
            info!(
                attempt,
                max_attempts = self.max_attempts,
                "Fetching GitHub token"
            );

            match self.attempt(&url, server_token).await {
                Ok(token) => {
                    (self.mask)(token.expose());
                    info!(
                        expires_at = token.expires_at().unwrap_or("unknown"),
                        "GitHub token retrieved"
                    );
                    return Ok(token);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Token attempt failed");
                    last_error = Some(e);
                    if attempt < self.max_attempts {
                        info!(
                            delay_secs = self.retry_delay.as_secs(),
                            "Retrying token fetch"
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(RemoteError::RetriesExhausted {
            attempts: self.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    async fn attempt(&self, url: &str, server_token: &str) -> Result<AuthToken> {
        let request = HttpRequest::get(url)
            .bearer(server_token)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");

        let response = self.transport.send(request).await?;

        if !response.is_success() {
            let message = response
                .json::<ErrorResponse>()
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| response.status_line());
            return Err(RemoteError::Status {
                context: "Failed to get token".to_string(),
                status: response.status,
                message,
            });
        }

        let data: TokenResponse = response.json()?;
        match data.token {
            Some(token) if !token.is_empty() => Ok(AuthToken::new(token, data.expires_at)),
            _ => Err(RemoteError::MissingToken),
        }
    }
}

/// `<server>/sfp/api/repository/auth-token?repositoryIdentifier=<repo>`
fn auth_token_url(server_url: &str, repository: &str) -> Result<String> {
    let base = Url::parse(server_url).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
    let mut url = base
        .join(AUTH_TOKEN_PATH)
        .map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("repositoryIdentifier", repository);
    Ok(url.to_string())
}
