//! Interactive (browser) sign-in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::callback_server::{CallbackResult, CallbackServer};
use super::oauth::{parse_callback_url, OAuth2Client, PkceChallenge};
use super::token::AuthToken;
use crate::error::AuthError;

/// How long to wait for the user to finish signing in.
const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(300);

/// User-driven authentication against a tenant.
///
/// Implementations may block on user input; callers just await the result.
#[async_trait]
pub trait InteractiveAuth: Send + Sync {
    async fn authenticate(&self, tenant: &str) -> Result<AuthToken, AuthError>;
}

/// Opens the system browser and waits for the redirect on the loopback listener.
pub struct BrowserInteractiveAuth {
    oauth: Arc<OAuth2Client>,
    timeout: Duration,
}

impl BrowserInteractiveAuth {
    pub fn new(oauth: Arc<OAuth2Client>) -> Self {
        Self {
            oauth,
            timeout: SIGN_IN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Check the redirect against the state we sent and return the code.
fn verify_callback(callback_url: &str, expected_state: &str) -> Result<String, AuthError> {
    let (code, state) = parse_callback_url(callback_url)?;
    if state != expected_state {
        return Err(AuthError::StateValidationFailed);
    }
    Ok(code)
}

#[async_trait]
impl InteractiveAuth for BrowserInteractiveAuth {
    async fn authenticate(&self, tenant: &str) -> Result<AuthToken, AuthError> {
        let pkce = PkceChallenge::new();
        let (auth_url, state) = self
            .oauth
            .generate_auth_url(tenant, &pkce)
            .map_err(|e| AuthError::OAuthFailed(e.to_string()))?;

        let server = CallbackServer::bind(self.oauth.redirect_uri()).map_err(AuthError::OAuthFailed)?;

        info!("Opening browser for sign-in to tenant {}", tenant);
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!("Failed to open browser ({}); visit {} to sign in", e, auth_url);
        }

        let timeout = self.timeout;
        let result = tokio::task::spawn_blocking(move || server.wait(timeout))
            .await
            .map_err(|e| AuthError::OAuthFailed(format!("Callback listener failed: {}", e)))?;

        let callback_url = match result {
            CallbackResult::Success(url) => url,
            CallbackResult::TimedOut => return Err(AuthError::CallbackTimeout),
            CallbackResult::Error(message) => return Err(AuthError::OAuthFailed(message)),
        };

        let code = verify_callback(&callback_url, &state)?;
        let token = self.oauth.exchange_code(tenant, &code, &pkce.verifier).await?;
        info!("Interactive sign-in to tenant {} completed", tenant);
        Ok(token)
    }
}
