//! OAuth2 client with PKCE support for Azure AD (v1 endpoint) authentication.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use super::token::AuthToken;
use crate::config::Config;
use crate::error::AuthError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redeems a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRedeemer: Send + Sync {
    async fn redeem_refresh_token(
        &self,
        tenant: &str,
        refresh_token: &str,
    ) -> Result<AuthToken, AuthError>;
}

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// Kept locally, sent in the token exchange.
    pub verifier: String,
    /// BASE64URL(SHA256(verifier)), sent in the authorization request.
    pub challenge: String,
}

impl PkceChallenge {
    pub fn new() -> Self {
        let verifier = URL_SAFE_NO_PAD.encode(random_bytes(32));

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// OAuth2 client for the Azure AD token endpoint.
pub struct OAuth2Client {
    client_id: String,
    authority: String,
    redirect_uri: String,
    resource: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            authority: config.oauth.authority.trim_end_matches('/').to_string(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            resource: config.oauth.resource.clone(),
            http_client,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn endpoint(&self, tenant: &str, name: &str) -> String {
        format!("{}/{}/oauth2/{}", self.authority, tenant, name)
    }

    /// Authorization URL for browser sign-in against `tenant`.
    ///
    /// Returns the URL and a CSRF state token that must be verified in the callback.
    pub fn generate_auth_url(&self, tenant: &str, pkce: &PkceChallenge) -> Result<(Url, String)> {
        let state = URL_SAFE_NO_PAD.encode(random_bytes(16));

        let mut url = Url::parse(&self.endpoint(tenant, "authorize"))
            .context("Invalid authorization endpoint")?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("resource", &self.resource)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        Ok((url, state))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        tenant: &str,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<AuthToken, AuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("resource", self.resource.as_str()),
        ];

        let response = self
            .http_client
            .post(self.endpoint(tenant, "token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!("Token exchange failed: HTTP {} - {}", status, error_body);
            return Err(AuthError::TokenExchangeFailed(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        Ok(token_response.into_token(tenant))
    }

    async fn refresh(&self, tenant: &str, refresh_token: &str) -> Result<AuthToken, AuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("resource", self.resource.as_str()),
        ];

        tracing::debug!("Redeeming refresh token for tenant {}", tenant);

        let response = self
            .http_client
            .post(self.endpoint(tenant, "token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenRefreshFailed {
                status: None,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!("Token refresh failed: HTTP {} - {}", status, error_body);
            return Err(refresh_failure(status, &error_body));
        }

        let token_response: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| AuthError::TokenRefreshFailed {
                    status: None,
                    message: e.to_string(),
                })?;

        tracing::info!("Refreshed access token for tenant {}", tenant);
        Ok(token_response.into_token(tenant))
    }
}

#[async_trait]
impl TokenRedeemer for OAuth2Client {
    async fn redeem_refresh_token(
        &self,
        tenant: &str,
        refresh_token: &str,
    ) -> Result<AuthToken, AuthError> {
        self.refresh(tenant, refresh_token).await
    }
}

/// Map a non-success token response to an error, keeping the status for classification.
fn refresh_failure(status: u16, body: &str) -> AuthError {
    let message = serde_json::from_str::<TokenErrorResponse>(body)
        .ok()
        .map(|e| e.error_description.unwrap_or(e.error))
        .unwrap_or_else(|| format!("HTTP {}", status));

    AuthError::TokenRefreshFailed {
        status: Some(status),
        message,
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// The v1 endpoint reports numbers as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    Text(String),
}

impl NumberOrString {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    expires_in: NumberOrString,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    pub fn expires_in_seconds(&self) -> i64 {
        self.expires_in.as_i64().unwrap_or(0)
    }

    pub fn into_token(self, tenant: &str) -> AuthToken {
        let expires_in = self.expires_in_seconds();
        let mut token = AuthToken::bearer(self.access_token, expires_in);
        token.token_type = self.token_type;
        token.resource = self.resource;
        if let Some(refresh_token) = self.refresh_token.filter(|t| !t.is_empty()) {
            token = token.with_refresh_token(refresh_token);
        }
        token.with_tenant(tenant)
    }
}

/// Parse OAuth callback URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(AuthError::OAuthFailed(description));
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();

    let state = params
        .get("state")
        .ok_or(AuthError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuth2Client {
        let mut config = Config::embedded().unwrap();
        config.oauth.client_id = "3f1c2d9e-0000-4000-8000-000000000001".into();
        OAuth2Client::new(&config).unwrap()
    }

    #[test]
    fn test_pkce_generation() {
        let pkce = PkceChallenge::new();

        assert_eq!(pkce.verifier.len(), 43);
        assert!(!pkce.challenge.is_empty());
        assert_ne!(pkce.verifier, pkce.challenge);
    }

    #[test]
    fn test_auth_url_targets_tenant_and_resource() {
        let pkce = PkceChallenge::new();
        let (url, state) = client()
            .generate_auth_url("contoso.onmicrosoft.com", &pkce)
            .unwrap();

        assert_eq!(url.path(), "/contoso.onmicrosoft.com/oauth2/authorize");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(
            params.get("resource").map(String::as_str),
            Some("https://management.core.windows.net/")
        );
        assert_eq!(params.get("state"), Some(&state));
        assert_eq!(params.get("code_challenge"), Some(&pkce.challenge));
    }

    #[test]
    fn test_token_response_expires_in_as_string() {
        let json = r#"{
            "access_token": "at",
            "token_type": "Bearer",
            "expires_in": "3599",
            "refresh_token": "rt",
            "resource": "https://management.core.windows.net/"
        }"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.expires_in_seconds(), 3599);

        let token = response.into_token("contoso");
        assert_eq!(token.access_token.as_str(), "at");
        assert!(token.has_refresh_token());
        assert_eq!(token.tenant_id.as_deref(), Some("contoso"));
        assert!(!token.needs_refresh());
    }

    #[test]
    fn test_token_response_expires_in_as_number() {
        let json = r#"{"access_token": "at", "expires_in": 60}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.expires_in_seconds(), 60);

        let token = response.into_token("common");
        assert_eq!(token.token_type, "Bearer");
        assert!(!token.has_refresh_token());
    }

    #[test]
    fn test_refresh_failure_keeps_status() {
        let err = refresh_failure(
            400,
            r#"{"error":"invalid_grant","error_description":"AADSTS70002: expired"}"#,
        );
        assert!(err.is_bad_request());
        assert!(err.to_string().contains("AADSTS70002"));

        let err = refresh_failure(503, "<html>unavailable</html>");
        assert!(!err.is_bad_request());
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[test]
    fn test_parse_callback_success() {
        let url = "http://localhost:28491/callback?code=abc123&state=xyz789";
        let (code, state) = parse_callback_url(url).unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state, "xyz789");
    }

    #[test]
    fn test_parse_callback_error() {
        let url = "http://localhost:28491/callback?error=access_denied&error_description=User%20cancelled";
        let result = parse_callback_url(url);
        assert!(matches!(result, Err(AuthError::OAuthFailed(_))));
    }

    #[test]
    fn test_parse_callback_missing_code() {
        let url = "http://localhost:28491/callback?state=xyz789";
        let result = parse_callback_url(url);
        assert!(matches!(result, Err(AuthError::InvalidAuthCode)));
    }
}
