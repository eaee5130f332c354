//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Placeholder shipped in config.toml until a real client id is configured.
const CLIENT_ID_PLACEHOLDER: &str = "YOUR_AZURE_AD_CLIENT_ID";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub settings_qualifier: String,
    pub settings_organization: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub authority: String,
    pub tenant: String,
    pub redirect_uri: String,
    /// Resource the AD token is issued for (Service Management).
    pub resource: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub management_base_url: String,
    /// Sent as `x-ms-version` on every management request.
    pub api_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::embedded()?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Ok(redirect_uri) = env::var("AZURE_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Ok(url) = env::var("AZURE_MANAGEMENT_URL") {
            config.api.management_base_url = url;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    /// The embedded defaults without environment overrides.
    pub fn embedded() -> Result<Self> {
        toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")
    }

    /// Validate the Active Directory settings.
    ///
    /// Only AD sign-in and token refresh need these; certificate mode works without them.
    pub fn validate_oauth(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == CLIENT_ID_PLACEHOLDER {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenant.is_empty() {
            anyhow::bail!(
                "Azure AD tenant not configured. Set AZURE_TENANT_ID environment variable \
                 or update config.toml"
            );
        }

        Ok(())
    }

    /// Get the authorization URL for a tenant.
    pub fn auth_url(&self, tenant: &str) -> String {
        format!(
            "{}/{}/oauth2/authorize",
            self.oauth.authority.trim_end_matches('/'),
            tenant
        )
    }

    /// Get the token URL for a tenant.
    pub fn token_url(&self, tenant: &str) -> String {
        format!(
            "{}/{}/oauth2/token",
            self.oauth.authority.trim_end_matches('/'),
            tenant
        )
    }
}
