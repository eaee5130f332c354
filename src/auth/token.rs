//! Authentication mode and token types.
//!
//! Secrets are wrapped in [`SecureString`], which is zeroized on drop and
//! redacted from `Debug` output.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Refresh this long before the access token actually expires.
const REFRESH_BUFFER_SECONDS: i64 = 300;

/// Which authentication strategy the subscription listing and requests use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticationMode {
    #[default]
    Unknown,
    /// Certificate-based, from an imported publish-settings file.
    SubscriptionSettings,
    /// Active Directory OAuth bearer tokens.
    ActiveDirectory,
}

impl AuthenticationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::SubscriptionSettings => "SubscriptionSettings",
            Self::ActiveDirectory => "ActiveDirectory",
        }
    }

    /// Parse a stored value; anything unrecognised is `Unknown`.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl fmt::Display for AuthenticationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthenticationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Unknown" => Ok(Self::Unknown),
            "SubscriptionSettings" => Ok(Self::SubscriptionSettings),
            "ActiveDirectory" => Ok(Self::ActiveDirectory),
            other => Err(format!("unknown authentication mode '{}'", other)),
        }
    }
}

/// A secure string wrapper that zeroizes its contents on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Bearer/refresh token pair with expiry metadata.
///
/// A token without `subscription_id` is the primary (sign-in) token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: SecureString,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SecureString>,

    pub token_type: String,

    pub expires_on: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

impl AuthToken {
    /// A bearer token expiring `expires_in_seconds` from now.
    pub fn bearer(access_token: impl Into<SecureString>, expires_in_seconds: i64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_on: Utc::now() + Duration::seconds(expires_in_seconds),
            tenant_id: None,
            user_id: None,
            resource: None,
            subscription_id: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<SecureString>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Scope this token to a subscription.
    pub fn for_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|token| !token.is_blank())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_on <= Utc::now()
    }

    pub fn needs_refresh(&self) -> bool {
        Utc::now() + Duration::seconds(REFRESH_BUFFER_SECONDS) >= self.expires_on
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token.as_str())
    }

    /// Remaining lifetime, or `None` once expired.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let now = Utc::now();
        if self.expires_on > now {
            Some(self.expires_on - now)
        } else {
            None
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            AuthenticationMode::parse_lenient("ActiveDirectory"),
            AuthenticationMode::ActiveDirectory
        );
        assert_eq!(
            AuthenticationMode::parse_lenient("SubscriptionSettings"),
            AuthenticationMode::SubscriptionSettings
        );
        assert_eq!(
            AuthenticationMode::parse_lenient("garbage"),
            AuthenticationMode::Unknown
        );
        assert_eq!(AuthenticationMode::parse_lenient(""), AuthenticationMode::Unknown);
        assert_eq!(AuthenticationMode::ActiveDirectory.to_string(), "ActiveDirectory");
    }

    #[test]
    fn test_secure_string_debug() {
        let secret = SecureString::new("super_secret_token");
        let debug_output = format!("{:?}", secret);
        assert_eq!(debug_output, "[REDACTED]");

        let token = AuthToken::bearer("super_secret_token", 3600).with_refresh_token("rt");
        assert!(!format!("{:?}", token).contains("super_secret"));
    }

    #[test]
    fn test_token_json_roundtrip() {
        let token = AuthToken::bearer("access", 3600)
            .with_refresh_token("refresh")
            .with_tenant("contoso.onmicrosoft.com")
            .for_subscription("5b9b3c1e-8d1e-4f0e-9a51-54d1c5e8f0aa");

        let json = token.to_json().unwrap();
        assert!(json.contains("\"access_token\":\"access\""));
        assert_eq!(AuthToken::from_json(&json).unwrap(), token);
    }

    #[test]
    fn test_expiry() {
        let token = AuthToken::bearer("a", 3600);
        assert!(!token.is_expired());
        assert!(!token.needs_refresh());
        assert!(token.time_until_expiry().unwrap().num_minutes() > 55);

        let token = AuthToken::bearer("a", 120);
        assert!(!token.is_expired());
        assert!(token.needs_refresh());

        let token = AuthToken::bearer("a", -60);
        assert!(token.is_expired());
        assert!(token.time_until_expiry().is_none());
    }

    #[test]
    fn test_refresh_token_presence() {
        assert!(!AuthToken::bearer("a", 60).has_refresh_token());
        assert!(!AuthToken::bearer("a", 60).with_refresh_token("  ").has_refresh_token());
        assert!(AuthToken::bearer("a", 60).with_refresh_token("r").has_refresh_token());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(30)), "< 1 min");
        assert_eq!(format_duration(Duration::minutes(45)), "45 min");
        assert_eq!(format_duration(Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(Duration::hours(2)), "2 hours");
        assert_eq!(format_duration(Duration::minutes(90)), "1h 30m");
    }
}
