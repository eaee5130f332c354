//! Authentication mode, primary token and per-subscription token cache.
//!
//! Every write goes through one path that updates the in-memory copy and the
//! settings store together, under the lock that guards that copy. The primary
//! token and the subscription cache have separate locks and no method holds
//! both at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::token::{AuthToken, AuthenticationMode};
use crate::settings::{SettingsStore, KEY_AUTHENTICATION_MODE, KEY_AUTHENTICATION_TOKEN};

/// Lazily-loaded primary token slot.
#[derive(Debug, Default)]
enum PrimarySlot {
    #[default]
    Unloaded,
    Loaded(Option<AuthToken>),
}

pub struct CredentialStore {
    settings: Arc<dyn SettingsStore>,
    primary: Mutex<PrimarySlot>,
    by_subscription: Mutex<HashMap<String, AuthToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settings key for a subscription-scoped token.
pub fn subscription_token_key(subscription_id: &str) -> String {
    format!("{}_{}", KEY_AUTHENTICATION_TOKEN, subscription_id)
}

/// Deserialize a stored token; blank means absent, malformed JSON is a cache miss.
fn decode_token(key: &str, json: Option<String>) -> Option<AuthToken> {
    let json = json?;
    if json.trim().is_empty() {
        return None;
    }

    match AuthToken::from_json(&json) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("Stored token under '{}' is unreadable, ignoring it: {}", key, e);
            None
        }
    }
}

/// Serialize a token for storage; absence is the empty string.
fn encode_token(token: Option<&AuthToken>) -> String {
    match token.map(AuthToken::to_json) {
        Some(Ok(json)) => json,
        Some(Err(e)) => {
            warn!("Failed to serialize token, storing empty value: {}", e);
            String::new()
        }
        None => String::new(),
    }
}

impl CredentialStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            primary: Mutex::new(PrimarySlot::Unloaded),
            by_subscription: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn mode(&self) -> AuthenticationMode {
        let stored = self
            .settings
            .get_property_or(KEY_AUTHENTICATION_MODE, AuthenticationMode::Unknown.as_str());
        AuthenticationMode::parse_lenient(&stored)
    }

    pub fn set_mode(&self, mode: AuthenticationMode) {
        info!("Authentication mode set to {}", mode);
        self.settings
            .set_property(KEY_AUTHENTICATION_MODE, mode.as_str());
    }

    /// The primary (sign-in) token, loaded from settings on first access.
    pub fn primary_token(&self) -> Option<AuthToken> {
        let mut slot = lock(&self.primary);
        if let PrimarySlot::Loaded(token) = &*slot {
            return token.clone();
        }

        let token = decode_token(
            KEY_AUTHENTICATION_TOKEN,
            self.settings.get_property(KEY_AUTHENTICATION_TOKEN),
        );
        *slot = PrimarySlot::Loaded(token.clone());
        token
    }

    pub fn set_primary_token(&self, token: Option<AuthToken>) {
        let mut slot = lock(&self.primary);
        self.settings
            .set_property(KEY_AUTHENTICATION_TOKEN, &encode_token(token.as_ref()));
        *slot = PrimarySlot::Loaded(token);
    }

    pub fn token_for_subscription(&self, subscription_id: &str) -> Option<AuthToken> {
        let key = subscription_token_key(subscription_id);
        let mut cache = lock(&self.by_subscription);

        if let Some(token) = cache.get(&key) {
            return Some(token.clone());
        }

        let token = decode_token(&key, self.settings.get_property(&key))?;
        cache.insert(key, token.clone());
        Some(token)
    }

    /// Store (or with `None`, remove) the token for a subscription.
    pub fn set_token_for_subscription(&self, subscription_id: &str, token: Option<AuthToken>) {
        let key = subscription_token_key(subscription_id);
        let mut cache = lock(&self.by_subscription);

        self.settings
            .set_property(&key, &encode_token(token.as_ref()));

        match token {
            Some(token) => {
                debug!("Cached token for subscription {}", subscription_id);
                cache.insert(key, token);
            }
            None => {
                debug!("Cleared token for subscription {}", subscription_id);
                cache.remove(&key);
            }
        }
    }

    /// The token a request for `subscription_id` should carry: the
    /// subscription's own token, or the primary token when it has none.
    pub fn effective_token(&self, subscription_id: Option<&str>) -> Option<AuthToken> {
        subscription_id
            .and_then(|id| self.token_for_subscription(id))
            .or_else(|| self.primary_token())
    }

    /// Clear the token of every known subscription, then the primary token.
    ///
    /// `known_subscriptions` is unioned with whatever is currently cached.
    pub fn clear_all_tokens<I, S>(&self, known_subscriptions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefix = subscription_token_key("");
        let mut ids: Vec<String> = {
            let cache = lock(&self.by_subscription);
            cache
                .keys()
                .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
                .collect()
        };
        for id in known_subscriptions {
            let id = id.as_ref().to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        for id in &ids {
            self.set_token_for_subscription(id, None);
        }
        self.set_primary_token(None);
        info!("Cleared {} subscription tokens and the primary token", ids.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;

    const SUB_A: &str = "0b2c3f0e-7a61-4b8c-9d2e-111111111111";
    const SUB_B: &str = "0b2c3f0e-7a61-4b8c-9d2e-222222222222";

    fn store() -> (Arc<MemorySettings>, CredentialStore) {
        let settings = Arc::new(MemorySettings::new());
        let store = CredentialStore::new(settings.clone());
        (settings, store)
    }

    #[test]
    fn test_mode_defaults_to_unknown() {
        let (settings, store) = store();
        assert_eq!(store.mode(), AuthenticationMode::Unknown);

        settings.set_property(KEY_AUTHENTICATION_MODE, "NotAMode");
        assert_eq!(store.mode(), AuthenticationMode::Unknown);

        store.set_mode(AuthenticationMode::ActiveDirectory);
        assert_eq!(store.mode(), AuthenticationMode::ActiveDirectory);
    }

    #[test]
    fn test_subscription_token_roundtrip() {
        let (settings, store) = store();
        let token = AuthToken::bearer("access-a", 3600)
            .with_refresh_token("refresh-a")
            .for_subscription(SUB_A);

        store.set_token_for_subscription(SUB_A, Some(token.clone()));

        assert_eq!(store.token_for_subscription(SUB_A), Some(token.clone()));
        assert_eq!(store.token_for_subscription(SUB_B), None);

        // A fresh store over the same settings sees the persisted copy.
        let reloaded = CredentialStore::new(settings);
        assert_eq!(reloaded.token_for_subscription(SUB_A), Some(token));
    }

    #[test]
    fn test_setting_none_removes_and_clears_persisted_value() {
        let (settings, store) = store();
        store.set_token_for_subscription(SUB_A, Some(AuthToken::bearer("x", 3600)));

        store.set_token_for_subscription(SUB_A, None);

        assert_eq!(store.token_for_subscription(SUB_A), None);
        assert_eq!(
            settings.get_property(&subscription_token_key(SUB_A)).as_deref(),
            Some("")
        );
    }

    #[test]
    fn test_primary_token_memoized() {
        let (settings, store) = store();
        assert_eq!(store.primary_token(), None);

        let token = AuthToken::bearer("primary", 3600);
        settings.set_property(KEY_AUTHENTICATION_TOKEN, &token.to_json().unwrap());
        // Already loaded as absent; the direct settings write is not observed.
        assert_eq!(store.primary_token(), None);

        store.set_primary_token(Some(token.clone()));
        assert_eq!(store.primary_token(), Some(token.clone()));

        let reloaded = CredentialStore::new(settings);
        assert_eq!(reloaded.primary_token(), Some(token));
    }

    #[test]
    fn test_malformed_json_is_cache_miss() {
        let (settings, store) = store();
        settings.set_property(KEY_AUTHENTICATION_TOKEN, "{ definitely not a token");
        settings.set_property(&subscription_token_key(SUB_A), "[1,2,3]");

        assert_eq!(store.primary_token(), None);
        assert_eq!(store.token_for_subscription(SUB_A), None);
    }

    #[test]
    fn test_effective_token_falls_back_to_primary() {
        let (_settings, store) = store();
        let primary = AuthToken::bearer("primary", 3600);
        let scoped = AuthToken::bearer("scoped", 3600).for_subscription(SUB_A);
        store.set_primary_token(Some(primary.clone()));
        store.set_token_for_subscription(SUB_A, Some(scoped.clone()));

        assert_eq!(store.effective_token(Some(SUB_A)), Some(scoped));
        assert_eq!(store.effective_token(Some(SUB_B)), Some(primary.clone()));
        assert_eq!(store.effective_token(None), Some(primary));
    }

    #[test]
    fn test_clear_all_tokens() {
        let (settings, store) = store();
        store.set_primary_token(Some(AuthToken::bearer("primary", 3600)));
        store.set_token_for_subscription(SUB_A, Some(AuthToken::bearer("a", 3600)));
        // Persisted but never loaded into this store's cache.
        settings.set_property(
            &subscription_token_key(SUB_B),
            &AuthToken::bearer("b", 3600).to_json().unwrap(),
        );

        store.clear_all_tokens([SUB_B]);

        assert_eq!(store.primary_token(), None);
        assert_eq!(store.token_for_subscription(SUB_A), None);
        assert_eq!(store.token_for_subscription(SUB_B), None);
        assert_eq!(settings.get_property(KEY_AUTHENTICATION_TOKEN).as_deref(), Some(""));
    }
}
