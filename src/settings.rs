//! Key-value settings store the credential and subscription state persists through.
//!
//! The core never assumes a backend; [`JsonFileSettings`] keeps the values in a JSON
//! file under the platform config directory and [`MemorySettings`] keeps them in memory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use directories::ProjectDirs;
use tracing::{debug, error, warn};

/// Persisted authentication mode.
pub const KEY_AUTHENTICATION_MODE: &str = "azure.authentication_mode";

/// Primary AD token; subscription tokens use `"<this>_<subscription id>"`.
pub const KEY_AUTHENTICATION_TOKEN: &str = "azure.authentication_token";

/// Subscription XML blob (publish settings or the AD subscription listing).
pub const KEY_SUBSCRIPTION_FILE: &str = "azure.subscription_file";

/// Comma-joined ids selected in AD mode.
pub const KEY_SELECTED_SUBSCRIPTIONS: &str = "azure.selected_subscriptions";

/// Settings file name.
const SETTINGS_FILE: &str = "settings.json";

/// Narrow property interface.
///
/// Implementations never fail; persistence problems are logged and the
/// in-memory value stays authoritative.
pub trait SettingsStore: Send + Sync {
    fn get_property(&self, key: &str) -> Option<String>;

    fn get_property_or(&self, key: &str, default: &str) -> String {
        self.get_property(key)
            .unwrap_or_else(|| default.to_string())
    }

    fn set_property(&self, key: &str, value: &str);

    fn unset_property(&self, key: &str);

    fn is_property_set(&self, key: &str) -> bool {
        self.get_property(key).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory settings.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get_property(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set_property(&self, key: &str, value: &str) {
        lock(&self.values).insert(key.to_string(), value.to_string());
    }

    fn unset_property(&self, key: &str) {
        lock(&self.values).remove(key);
    }
}

/// Settings persisted as a flat JSON object.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileSettings {
    /// Open the settings file in the platform config directory.
    ///
    /// Returns `None` when no config directory can be determined.
    pub fn open_default(qualifier: &str, organization: &str, application: &str) -> Option<Self> {
        let dirs = ProjectDirs::from(qualifier, organization, application)?;
        Some(Self::open(dirs.config_dir().join(SETTINGS_FILE)))
    }

    /// Open (or start) a settings file at `path`.
    ///
    /// A missing or corrupted file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = load_values(&path);
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create settings directory {:?}: {}", parent, e);
                return;
            }
        }

        let content = match serde_json::to_string_pretty(values) {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to serialize settings: {}", e);
                return;
            }
        };

        match fs::write(&self.path, content) {
            Ok(()) => debug!("Saved settings to {:?}", self.path),
            Err(e) => error!("Failed to write settings file {:?}: {}", self.path, e),
        }
    }
}

fn load_values(path: &Path) -> BTreeMap<String, String> {
    if !path.exists() {
        debug!("Settings file {:?} does not exist, starting empty", path);
        return BTreeMap::new();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(values) => {
                debug!("Loaded settings from {:?}", path);
                values
            }
            Err(e) => {
                warn!("Failed to parse settings file: {}, starting empty", e);
                BTreeMap::new()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}, starting empty", e);
            BTreeMap::new()
        }
    }
}

impl SettingsStore for JsonFileSettings {
    fn get_property(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set_property(&self, key: &str, value: &str) {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value.to_string());
        self.save(&values);
    }

    fn unset_property(&self, key: &str) {
        let mut values = lock(&self.values);
        if values.remove(key).is_some() {
            self.save(&values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_memory_settings() {
        let settings = MemorySettings::new();
        assert!(!settings.is_property_set("a"));
        assert_eq!(settings.get_property_or("a", "fallback"), "fallback");

        settings.set_property("a", "1");
        assert!(settings.is_property_set("a"));
        assert_eq!(settings.get_property("a").as_deref(), Some("1"));

        settings.unset_property("a");
        assert_eq!(settings.get_property("a"), None);
    }

    #[test]
    fn test_empty_string_is_still_set() {
        let settings = MemorySettings::new();
        settings.set_property(KEY_AUTHENTICATION_TOKEN, "");
        assert!(settings.is_property_set(KEY_AUTHENTICATION_TOKEN));
        assert_eq!(settings.get_property_or(KEY_AUTHENTICATION_TOKEN, "x"), "");
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = env::temp_dir().join(format!("azmgmt_settings_{}", uuid::Uuid::new_v4()));
        let path = dir.join(SETTINGS_FILE);

        {
            let settings = JsonFileSettings::open(&path);
            settings.set_property(KEY_AUTHENTICATION_MODE, "ActiveDirectory");
            settings.set_property(KEY_SELECTED_SUBSCRIPTIONS, "a,b");
            settings.unset_property(KEY_SELECTED_SUBSCRIPTIONS);
        }

        let reopened = JsonFileSettings::open(&path);
        assert_eq!(
            reopened.get_property(KEY_AUTHENTICATION_MODE).as_deref(),
            Some("ActiveDirectory")
        );
        assert!(!reopened.is_property_set(KEY_SELECTED_SUBSCRIPTIONS));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupted_file_starts_empty() {
        let dir = env::temp_dir().join(format!("azmgmt_settings_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(SETTINGS_FILE);
        fs::write(&path, "{ not json").unwrap();

        let settings = JsonFileSettings::open(&path);
        assert_eq!(settings.get_property(KEY_AUTHENTICATION_MODE), None);

        let _ = fs::remove_dir_all(&dir);
    }
}
