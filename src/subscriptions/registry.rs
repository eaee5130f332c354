//! Subscription list for the active authentication mode.
//!
//! Certificate mode reads the publish-settings blob from settings on every
//! call. Active Directory mode fetches the listing from the management API
//! once and keeps it in memory until [`SubscriptionRegistry::refresh_from_token`]
//! or [`SubscriptionRegistry::clear`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::publish_settings::{parse_publish_settings, parse_subscription_listing, rewrite_selection};
use super::{Subscription, SubscriptionSource};
use crate::auth::{AuthenticationMode, CredentialStore};
use crate::error::{ApiError, BoxError, ManagementError};
use crate::settings::{SettingsStore, KEY_SELECTED_SUBSCRIPTIONS, KEY_SUBSCRIPTION_FILE};

const LIST_ERROR: &str = "Error getting subscription list";
const SELECT_ERROR: &str = "Error saving subscription selection";
const IMPORT_ERROR: &str = "Error importing subscription file";
const REFRESH_ERROR: &str = "Subscriptions can only be refreshed in Active Directory mode";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SubscriptionRegistry {
    credentials: Arc<CredentialStore>,
    source: Arc<dyn SubscriptionSource>,
    /// Active Directory listing; `None` until first loaded.
    directory: Mutex<Option<Vec<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new(credentials: Arc<CredentialStore>, source: Arc<dyn SubscriptionSource>) -> Self {
        Self {
            credentials,
            source,
            directory: Mutex::new(None),
        }
    }

    fn settings(&self) -> &Arc<dyn SettingsStore> {
        self.credentials.settings()
    }

    /// Subscriptions marked selected, in the same order as [`Self::list_all`].
    pub async fn list_selected(&self) -> Result<Vec<Subscription>, ManagementError> {
        let mut subscriptions = self.list_all().await?;
        subscriptions.retain(|s| s.selected);
        Ok(subscriptions)
    }

    /// Every subscription for the active mode; empty when nothing is configured.
    pub async fn list_all(&self) -> Result<Vec<Subscription>, ManagementError> {
        self.load()
            .await
            .map_err(|e| ManagementError::new(LIST_ERROR, e))
    }

    async fn load(&self) -> Result<Vec<Subscription>, BoxError> {
        match self.credentials.mode() {
            AuthenticationMode::SubscriptionSettings => Ok(self.from_certificate_blob()?),
            AuthenticationMode::ActiveDirectory => {
                let cached = lock(&self.directory).clone();
                if let Some(cached) = cached {
                    return Ok(cached);
                }
                self.fetch_directory().await
            }
            AuthenticationMode::Unknown => {
                debug!("No authentication mode configured, no subscriptions");
                Ok(Vec::new())
            }
        }
    }

    fn from_certificate_blob(&self) -> Result<Vec<Subscription>, ApiError> {
        let blob = self.settings().get_property_or(KEY_SUBSCRIPTION_FILE, "");
        if blob.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_publish_settings(&blob)
    }

    /// Ids persisted by [`Self::set_selected`] in directory mode; `None` if never saved.
    fn stored_selection(&self) -> Option<Vec<Uuid>> {
        let stored = self.settings().get_property(KEY_SELECTED_SUBSCRIPTIONS)?;
        Some(
            stored
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .filter_map(|id| match Uuid::parse_str(id) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!("Ignoring invalid stored subscription id '{}': {}", id, e);
                        None
                    }
                })
                .collect(),
        )
    }

    async fn fetch_directory(&self) -> Result<Vec<Subscription>, BoxError> {
        let selection = self.stored_selection();

        let xml = self.source.list_subscriptions_xml().await?;
        let mut subscriptions = parse_subscription_listing(&xml)?;
        self.settings().set_property(KEY_SUBSCRIPTION_FILE, &xml);

        for subscription in &mut subscriptions {
            subscription.selected = selection
                .as_ref()
                .map_or(true, |ids| ids.contains(&subscription.id));
        }

        *lock(&self.directory) = Some(subscriptions.clone());
        info!("Loaded {} subscriptions from Active Directory", subscriptions.len());
        Ok(subscriptions)
    }

    /// Re-fetch the Active Directory listing, replacing the cached list.
    ///
    /// Only valid in Active Directory mode.
    pub async fn refresh_from_token(&self) -> Result<Vec<Subscription>, ManagementError> {
        let mode = self.credentials.mode();
        if mode != AuthenticationMode::ActiveDirectory {
            return Err(ManagementError::new(
                REFRESH_ERROR,
                ApiError::NotConfigured(format!(
                    "authentication mode is {}, sign in with Active Directory first",
                    mode
                )),
            ));
        }

        self.fetch_directory()
            .await
            .map_err(|e| ManagementError::new(LIST_ERROR, e))
    }

    /// Persist which subscriptions are selected.
    pub fn set_selected(&self, ids: &[Uuid]) -> Result<(), ManagementError> {
        match self.credentials.mode() {
            AuthenticationMode::SubscriptionSettings => {
                let blob = self.settings().get_property_or(KEY_SUBSCRIPTION_FILE, "");
                if blob.trim().is_empty() {
                    return Ok(());
                }
                let rewritten =
                    rewrite_selection(&blob, ids).map_err(|e| ManagementError::new(SELECT_ERROR, e))?;
                self.settings().set_property(KEY_SUBSCRIPTION_FILE, &rewritten);
            }
            AuthenticationMode::ActiveDirectory => {
                if let Some(subscriptions) = lock(&self.directory).as_mut() {
                    for subscription in subscriptions.iter_mut() {
                        subscription.selected = ids.contains(&subscription.id);
                    }
                }
                let joined = ids
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                self.settings().set_property(KEY_SELECTED_SUBSCRIPTIONS, &joined);
            }
            AuthenticationMode::Unknown => {}
        }

        debug!("Selected {} subscriptions", ids.len());
        Ok(())
    }

    /// Switch to certificate mode and import a publish-settings file.
    ///
    /// On failure the mode is reset to `Unknown` and nothing is stored.
    pub async fn load_from_certificate_file(&self, path: impl AsRef<Path>) -> Result<(), ManagementError> {
        let path = path.as_ref();
        self.credentials.set_mode(AuthenticationMode::SubscriptionSettings);
        self.clear();

        match import(path).await {
            Ok((xml, count)) => {
                self.settings().set_property(KEY_SUBSCRIPTION_FILE, &xml);
                info!("Imported {} subscriptions from {:?}", count, path);
                Ok(())
            }
            Err(e) => {
                self.credentials.set_mode(AuthenticationMode::Unknown);
                Err(ManagementError::new(IMPORT_ERROR, e))
            }
        }
    }

    /// Look a subscription up in the active mode's list. Not found is `None`.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>, ManagementError> {
        Ok(self.list_all().await?.into_iter().find(|s| s.id == id))
    }

    /// Forget the stored subscription blob and the cached listing.
    pub fn clear(&self) {
        self.settings().unset_property(KEY_SUBSCRIPTION_FILE);
        *lock(&self.directory) = None;
    }

    /// Drop every token, every subscription, and the authentication mode.
    pub fn sign_out(&self) {
        let mut known: Vec<String> = lock(&self.directory)
            .as_ref()
            .map(|subs| subs.iter().map(|s| s.id.to_string()).collect())
            .unwrap_or_default();

        let blob = self.settings().get_property_or(KEY_SUBSCRIPTION_FILE, "");
        if !blob.trim().is_empty() {
            let parsed = parse_subscription_listing(&blob)
                .ok()
                .filter(|subs| !subs.is_empty())
                .or_else(|| parse_publish_settings(&blob).ok())
                .unwrap_or_default();
            for subscription in parsed {
                let id = subscription.id.to_string();
                if !known.contains(&id) {
                    known.push(id);
                }
            }
        }

        self.credentials.clear_all_tokens(&known);
        self.clear();
        self.settings().unset_property(KEY_SELECTED_SUBSCRIPTIONS);
        self.credentials.set_mode(AuthenticationMode::Unknown);
        info!("Signed out");
    }
}

/// Read and validate a publish-settings file.
async fn import(path: &Path) -> Result<(String, usize), ApiError> {
    let xml = tokio::fs::read_to_string(path).await?;
    let subscriptions = parse_publish_settings(&xml)?;
    if subscriptions.is_empty() {
        return Err(ApiError::Parse(format!("No subscriptions found in {:?}", path)));
    }
    Ok((xml, subscriptions.len()))
}
