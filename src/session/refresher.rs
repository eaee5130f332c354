//! Refresh-and-retry for Active Directory tokens.
//!
//! A call that fails with HTTP 401 triggers one refresh of the token it was
//! made with; if the refresh succeeds the call is replayed exactly once.
//! Refreshes for the same subscription are serialized, and a caller that
//! finds the token already replaced by a concurrent refresh reuses it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::auth::{AuthToken, CredentialStore, InteractiveAuth, TokenRedeemer};
use crate::error::{ApiError, ManagementError};

/// Tenant used when a token does not record one.
const DEFAULT_TENANT: &str = "common";

/// Errors that can report an expired or rejected token.
pub trait Unauthorized {
    fn is_unauthorized(&self) -> bool;
}

impl Unauthorized for ManagementError {
    fn is_unauthorized(&self) -> bool {
        ManagementError::is_unauthorized(self)
    }
}

impl Unauthorized for ApiError {
    fn is_unauthorized(&self) -> bool {
        ApiError::is_unauthorized(self)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TokenRefresher {
    credentials: Arc<CredentialStore>,
    redeemer: Arc<dyn TokenRedeemer>,
    interactive: Arc<dyn InteractiveAuth>,
    /// Per-subscription refresh locks; the empty key is the primary token.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenRefresher {
    pub fn new(
        credentials: Arc<CredentialStore>,
        redeemer: Arc<dyn TokenRedeemer>,
        interactive: Arc<dyn InteractiveAuth>,
    ) -> Self {
        Self {
            credentials,
            redeemer,
            interactive,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    fn lock_for(&self, slot: Option<&str>) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.locks)
            .entry(slot.unwrap_or_default().to_string())
            .or_default()
            .clone()
    }

    /// Where the token for `subscription_id` lives: the subscription's own
    /// entry if it has one, otherwise the primary token (`None`).
    fn slot_for<'a>(&self, subscription_id: Option<&'a str>) -> Option<&'a str> {
        subscription_id.filter(|id| self.credentials.token_for_subscription(id).is_some())
    }

    fn slot_token(&self, slot: Option<&str>) -> Option<AuthToken> {
        match slot {
            Some(id) => self.credentials.token_for_subscription(id),
            None => self.credentials.primary_token(),
        }
    }

    fn store(&self, slot: Option<&str>, token: Option<AuthToken>) {
        match slot {
            Some(id) => self.credentials.set_token_for_subscription(id, token),
            None => self.credentials.set_primary_token(token),
        }
    }

    /// Run `op`; on an unauthorized failure refresh once and run it once more.
    ///
    /// `subscription_id` of `None` refreshes the primary token.
    pub async fn run_with_retry<T, E, F, Fut>(
        &self,
        subscription_id: Option<&str>,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Unauthorized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let observed = self.credentials.effective_token(subscription_id);

        match op().await {
            Err(e) if e.is_unauthorized() => {
                info!(
                    "Request for subscription {} was unauthorized, refreshing token",
                    subscription_id.unwrap_or("<primary>")
                );
                if self.refresh(subscription_id, observed.as_ref()).await {
                    op().await
                } else {
                    Err(e)
                }
            }
            result => result,
        }
    }

    /// Refresh the token a call for `subscription_id` is made with. Returns
    /// whether a usable new token is now stored.
    ///
    /// A subscription without its own token shares the primary token, so the
    /// primary token is locked, redeemed and replaced. `observed` is the token
    /// the failed call used; if the stored token no longer matches it, another
    /// caller already refreshed and nothing is redeemed.
    pub async fn refresh(&self, subscription_id: Option<&str>, observed: Option<&AuthToken>) -> bool {
        let slot = self.slot_for(subscription_id);
        let refresh_lock = self.lock_for(slot);
        let _guard = refresh_lock.lock().await;

        let current = self.slot_token(slot);
        let replaced = match (&current, observed) {
            (Some(current), Some(observed)) => current.access_token != observed.access_token,
            (Some(_), None) => true,
            _ => false,
        };
        if replaced {
            debug!("Token was refreshed concurrently, reusing it");
            return true;
        }

        let Some(token) = current else {
            debug!("No token to refresh");
            return false;
        };
        let Some(refresh_token) = token.refresh_token.as_ref().filter(|t| !t.is_blank()) else {
            debug!("Token has no refresh token");
            return false;
        };
        let tenant = token
            .tenant_id
            .clone()
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());

        let renewed = match self
            .redeemer
            .redeem_refresh_token(&tenant, refresh_token.as_str())
            .await
        {
            Ok(renewed) => Some(renewed),
            Err(e) if e.is_bad_request() => {
                warn!("Refresh token rejected ({}), signing in interactively", e);
                match self.interactive.authenticate(&tenant).await {
                    Ok(renewed) => Some(renewed),
                    Err(e) => {
                        warn!("Interactive sign-in failed: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                None
            }
        };

        match renewed {
            Some(mut renewed) => {
                if !renewed.has_refresh_token() {
                    renewed.refresh_token = token.refresh_token.clone();
                }
                if renewed.tenant_id.is_none() {
                    renewed.tenant_id = Some(tenant);
                }
                renewed.subscription_id = slot.map(str::to_string);
                self.store(slot, Some(renewed));
                info!("Token for {} refreshed", slot.unwrap_or("<primary>"));
                true
            }
            None => {
                self.store(slot, None);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::settings::MemorySettings;
    use crate::testing::{MockInteractive, MockRedeemer};
    use std::sync::atomic::{AtomicU32, Ordering};

    const SUB: &str = "5b9b3c1e-8d1e-4f0e-9a51-54d1c5e8f0aa";

    fn unauthorized() -> ManagementError {
        ManagementError::new(
            "Error getting table list",
            ApiError::Http {
                status: 401,
                body: "expired".into(),
            },
        )
    }

    fn setup(
        redeemer: Arc<MockRedeemer>,
        interactive: Arc<MockInteractive>,
    ) -> (Arc<CredentialStore>, TokenRefresher) {
        let credentials = Arc::new(CredentialStore::new(Arc::new(MemorySettings::new())));
        credentials.set_token_for_subscription(
            SUB,
            Some(
                AuthToken::bearer("stale", 3600)
                    .with_refresh_token("refresh-1")
                    .with_tenant("contoso")
                    .for_subscription(SUB),
            ),
        );
        let refresher = TokenRefresher::new(credentials.clone(), redeemer, interactive);
        (credentials, refresher)
    }

    #[tokio::test]
    async fn test_single_unauthorized_refreshes_and_retries_once() {
        let redeemer = MockRedeemer::succeeding("fresh");
        let interactive = MockInteractive::failing();
        let (credentials, refresher) = setup(redeemer.clone(), interactive.clone());
        let calls = AtomicU32::new(0);

        let result = refresher
            .run_with_retry(Some(SUB), || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(unauthorized()),
                    _ => Ok(42),
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(redeemer.calls(), 1);
        assert_eq!(redeemer.last_tenant().as_deref(), Some("contoso"));
        assert_eq!(interactive.calls(), 0);

        let stored = credentials.token_for_subscription(SUB).unwrap();
        assert_eq!(stored.access_token.as_str(), "fresh");
        assert_eq!(stored.subscription_id.as_deref(), Some(SUB));
        assert!(stored.has_refresh_token());
    }

    #[tokio::test]
    async fn test_second_unauthorized_propagates_without_looping() {
        let redeemer = MockRedeemer::succeeding("fresh");
        let (_credentials, refresher) = setup(redeemer.clone(), MockInteractive::failing());
        let calls = AtomicU32::new(0);

        let result: Result<(), ManagementError> = refresher
            .run_with_retry(Some(SUB), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unauthorized())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(redeemer.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let redeemer = MockRedeemer::succeeding("fresh");
        let (_credentials, refresher) = setup(redeemer.clone(), MockInteractive::failing());
        let calls = AtomicU32::new(0);

        let result: Result<(), ManagementError> = refresher
            .run_with_retry(Some(SUB), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ManagementError::new(
                    "Error getting job list",
                    ApiError::Http {
                        status: 500,
                        body: String::new(),
                    },
                ))
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(redeemer.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_request_falls_back_to_interactive() {
        let redeemer = MockRedeemer::failing(AuthError::TokenRefreshFailed {
            status: Some(400),
            message: "invalid_grant".into(),
        });
        let interactive = MockInteractive::succeeding("interactive");
        let (credentials, refresher) = setup(redeemer.clone(), interactive.clone());

        assert!(refresher.refresh(Some(SUB), credentials.token_for_subscription(SUB).as_ref()).await);

        assert_eq!(redeemer.calls(), 1);
        assert_eq!(interactive.calls(), 1);
        let stored = credentials.token_for_subscription(SUB).unwrap();
        assert_eq!(stored.access_token.as_str(), "interactive");
    }

    #[tokio::test]
    async fn test_other_redemption_failure_invalidates_token() {
        let redeemer = MockRedeemer::failing(AuthError::TokenRefreshFailed {
            status: Some(500),
            message: "server error".into(),
        });
        let interactive = MockInteractive::succeeding("interactive");
        let (credentials, refresher) = setup(redeemer, interactive.clone());
        let calls = AtomicU32::new(0);

        let result: Result<(), ManagementError> = refresher
            .run_with_retry(Some(SUB), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unauthorized())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(interactive.calls(), 0);
        assert_eq!(credentials.token_for_subscription(SUB), None);
    }

    #[tokio::test]
    async fn test_no_refresh_token_fails_refresh() {
        let redeemer = MockRedeemer::succeeding("fresh");
        let (credentials, refresher) = setup(redeemer.clone(), MockInteractive::failing());
        credentials.set_token_for_subscription(SUB, Some(AuthToken::bearer("no-refresh", 3600)));

        assert!(!refresher.refresh(Some(SUB), credentials.token_for_subscription(SUB).as_ref()).await);
        assert_eq!(redeemer.calls(), 0);
    }

    #[tokio::test]
    async fn test_primary_token_refresh() {
        let redeemer = MockRedeemer::succeeding("fresh-primary");
        let credentials = Arc::new(CredentialStore::new(Arc::new(MemorySettings::new())));
        credentials.set_primary_token(Some(
            AuthToken::bearer("stale", 3600).with_refresh_token("refresh-1"),
        ));
        let refresher = TokenRefresher::new(credentials.clone(), redeemer.clone(), MockInteractive::failing());

        assert!(refresher.refresh(None, credentials.primary_token().as_ref()).await);

        assert_eq!(redeemer.last_tenant().as_deref(), Some("common"));
        let primary = credentials.primary_token().unwrap();
        assert_eq!(primary.access_token.as_str(), "fresh-primary");
        assert_eq!(primary.subscription_id, None);
    }

    #[tokio::test]
    async fn test_concurrent_unauthorized_calls_redeem_once() {
        let redeemer = MockRedeemer::succeeding("fresh").with_delay_ms(50);
        let (credentials, refresher) = setup(redeemer.clone(), MockInteractive::failing());
        let refresher = Arc::new(refresher);

        let call = |refresher: Arc<TokenRefresher>, credentials: Arc<CredentialStore>| async move {
            refresher
                .run_with_retry(Some(SUB), || {
                    let credentials = credentials.clone();
                    async move {
                        let token = credentials.token_for_subscription(SUB);
                        match token {
                            Some(t) if t.access_token.as_str() == "fresh" => Ok(()),
                            _ => Err(unauthorized()),
                        }
                    }
                })
                .await
        };

        let (a, b) = tokio::join!(
            call(refresher.clone(), credentials.clone()),
            call(refresher.clone(), credentials.clone())
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(redeemer.calls(), 1);
    }

    const OTHER_SUB: &str = "9d0e6a47-2c3b-4d8f-a1e2-7f6b5c4d3e21";

    fn primary_only(
        redeemer: Arc<MockRedeemer>,
        interactive: Arc<MockInteractive>,
    ) -> (Arc<CredentialStore>, Arc<TokenRefresher>) {
        let credentials = Arc::new(CredentialStore::new(Arc::new(MemorySettings::new())));
        credentials.set_primary_token(Some(
            AuthToken::bearer("stale", 3600).with_refresh_token("rt"),
        ));
        let refresher = Arc::new(TokenRefresher::new(credentials.clone(), redeemer, interactive));
        (credentials, refresher)
    }

    #[tokio::test]
    async fn test_subscriptions_sharing_primary_token_redeem_once() {
        let redeemer = MockRedeemer::succeeding("fresh").with_delay_ms(50);
        let (credentials, refresher) = primary_only(redeemer.clone(), MockInteractive::failing());

        let call = |subscription: &'static str| {
            let refresher = refresher.clone();
            let credentials = credentials.clone();
            async move {
                refresher
                    .run_with_retry(Some(subscription), || {
                        let credentials = credentials.clone();
                        async move {
                            match credentials.effective_token(Some(subscription)) {
                                Some(t) if t.access_token.as_str() == "fresh" => Ok(()),
                                _ => Err(unauthorized()),
                            }
                        }
                    })
                    .await
            }
        };

        let (a, b) = tokio::join!(call(SUB), call(OTHER_SUB));

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(redeemer.calls(), 1);

        let primary = credentials.primary_token().unwrap();
        assert_eq!(primary.access_token.as_str(), "fresh");
        assert_eq!(primary.subscription_id, None);
        assert_eq!(credentials.token_for_subscription(SUB), None);
        assert_eq!(credentials.token_for_subscription(OTHER_SUB), None);
    }

    #[tokio::test]
    async fn test_failed_redemption_invalidates_shared_primary_token() {
        let redeemer = MockRedeemer::failing(AuthError::TokenRefreshFailed {
            status: Some(500),
            message: "server error".into(),
        });
        let (credentials, refresher) = primary_only(redeemer.clone(), MockInteractive::failing());

        for subscription in [SUB, OTHER_SUB] {
            let result: Result<(), ManagementError> = refresher
                .run_with_retry(Some(subscription), || async { Err(unauthorized()) })
                .await;
            assert!(result.unwrap_err().is_unauthorized());
        }

        assert_eq!(credentials.primary_token(), None);
        assert_eq!(redeemer.calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_request_and_failed_interactive_sign_in() {
        let redeemer = MockRedeemer::failing(AuthError::TokenRefreshFailed {
            status: Some(400),
            message: "invalid_grant".into(),
        });
        let interactive = MockInteractive::failing();
        let (credentials, refresher) = setup(redeemer.clone(), interactive.clone());
        let calls = AtomicU32::new(0);

        let result: Result<(), ManagementError> = refresher
            .run_with_retry(Some(SUB), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unauthorized())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.message(), "Error getting table list");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(redeemer.calls(), 1);
        assert_eq!(interactive.calls(), 1);
        assert_eq!(credentials.token_for_subscription(SUB), None);
    }
}
