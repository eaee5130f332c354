//! Test doubles for the authentication and transport seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{AuthToken, InteractiveAuth, TokenRedeemer};
use crate::error::{ApiError, AuthError};
use crate::rest::transport::{ManagementRequest, ManagementResponse, ManagementTransport};

/// Redeemer returning a fixed token or a fixed refresh failure.
pub struct MockRedeemer {
    outcome: Result<String, (Option<u16>, String)>,
    delay_ms: AtomicU64,
    calls: AtomicU32,
    last_tenant: Mutex<Option<String>>,
}

impl MockRedeemer {
    pub fn succeeding(access_token: &str) -> Arc<Self> {
        Arc::new(Self::with_outcome(Ok(access_token.to_string())))
    }

    /// Fails every call with a `TokenRefreshFailed` matching `error`.
    pub fn failing(error: AuthError) -> Arc<Self> {
        let outcome = match error {
            AuthError::TokenRefreshFailed { status, message } => (status, message),
            other => (None, other.to_string()),
        };
        Arc::new(Self::with_outcome(Err(outcome)))
    }

    fn with_outcome(outcome: Result<String, (Option<u16>, String)>) -> Self {
        Self {
            outcome,
            delay_ms: AtomicU64::new(0),
            calls: AtomicU32::new(0),
            last_tenant: Mutex::new(None),
        }
    }

    pub fn with_delay_ms(self: Arc<Self>, delay_ms: u64) -> Arc<Self> {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_tenant(&self) -> Option<String> {
        self.last_tenant.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenRedeemer for MockRedeemer {
    async fn redeem_refresh_token(
        &self,
        tenant: &str,
        _refresh_token: &str,
    ) -> Result<AuthToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_tenant.lock().unwrap() = Some(tenant.to_string());

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match &self.outcome {
            Ok(access_token) => Ok(AuthToken::bearer(access_token.as_str(), 3600)),
            Err((status, message)) => Err(AuthError::TokenRefreshFailed {
                status: *status,
                message: message.clone(),
            }),
        }
    }
}

/// Interactive sign-in that either succeeds with a fixed token or is cancelled.
pub struct MockInteractive {
    access_token: Option<String>,
    calls: AtomicU32,
}

impl MockInteractive {
    pub fn succeeding(access_token: &str) -> Arc<Self> {
        Arc::new(Self {
            access_token: Some(access_token.to_string()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            access_token: None,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractiveAuth for MockInteractive {
    async fn authenticate(&self, tenant: &str) -> Result<AuthToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.access_token {
            Some(access_token) => Ok(AuthToken::bearer(access_token.as_str(), 3600)
                .with_refresh_token("interactive-refresh")
                .with_tenant(tenant)),
            None => Err(AuthError::UserCancelled),
        }
    }
}

/// Transport answering from a queue of canned responses and recording requests.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ManagementResponse>>,
    requests: Mutex<Vec<ManagementRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: ManagementResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<ManagementRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `METHOD path` of every request sent so far.
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

#[async_trait]
impl ManagementTransport for ScriptedTransport {
    async fn send(&self, request: ManagementRequest) -> Result<ManagementResponse, ApiError> {
        let path = request.path.clone();
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::Parse(format!("no scripted response for {}", path)))
    }
}
