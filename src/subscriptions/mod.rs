//! Azure subscriptions: the record type, the XML formats that describe them,
//! and the registry that loads and tracks selection for the active mode.

pub mod publish_settings;
pub mod registry;

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::SecureString;
use crate::error::ManagementError;

pub use registry::SubscriptionRegistry;

/// An Azure subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    /// Owning AD tenant; empty in certificate mode.
    pub tenant_id: String,
    pub selected: bool,
    /// Base64 management certificate from the publish-settings file.
    pub management_certificate: Option<SecureString>,
    pub service_management_url: Option<String>,
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Fetches the subscription listing for the signed-in Active Directory user.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Raw `<Subscriptions>` XML.
    async fn list_subscriptions_xml(&self) -> Result<String, ManagementError>;
}
