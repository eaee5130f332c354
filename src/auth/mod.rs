//! Azure authentication.
//!
//! Token types, the credential store that persists them, the Azure AD OAuth2
//! client with PKCE, and browser-based interactive sign-in.

pub mod callback_server;
pub mod credential_store;
pub mod interactive;
pub mod oauth;
pub mod token;

pub use credential_store::CredentialStore;
pub use interactive::{BrowserInteractiveAuth, InteractiveAuth};
pub use oauth::{OAuth2Client, TokenRedeemer};
pub use token::{AuthToken, AuthenticationMode, SecureString};
