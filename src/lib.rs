//! Azure Service Management credential, session, and REST core.
//!
//! - [`auth::CredentialStore`] keeps the authentication mode and tokens.
//! - [`subscriptions::SubscriptionRegistry`] lists subscriptions for the active mode.
//! - [`rest::ManagementRestClient`] calls the Service Management REST API.
//! - [`session::RetryingSession`] and [`session::TokenRefresher`] refresh an
//!   expired token and replay the failed call once.

#![deny(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod rest;
pub mod session;
pub mod settings;
pub mod subscriptions;

#[cfg(test)]
mod testing;
