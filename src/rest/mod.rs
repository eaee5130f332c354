//! Azure Service Management REST surface for Mobile Services and SQL.

pub mod client;
pub mod models;
pub mod template;
pub mod transport;

pub use client::ManagementRestClient;
pub use template::{DatabaseTarget, NewService};
pub use transport::{HttpTransport, ManagementTransport};
