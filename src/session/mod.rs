//! Session layer: the resource-operations capability set and the
//! refresh-and-retry protocol shared by every authenticated call.

pub mod operations;
pub mod refresher;
pub mod retry;

pub use operations::ResourceOperations;
pub use refresher::{TokenRefresher, Unauthorized};
pub use retry::RetryingSession;
