// Data layer (always compiled)
pub mod cache;
pub mod db;
pub mod deadline;
pub mod error;
pub mod invalidation;
pub mod subscriptions;
pub mod version;

// HTTP service (only compiled with server feature)
#[cfg(feature = "server")]
pub mod server;

pub use deadline::{Deadline, DeadlineExceeded};
pub use error::BackendError;
