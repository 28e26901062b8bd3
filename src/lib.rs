pub mod alerts;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod router;
pub mod storage;

pub use error::{ErrorKind, MohawkError, Result, StorageError};
