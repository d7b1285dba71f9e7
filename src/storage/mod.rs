//! Durable client storage.
//!
//! The session is mirrored into a small string key/value store so that a restarted
//! client can restore it without a server round-trip. Only the session store reads and
//! writes these keys.

mod memory;
mod file;

pub use memory::MemoryStorage;
pub use file::FileStorage;

use std::sync::Arc;

use thiserror::Error;

use crate::error::AppError;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

/// All keys that make up a persisted session; they are written and cleared together.
pub const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::storage("storage_error".to_string(), err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// String key/value storage that survives a client restart.
pub trait DurableStorage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

impl<T: DurableStorage + ?Sized> DurableStorage for Arc<T> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> { (**self).get(key) }
    fn set(&self, key: &str, value: &str) -> StorageResult<()> { (**self).set(key, value) }
    fn remove(&self, key: &str) -> StorageResult<()> { (**self).remove(key) }
}

/// Remove every session key, continuing past individual failures.
/// Returns the number of keys that could not be removed.
pub fn clear_session_keys<S: DurableStorage + ?Sized>(storage: &S) -> usize {
    let mut failed = 0usize;
    for key in SESSION_KEYS {
        if let Err(e) = storage.remove(key) {
            tracing::warn!(target: "echo::storage", "failed to remove '{}': {}", key, e);
            failed += 1;
        }
    }
    failed
}
