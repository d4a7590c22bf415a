//! Durable key-value persistence for session credentials.
//!
//! The manager depends only on [`CredentialStore`]; the backend is picked
//! from configuration by [`create_store`].

pub mod file;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod mongo;

use std::sync::Arc;

use async_trait::async_trait;

use lb_domain::config::{secret_from_env, StoreBackend, StoreConfig};
use lb_domain::error::{Error, Result};

use crate::types::Credentials;

pub use file::FileCredentialStore;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryCredentialStore;
pub use mongo::MongoCredentialStore;

/// Keyed by session identifier. Writes are last-writer-wins; a failed
/// write leaves the previous record intact.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn put(&self, session_id: &str, credentials: &Credentials) -> Result<()>;
    /// `Ok(None)` when nothing is stored for this session.
    async fn get(&self, session_id: &str) -> Result<Option<Credentials>>;
    /// Idempotent: deleting an absent record succeeds.
    async fn delete(&self, session_id: &str) -> Result<()>;
    fn backend(&self) -> &'static str;
}

/// Build the configured credential store.
pub async fn create_store(cfg: &StoreConfig) -> Result<Arc<dyn CredentialStore>> {
    match cfg.backend {
        StoreBackend::File => {
            let store = FileCredentialStore::new(&cfg.path)?;
            tracing::info!(path = %cfg.path.display(), "using file credential store");
            Ok(Arc::new(store))
        }
        StoreBackend::Mongo => {
            let uri = secret_from_env(&cfg.mongo_uri_env).ok_or_else(|| {
                Error::Configuration(format!(
                    "store.backend = \"mongo\" but {} is not set",
                    cfg.mongo_uri_env
                ))
            })?;
            let store = MongoCredentialStore::connect(&uri, &cfg.database, &cfg.collection).await?;
            Ok(Arc::new(store))
        }
    }
}
