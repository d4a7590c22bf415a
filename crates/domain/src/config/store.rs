use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which durable backend holds session credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per session under `path`. Only durable when `path`
    /// lives on persistent storage.
    #[default]
    File,
    /// MongoDB document store.
    Mongo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "d_path")]
    pub path: PathBuf,
    /// Environment variable holding the MongoDB connection string.
    #[serde(default = "d_mongo_uri_env")]
    pub mongo_uri_env: String,
    #[serde(default = "d_database")]
    pub database: String,
    #[serde(default = "d_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: d_path(),
            mongo_uri_env: d_mongo_uri_env(),
            database: d_database(),
            collection: d_collection(),
        }
    }
}

fn d_path() -> PathBuf {
    PathBuf::from("./data/credentials")
}
fn d_mongo_uri_env() -> String {
    "MONGO_URI".into()
}
fn d_database() -> String {
    "linkbridge".into()
}
fn d_collection() -> String {
    "sessions".into()
}
