//! One JSON file per session, replaced atomically on every write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use lb_domain::error::{Error, Result};

use super::CredentialStore;
use crate::types::Credentials;

pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }
}

/// Session ids become file names; anything outside `[A-Za-z0-9_-]` is
/// replaced so an id can never escape the store directory.
fn file_stem(session_id: &str) -> String {
    let stem: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "_".into()
    } else {
        stem
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn put(&self, session_id: &str, credentials: &Credentials) -> Result<()> {
        let path = self.path_for(session_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(credentials)?;

        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Dependency(format!(
                "writing credentials to {}: {e}",
                tmp.display()
            )));
        }
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            Error::Dependency(format!("replacing {}: {e}", path.display()))
        })?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Credentials>> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                Error::Dependency(format!("corrupt credentials record {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Dependency(format!(
                "reading credentials from {}: {e}",
                path.display()
            ))),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Dependency(format!(
                "deleting credentials at {}: {e}",
                path.display()
            ))),
        }
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, FileCredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let (_dir, store) = store();
        assert!(store.get("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let (_dir, store) = store();
        store.put("default", &Credentials::new(json!({ "v": 1 }))).await.unwrap();
        store.put("default", &Credentials::new(json!({ "v": 2 }))).await.unwrap();

        let got = store.get("default").await.unwrap().unwrap();
        assert_eq!(got.as_value(), &json!({ "v": 2 }));
        assert!(!store.dir().join("default.json.tmp").exists());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let (dir, store) = store();
        store.put("shop", &Credentials::new(json!({ "k": "x" }))).await.unwrap();
        drop(store);

        let reopened = FileCredentialStore::new(dir.path()).unwrap();
        assert!(reopened.get("shop").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.put("default", &Credentials::new(json!({}))).await.unwrap();
        store.delete("default").await.unwrap();
        store.delete("default").await.unwrap();
        assert!(store.get("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let (_dir, store) = store();
        std::fs::write(store.dir().join("default.json"), b"{not json").unwrap();
        assert!(matches!(store.get("default").await, Err(Error::Dependency(_))));
    }

    #[test]
    fn session_ids_cannot_escape_directory() {
        assert_eq!(file_stem("../../etc/passwd"), "______etc_passwd");
        assert_eq!(file_stem("shop-bot_1"), "shop-bot_1");
        assert_eq!(file_stem(""), "_");
    }
}
