//! MongoDB credential store: one document per session, keyed by `_id`.

use async_trait::async_trait;
use bson::doc;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

use lb_domain::error::{Error, Result};

use super::CredentialStore;
use crate::types::Credentials;

/// Stored shape. The blob is kept as a JSON string so arbitrary keys in
/// the credential document never clash with BSON field rules.
#[derive(Debug, Serialize, Deserialize)]
struct CredentialRecord {
    #[serde(rename = "_id")]
    session_id: String,
    data: String,
    updated_at: bson::DateTime,
}

pub struct MongoCredentialStore {
    collection: Collection<CredentialRecord>,
}

impl MongoCredentialStore {
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let client = Client::with_uri_str(with_timeouts(uri))
            .await
            .map_err(|e| Error::Dependency(format!("connecting to MongoDB: {e}")))?;

        client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::Dependency(format!("MongoDB ping failed: {e}")))?;

        tracing::info!(database, collection, "using MongoDB credential store");
        Ok(Self {
            collection: client.database(database).collection(collection),
        })
    }
}

/// Bound server selection so an unreachable cluster fails fast.
fn with_timeouts(uri: &str) -> String {
    if uri.contains("serverSelectionTimeoutMS") {
        return uri.to_string();
    }
    let sep = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{sep}serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
}

#[async_trait]
impl CredentialStore for MongoCredentialStore {
    async fn put(&self, session_id: &str, credentials: &Credentials) -> Result<()> {
        let record = CredentialRecord {
            session_id: session_id.to_string(),
            data: serde_json::to_string(credentials)?,
            updated_at: bson::DateTime::now(),
        };
        self.collection
            .replace_one(doc! { "_id": session_id }, &record)
            .upsert(true)
            .await
            .map_err(|e| Error::Dependency(format!("saving credentials: {e}")))?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Credentials>> {
        let record = self
            .collection
            .find_one(doc! { "_id": session_id })
            .await
            .map_err(|e| Error::Dependency(format!("loading credentials: {e}")))?;

        match record {
            Some(r) => serde_json::from_str(&r.data).map(Some).map_err(|e| {
                Error::Dependency(format!("corrupt credentials record for {session_id}: {e}"))
            }),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.collection
            .delete_one(doc! { "_id": session_id })
            .await
            .map_err(|e| Error::Dependency(format!("deleting credentials: {e}")))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mongo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_appended_once() {
        assert_eq!(
            with_timeouts("mongodb://localhost:27017"),
            "mongodb://localhost:27017?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000"
        );
        assert_eq!(
            with_timeouts("mongodb://h/?retryWrites=true"),
            "mongodb://h/?retryWrites=true&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000"
        );
        let explicit = "mongodb://h/?serverSelectionTimeoutMS=500";
        assert_eq!(with_timeouts(explicit), explicit);
    }

    #[test]
    fn record_round_trips_blob_as_string() {
        let creds = Credentials::new(serde_json::json!({ "$weird.key": [1, 2] }));
        let record = CredentialRecord {
            session_id: "default".into(),
            data: serde_json::to_string(&creds).unwrap(),
            updated_at: bson::DateTime::now(),
        };
        let doc = bson::to_document(&record).unwrap();
        assert_eq!(doc.get_str("_id").unwrap(), "default");

        let back: CredentialRecord = bson::from_document(doc).unwrap();
        let restored: Credentials = serde_json::from_str(&back.data).unwrap();
        assert_eq!(restored, creds);
    }
}
