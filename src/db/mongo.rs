//! MongoDB document store

use async_trait::async_trait;
use bson::doc;
use mongodb::{Client, Collection};
use tracing::info;

use super::document::GrainStateDoc;
use super::store::DocumentStore;
use crate::types::{GranaryError, Result};

/// MongoDB-backed grain state store.
///
/// One typed collection per storage-name. The database tenant selects the
/// database; the default database serves the default tenant.
#[derive(Clone)]
pub struct MongoStateStore {
    client: Client,
    default_db: String,
    collection: String,
}

impl MongoStateStore {
    /// Connect and verify the deployment with a ping.
    pub async fn connect(uri: &str, db_name: &str, collection: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            GranaryError::DurableStore(format!("Failed to connect to MongoDB: {}", e))
        })?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GranaryError::DurableStore(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            default_db: db_name.to_string(),
            collection: collection.to_string(),
        })
    }

    fn collection(&self, tenant: Option<&str>) -> Collection<GrainStateDoc> {
        let db = tenant.filter(|t| !t.is_empty()).unwrap_or(&self.default_db);
        self.client.database(db).collection(&self.collection)
    }
}

#[async_trait]
impl DocumentStore for MongoStateStore {
    async fn load(&self, id: &str, tenant: Option<&str>) -> Result<Option<GrainStateDoc>> {
        Ok(self
            .collection(tenant)
            .find_one(doc! { "_id": id })
            .await?)
    }

    async fn upsert(&self, doc: &GrainStateDoc, tenant: Option<&str>) -> Result<()> {
        self.collection(tenant)
            .replace_one(doc! { "_id": &doc.id }, doc)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str, tenant: Option<&str>) -> Result<()> {
        self.collection(tenant).delete_one(doc! { "_id": id }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running MongoDB instance; the
    // in-memory store exercises the DocumentStore contract in-process.
}
