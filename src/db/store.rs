//! Durable document store contract

use async_trait::async_trait;

use super::document::GrainStateDoc;
use crate::types::Result;

/// Contract required of the durable document database.
///
/// `tenant` selects a database-level partition; `None` is the default
/// tenant. Errors surface unchanged as `GranaryError::DurableStore`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the current document by id, or None when absent.
    async fn load(&self, id: &str, tenant: Option<&str>) -> Result<Option<GrainStateDoc>>;

    /// Atomic replace-or-insert. The document is durable on return.
    async fn upsert(&self, doc: &GrainStateDoc, tenant: Option<&str>) -> Result<()>;

    /// Idempotent delete by id. Returns after durability.
    async fn delete(&self, id: &str, tenant: Option<&str>) -> Result<()>;
}
