//! In-memory document store
//!
//! DashMap-backed implementation of the durable store contract. Backs tests
//! and single-process deployments that run without a database.

use async_trait::async_trait;
use dashmap::DashMap;

use super::document::GrainStateDoc;
use super::store::DocumentStore;
use crate::types::Result;

/// In-memory grain state store, keyed by (tenant, id)
#[derive(Default)]
pub struct MemoryStateStore {
    documents: DashMap<(String, String), GrainStateDoc>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tenant_key(tenant: Option<&str>) -> String {
        tenant.filter(|t| !t.is_empty()).unwrap_or("").to_string()
    }

    /// Snapshot of a document. Inspection helper; does not mutate.
    pub fn document(&self, id: &str, tenant: Option<&str>) -> Option<GrainStateDoc> {
        self.documents
            .get(&(Self::tenant_key(tenant), id.to_string()))
            .map(|doc| doc.clone())
    }

    /// Total documents across all tenants.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStateStore {
    async fn load(&self, id: &str, tenant: Option<&str>) -> Result<Option<GrainStateDoc>> {
        Ok(self.document(id, tenant))
    }

    async fn upsert(&self, doc: &GrainStateDoc, tenant: Option<&str>) -> Result<()> {
        self.documents
            .insert((Self::tenant_key(tenant), doc.id.clone()), doc.clone());
        Ok(())
    }

    async fn delete(&self, id: &str, tenant: Option<&str>) -> Result<()> {
        self.documents
            .remove(&(Self::tenant_key(tenant), id.to_string()));
        Ok(())
    }
}
