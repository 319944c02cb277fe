//! Durable document store
//!
//! Typed load/upsert/delete of grain state documents, optionally scoped to
//! a database tenant. MongoDB is the production adapter; the in-memory
//! adapter backs tests and cache-less single-process deployments.

mod document;
mod memory;
mod mongo;
mod store;

pub use document::GrainStateDoc;
pub use memory::MemoryStateStore;
pub use mongo::MongoStateStore;
pub use store::DocumentStore;
