//! Correlation query engine
//!
//! Reconstructs the unified cross-signal view for one correlation id:
//!
//! - `storage`: the gateway trait the engine queries
//! - `memory` / `jsonl`: reference in-memory store and JSONL record files
//! - `cache`: TTL read-through context cache
//! - `timeline`: timeline, dependency edge and summary builders
//! - `engine`: parallel fan-out, failure policy and caching

pub mod cache;
pub mod engine;
pub mod error;
pub mod jsonl;
pub mod memory;
pub mod storage;
pub mod timeline;

pub use cache::ContextCache;
pub use engine::{ContextLookup, QueryEngine};
pub use error::{CorrelationError, StorageError, StorageResult};
pub use jsonl::{read_records, JsonlSink, JsonlSinkConfig};
pub use memory::MemoryStore;
pub use storage::StorageGateway;
pub use timeline::build_context;
