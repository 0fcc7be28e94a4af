// Quarry Infrastructure - Connectors
// Implements: Backend, BackendFactory, ItemWriter

pub mod backend;
pub mod writer;

pub use backend::{BackendRegistry, GitBackend, HttpBackend};
pub use writer::{DiscardWriter, ElasticsearchWriter, JsonlWriter};
