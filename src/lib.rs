//! Exocortex - personal long-term memory for agents and humans
//!
//! Freeform textual memories are persisted, deduplicated, connected by an
//! extracted knowledge graph, retrieved by hybrid semantic+lexical search,
//! consolidated as they accumulate, and faded out by importance-driven decay.

pub mod backup;
pub mod content;
pub mod embedding;
pub mod error;
pub mod goals;
pub mod graph;
pub mod intelligence;
pub mod maintenance;
pub mod mcp;
pub mod search;
pub mod storage;
pub mod store;
pub mod types;

pub use error::{ExocortexError, Result};
pub use storage::Storage;
pub use store::MemoryStore;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
