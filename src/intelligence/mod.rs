//! Content intelligence: entity/relationship extraction, auto-tagging,
//! keyword generation, consolidation, markdown ingestion, session digests
//!
//! Everything here is heuristic and language-specific (English-biased
//! whitespace tokenization); callers treat confidences as weak signals.

pub mod auto_tagging;
pub mod consolidation;
pub mod document_ingest;
pub mod entities;
pub mod keywords;
pub mod session_digest;
