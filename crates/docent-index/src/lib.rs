//! Corpus ingestion, vector indexing, and semantic retrieval.
//!
//! Build time: markdown documents with front matter are chunked with
//! overlap and embedded into an exact-scan cosine index, persisted as a
//! checksummed snapshot. Query time: the retriever embeds the question,
//! scans the published snapshot, and returns floor-filtered top-k hits.

pub mod chunker;
pub mod corpus;
pub mod error;
pub mod indexer;
pub mod retriever;
pub mod store;

pub use error::{IndexError, Result};
