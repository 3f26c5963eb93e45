// LanceDB vector database module
// Handles vector storage and tenant-scoped similarity search for embeddings

#[cfg(test)]
mod tests;

pub mod vector_store;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique identifier for this embedding
    pub id: String,
    /// The vector embedding (fixed dimension, set at store creation)
    pub vector: Vec<f32>,
    /// Metadata about the chunk this embedding represents
    pub metadata: ChunkMetadata,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Tenant that owns this chunk. Every read and delete is scoped by it.
    pub tenant_id: String,
    /// ID of the training source this chunk came from
    pub source_id: String,
    /// Kind of the training source ("website", "file", "text", "csv")
    pub source_kind: String,
    /// Where the chunk came from within the source (a URL, a file name)
    pub locator: String,
    /// The actual text content of the chunk
    pub content: String,
    /// Index of this chunk within its source (for ordering)
    pub chunk_index: u32,
    /// Timestamp when this embedding was created
    pub created_at: String,
}

/// Deterministic vector id for a chunk.
///
/// The locator is hashed rather than embedded verbatim so ids stay short and
/// free of characters that would need escaping in filter predicates.
/// Re-ingesting the same source yields the same ids, which is what lets
/// upserts overwrite instead of duplicate.
#[inline]
pub fn vector_id(tenant_id: &str, source_kind: &str, locator: &str, chunk_index: u32) -> String {
    let digest = Sha256::digest(locator.as_bytes());
    let mut hash = String::with_capacity(16);
    for byte in &digest[..8] {
        hash.push_str(&format!("{byte:02x}"));
    }
    format!("{tenant_id}_{source_kind}_{hash}_{chunk_index}")
}
