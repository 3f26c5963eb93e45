use super::*;

#[test]
fn vector_record_structure() {
    let metadata = ChunkMetadata {
        tenant_id: "tenant_123".to_string(),
        source_id: "source_456".to_string(),
        source_kind: "website".to_string(),
        locator: "https://example.com/pricing".to_string(),
        content: "This is test content for the chunk".to_string(),
        chunk_index: 0,
        created_at: "2024-01-01T00:00:00Z".to_string(),
    };

    let record = VectorRecord {
        id: "embedding_123".to_string(),
        vector: vec![0.1, 0.2, 0.3],
        metadata,
    };

    assert_eq!(record.id, "embedding_123");
    assert_eq!(record.vector.len(), 3);
    assert_eq!(record.metadata.tenant_id, "tenant_123");
    assert_eq!(record.metadata.chunk_index, 0);
}

#[test]
fn chunk_metadata_serialization() {
    let metadata = ChunkMetadata {
        tenant_id: "tenant_a".to_string(),
        source_id: "source_1".to_string(),
        source_kind: "file".to_string(),
        locator: "manual.pdf".to_string(),
        content: "Test content".to_string(),
        chunk_index: 5,
        created_at: "2024-01-01T00:00:00Z".to_string(),
    };

    let json = serde_json::to_string(&metadata).expect("can serialize json");
    let deserialized: ChunkMetadata = serde_json::from_str(&json).expect("can parse json");

    assert_eq!(metadata.tenant_id, deserialized.tenant_id);
    assert_eq!(metadata.locator, deserialized.locator);
}

#[test]
fn vector_id_is_deterministic() {
    let a = vector_id("tenant-a", "website", "https://example.com/page", 3);
    let b = vector_id("tenant-a", "website", "https://example.com/page", 3);
    assert_eq!(a, b);
}

#[test]
fn vector_id_varies_by_tenant_locator_and_ordinal() {
    let base = vector_id("tenant-a", "website", "https://example.com/page", 0);
    assert_ne!(base, vector_id("tenant-b", "website", "https://example.com/page", 0));
    assert_ne!(base, vector_id("tenant-a", "website", "https://example.com/other", 0));
    assert_ne!(base, vector_id("tenant-a", "website", "https://example.com/page", 1));
}

#[test]
fn vector_id_shape() {
    let id = vector_id("tenant-a", "file", "report with spaces.pdf", 2);
    assert!(id.starts_with("tenant-a_file_"));
    assert!(id.ends_with("_2"));
    // Hash segment is 16 hex characters regardless of locator content.
    let hash = id
        .strip_prefix("tenant-a_file_")
        .and_then(|rest| rest.strip_suffix("_2"))
        .expect("id has expected shape");
    assert_eq!(hash.len(), 16);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(!id.contains(' '));
}
