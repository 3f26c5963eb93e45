
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ForgeError;
use crate::crawler::CrawlClient;
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::lancedb::{ChunkMetadata, VectorRecord, vector_id};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewRowSet, NewTrainingSource, SourceKind, TrainingSource};
use crate::embeddings::chunking::{ChunkConfig, chunk_text};
use crate::embeddings::openai::EmbeddingProvider;
use crate::extract::{extract_document_text, parse_csv};

/// Summary of a completed ingestion, returned to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source_id: String,
    pub pages: usize,
    pub chunks: usize,
}

/// One unit of text to index: where it came from and what it says.
struct SourceText {
    locator: String,
    text: String,
}

/// Ingestion orchestrator: turns raw tenant inputs into catalog rows and
/// indexed vectors.
///
/// Every path follows the same shape: register the source, purge any stale
/// vectors for it, chunk, embed, upsert, then record the final chunk count.
/// If anything fails after the source row exists, the row is deleted again
/// so the catalog never shows a source that was not actually indexed.
pub struct Ingestor {
    database: Database,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    crawler: CrawlClient,
    chunking: ChunkConfig,
}

impl Ingestor {
    #[inline]
    pub fn new(
        database: Database,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        crawler: CrawlClient,
        chunking: ChunkConfig,
    ) -> Self {
        Self {
            database,
            vectors,
            embedder,
            crawler,
            chunking,
        }
    }

    /// Crawl a website and index every returned page.
    #[inline]
    pub async fn ingest_website(
        &self,
        tenant_id: &str,
        url: &str,
        source_id: Option<&str>,
    ) -> crate::Result<IngestReport> {
        if url.trim().is_empty() {
            return Err(ForgeError::Validation("Website URL is empty".to_string()));
        }

        let source = self
            .register_source(tenant_id, SourceKind::Website, url, source_id)
            .await?;

        let result = async {
            let pages = self
                .crawler
                .crawl_site(url)
                .await
                .map_err(|e| ForgeError::Crawler(e.to_string()))?;

            if pages.is_empty() {
                return Err(ForgeError::Crawler(format!("Crawl of {url} returned no pages")));
            }

            let texts: Vec<SourceText> = pages
                .into_iter()
                .map(|page| SourceText {
                    locator: page.url,
                    text: page.markdown,
                })
                .collect();

            self.index_texts(tenant_id, &source, &texts).await
        }
        .await;

        self.finish(tenant_id, source, result).await
    }

    /// Index a block of pasted text under a display title.
    #[inline]
    pub async fn ingest_text(
        &self,
        tenant_id: &str,
        title: &str,
        text: &str,
        source_id: Option<&str>,
    ) -> crate::Result<IngestReport> {
        if text.trim().is_empty() {
            return Err(ForgeError::Validation("Text content is empty".to_string()));
        }
        let title = if title.trim().is_empty() { "Pasted text" } else { title };

        let source = self
            .register_source(tenant_id, SourceKind::Text, title, source_id)
            .await?;

        let texts = vec![SourceText {
            locator: title.to_string(),
            text: text.to_string(),
        }];
        let result = self.index_texts(tenant_id, &source, &texts).await;

        self.finish(tenant_id, source, result).await
    }

    /// Extract text from an uploaded document (PDF, DOCX, or plain text) and
    /// index it.
    #[inline]
    pub async fn ingest_file(
        &self,
        tenant_id: &str,
        file_name: &str,
        bytes: &[u8],
        source_id: Option<&str>,
    ) -> crate::Result<IngestReport> {
        if bytes.is_empty() {
            return Err(ForgeError::Validation(format!("Uploaded file {file_name} is empty")));
        }

        let source = self
            .register_source(tenant_id, SourceKind::File, file_name, source_id)
            .await?;

        let result = async {
            let text = extract_document_text(file_name, bytes)
                .map_err(|e| ForgeError::Extraction(format!("{e:#}")))?;

            if text.trim().is_empty() {
                return Err(ForgeError::Extraction(format!(
                    "No text could be extracted from {file_name}"
                )));
            }

            let texts = vec![SourceText {
                locator: file_name.to_string(),
                text,
            }];
            self.index_texts(tenant_id, &source, &texts).await
        }
        .await;

        self.finish(tenant_id, source, result).await
    }

    /// Parse a CSV upload into a row set for structured analysis and index a
    /// flattened rendering of its rows for semantic search. Re-uploading the
    /// same file name replaces the previous row set.
    #[inline]
    pub async fn ingest_csv(
        &self,
        tenant_id: &str,
        file_name: &str,
        csv_text: &str,
        source_id: Option<&str>,
    ) -> crate::Result<IngestReport> {
        let tabular =
            parse_csv(file_name, csv_text).map_err(|e| ForgeError::Validation(format!("{e:#}")))?;

        let source = self
            .register_source(tenant_id, SourceKind::Csv, file_name, source_id)
            .await?;

        let result = async {
            self.database
                .replace_row_set(&NewRowSet {
                    tenant_id: tenant_id.to_string(),
                    file_name: file_name.to_string(),
                    table_name: tabular.table_name.clone(),
                    headers: tabular.headers.clone(),
                    rows: tabular.rows.clone(),
                })
                .await?;

            let texts = vec![SourceText {
                locator: file_name.to_string(),
                text: tabular.flattened_text(),
            }];
            self.index_texts(tenant_id, &source, &texts).await
        }
        .await;

        self.finish(tenant_id, source, result).await
    }

    /// Remove a training source: its vectors, any row set it carried, and
    /// its catalog row. Returns false when the source does not exist.
    #[inline]
    pub async fn remove_source(&self, tenant_id: &str, source_id: &str) -> crate::Result<bool> {
        let Some(source) = self.database.get_source(tenant_id, source_id).await? else {
            return Ok(false);
        };

        self.vectors
            .delete_scoped(tenant_id, Some(("source_id", source_id)))
            .await?;

        if source.kind == SourceKind::Csv {
            self.database
                .delete_row_set_by_file_name(tenant_id, &source.name)
                .await?;
        }

        let deleted = self.database.delete_source(tenant_id, source_id).await?;
        info!(
            "Removed source {} ({}) for tenant {}",
            source_id, source.kind, tenant_id
        );
        Ok(deleted)
    }

    /// List the tenant's training sources, newest first.
    #[inline]
    pub async fn list_sources(&self, tenant_id: &str) -> crate::Result<Vec<TrainingSource>> {
        Ok(self.database.list_sources(tenant_id).await?)
    }

    /// Register (or refresh) the catalog row for this ingest. Callers may
    /// pin the id to re-ingest a known source; otherwise a source with the
    /// same kind and name reuses its id, which keeps vector ids stable
    /// across re-ingestion.
    async fn register_source(
        &self,
        tenant_id: &str,
        kind: SourceKind,
        name: &str,
        requested_id: Option<&str>,
    ) -> crate::Result<TrainingSource> {
        let existing_id = match requested_id {
            Some(id) => Some(id.to_string()),
            None => self
                .database
                .find_source_by_name(tenant_id, kind, name)
                .await?
                .map(|s| s.id),
        };
        let id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(self
            .database
            .upsert_source(&NewTrainingSource {
                id,
                tenant_id: tenant_id.to_string(),
                kind,
                name: name.to_string(),
            })
            .await?)
    }

    /// Chunk, embed, and upsert the given texts for a registered source.
    async fn index_texts(
        &self,
        tenant_id: &str,
        source: &TrainingSource,
        texts: &[SourceText],
    ) -> crate::Result<IngestReport> {
        // Clear stale vectors before writing. Best effort: a failure here
        // leaves at worst an orphan that the id-stable upsert will overwrite.
        if let Err(e) = self
            .vectors
            .delete_scoped(tenant_id, Some(("source_id", source.id.as_str())))
            .await
        {
            warn!("Pre-ingest cleanup for source {} failed: {}", source.id, e);
        }

        let created_at = Utc::now().to_rfc3339();
        let kind = source.kind.as_str();
        let mut records = Vec::new();
        let mut chunk_texts = Vec::new();

        for text in texts {
            let chunks = chunk_text(&text.text, &self.chunking);
            debug!("{} produced {} chunks", text.locator, chunks.len());

            for (ordinal, chunk) in chunks.into_iter().enumerate() {
                let ordinal = ordinal as u32;
                records.push(VectorRecord {
                    id: vector_id(tenant_id, kind, &text.locator, ordinal),
                    vector: Vec::new(),
                    metadata: ChunkMetadata {
                        tenant_id: tenant_id.to_string(),
                        source_id: source.id.clone(),
                        source_kind: kind.to_string(),
                        locator: text.locator.clone(),
                        content: chunk.clone(),
                        chunk_index: ordinal,
                        created_at: created_at.clone(),
                    },
                });
                chunk_texts.push(chunk);
            }
        }

        if records.is_empty() {
            return Err(ForgeError::Validation(
                "Source produced no indexable text".to_string(),
            ));
        }

        let embeddings = self
            .embedder
            .embed_batch(&chunk_texts)
            .await
            .map_err(|e| ForgeError::Embedding(format!("{e:#}")))?;
        for (record, embedding) in records.iter_mut().zip(embeddings) {
            record.vector = embedding;
        }

        self.vectors.upsert(&records).await?;
        self.database
            .set_source_chunk_count(tenant_id, &source.id, records.len() as i64)
            .await?;

        info!(
            "Indexed {} chunks from {} locations for source {} (tenant {})",
            records.len(),
            texts.len(),
            source.id,
            tenant_id
        );

        Ok(IngestReport {
            source_id: source.id.clone(),
            pages: texts.len(),
            chunks: records.len(),
        })
    }

    /// Settle an ingest: on failure, delete the in-progress catalog row so
    /// the tenant never sees a source that was not indexed.
    async fn finish(
        &self,
        tenant_id: &str,
        source: TrainingSource,
        result: crate::Result<IngestReport>,
    ) -> crate::Result<IngestReport> {
        if let Err(error) = &result {
            warn!(
                "Ingestion of source {} failed for tenant {}: {}",
                source.id, tenant_id, error
            );
            if let Err(cleanup) = self.database.delete_source(tenant_id, &source.id).await {
                warn!(
                    "Failed to remove in-progress source {} after error: {}",
                    source.id, cleanup
                );
            }
        }
        result
    }
}
