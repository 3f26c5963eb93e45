
use super::{ChunkMetadata, VectorRecord};
use crate::ForgeError;
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::{
    Connection, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum number of records written per LanceDB add call.
pub const MAX_UPSERT_BATCH: usize = 100;

/// How many rows the fallback delete path will enumerate before giving up.
const FALLBACK_SCAN_LIMIT: usize = 10_000;

/// Vector database store using LanceDB for similarity search.
///
/// Every read and delete takes a tenant id and applies it as a filter
/// predicate; there is no unscoped query surface.
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    dimension: usize,
}

/// Search result from vector similarity search
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub metadata: ChunkMetadata,
    pub similarity: f32,
    pub distance: f32,
}

impl VectorStore {
    /// Open (or create) the vector store at `db_path` with a fixed embedding
    /// dimension. A pre-existing table with a different dimension is an
    /// error, never a silent re-index.
    #[inline]
    pub async fn new(db_path: &Path, dimension: usize) -> crate::Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ForgeError::Database(format!("Failed to create vector database directory: {e}"))
            })?;
        }

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to connect to LanceDB: {e}")))?;

        let store = Self {
            connection,
            table_name: "chunks".to_string(),
            dimension,
        };

        store.initialize_table().await?;

        info!("Vector store initialized successfully");
        Ok(store)
    }

    async fn initialize_table(&self) -> crate::Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to list tables: {e}")))?;

        if table_names.contains(&self.table_name) {
            let existing = self.existing_vector_dimension().await?;
            if existing != self.dimension {
                return Err(ForgeError::Database(format!(
                    "Existing chunks table has dimension {existing}, expected {}",
                    self.dimension
                )));
            }
            debug!("Chunks table already exists with dimension {}", existing);
            return Ok(());
        }

        info!("Creating chunks table with {} dimensions", self.dimension);

        let schema = self.create_schema();
        self.connection
            .create_empty_table(&self.table_name, schema)
            .execute()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to create table: {e}")))?;

        Ok(())
    }

    async fn existing_vector_dimension(&self) -> crate::Result<usize> {
        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to get table schema: {e}")))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(ForgeError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimension as i32,
                ),
                false,
            ),
            Field::new("tenant_id", DataType::Utf8, false),
            Field::new("source_id", DataType::Utf8, false),
            Field::new("source_kind", DataType::Utf8, false),
            Field::new("locator", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn open_table(&self) -> crate::Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to open table: {e}")))
    }

    /// Upsert records: any existing rows with the same ids are removed first,
    /// so deterministic ids make re-ingestion overwrite instead of duplicate.
    /// Writes go out in batches of at most [`MAX_UPSERT_BATCH`].
    #[inline]
    pub async fn upsert(&self, records: &[VectorRecord]) -> crate::Result<()> {
        if records.is_empty() {
            debug!("No embeddings to store");
            return Ok(());
        }

        for record in records {
            if record.vector.len() != self.dimension {
                return Err(ForgeError::Validation(format!(
                    "Embedding for '{}' has dimension {}, expected {}",
                    record.id,
                    record.vector.len(),
                    self.dimension
                )));
            }
        }

        let table = self.open_table().await?;

        for batch in records.chunks(MAX_UPSERT_BATCH) {
            let id_list = batch.iter().map(|r| quote_literal(&r.id)).join(", ");
            table
                .delete(&format!("id IN ({id_list})"))
                .await
                .map_err(|e| {
                    ForgeError::Database(format!("Failed to clear existing embeddings: {e}"))
                })?;

            let record_batch = self.create_record_batch(batch)?;
            let schema = record_batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
            table
                .add(reader)
                .execute()
                .await
                .map_err(|e| ForgeError::Database(format!("Failed to insert embeddings: {e}")))?;
        }

        info!("Successfully stored {} embeddings", records.len());
        Ok(())
    }

    fn create_record_batch(&self, records: &[VectorRecord]) -> crate::Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut tenant_ids = Vec::with_capacity(len);
        let mut source_ids = Vec::with_capacity(len);
        let mut source_kinds = Vec::with_capacity(len);
        let mut locators = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        let mut flat_values = Vec::with_capacity(len * self.dimension);
        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            tenant_ids.push(record.metadata.tenant_id.as_str());
            source_ids.push(record.metadata.source_id.as_str());
            source_kinds.push(record.metadata.source_kind.as_str());
            locators.push(record.metadata.locator.as_str());
            contents.push(record.metadata.content.as_str());
            chunk_indices.push(record.metadata.chunk_index);
            created_ats.push(record.metadata.created_at.as_str());
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| ForgeError::Database(format!("Failed to create vector array: {e}")))?;

        let arrays: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(tenant_ids)),
            Arc::new(StringArray::from(source_ids)),
            Arc::new(StringArray::from(source_kinds)),
            Arc::new(StringArray::from(locators)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| ForgeError::Database(format!("Failed to create record batch: {e}")))
    }

    /// Search for similar chunks within a single tenant's data.
    ///
    /// The tenant filter is not optional. Results from other tenants can
    /// never appear, regardless of similarity.
    #[inline]
    pub async fn search(
        &self,
        tenant_id: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> crate::Result<Vec<VectorMatch>> {
        debug!(
            "Searching {} vectors for tenant {} with limit {}",
            self.dimension, tenant_id, limit
        );

        let table = self.open_table().await?;
        let results = table
            .vector_search(query_vector)
            .map_err(|e| ForgeError::Database(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .only_if(format!("tenant_id = {}", quote_literal(tenant_id)))
            .limit(limit)
            .execute()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to execute search: {e}")))?;

        self.parse_match_stream(results).await
    }

    /// Delete all of a tenant's rows, optionally narrowed to one metadata
    /// column equaling a value. The value is quoted before it enters the
    /// predicate, so a caller-supplied id can never widen the filter past
    /// the tenant.
    ///
    /// Tries a native predicate delete first. If the engine rejects it, falls
    /// back to enumerating matching ids with a zero-vector scan and deleting
    /// them by id, so stale chunks cannot survive an engine quirk.
    #[inline]
    pub async fn delete_scoped(
        &self,
        tenant_id: &str,
        extra: Option<(&str, &str)>,
    ) -> crate::Result<()> {
        let mut predicate = format!("tenant_id = {}", quote_literal(tenant_id));
        if let Some((column, value)) = extra {
            predicate.push_str(&format!(" AND {column} = {}", quote_literal(value)));
        }
        debug!("Deleting vectors where {}", predicate);

        let table = self.open_table().await?;
        match table.delete(&predicate).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    "Predicate delete failed ({}), falling back to id enumeration",
                    e
                );
                self.delete_by_enumeration(&table, &predicate).await
            }
        }
    }

    async fn delete_by_enumeration(&self, table: &Table, predicate: &str) -> crate::Result<()> {
        let zero_vector = vec![0.0f32; self.dimension];
        let results = table
            .vector_search(zero_vector.as_slice())
            .map_err(|e| ForgeError::Database(format!("Failed to create fallback scan: {e}")))?
            .column("vector")
            .only_if(predicate.to_string())
            .limit(FALLBACK_SCAN_LIMIT)
            .execute()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to execute fallback scan: {e}")))?;

        let ids = collect_ids(results).await?;
        if ids.is_empty() {
            return Ok(());
        }

        for batch in ids.chunks(MAX_UPSERT_BATCH) {
            let id_list = batch.iter().map(|id| quote_literal(id)).join(", ");
            table
                .delete(&format!("id IN ({id_list})"))
                .await
                .map_err(|e| ForgeError::Database(format!("Fallback delete failed: {e}")))?;
        }

        info!("Fallback delete removed {} vectors", ids.len());
        Ok(())
    }

    /// Total number of stored vectors, optionally filtered by a predicate.
    #[inline]
    pub async fn count(&self, filter: Option<String>) -> crate::Result<usize> {
        let table = self.open_table().await?;
        table
            .count_rows(filter)
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to count rows: {e}")))
    }

    async fn parse_match_stream(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> crate::Result<Vec<VectorMatch>> {
        let mut matches = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| ForgeError::Database(format!("Failed to read result stream: {e}")))?
        {
            matches.extend(parse_match_batch(&batch)?);
        }

        debug!("Parsed {} search results from stream", matches.len());
        Ok(matches)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> crate::Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ForgeError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| ForgeError::Database(format!("Invalid {name} column type")))
}

fn parse_match_batch(batch: &RecordBatch) -> crate::Result<Vec<VectorMatch>> {
    let tenant_ids = string_column(batch, "tenant_id")?;
    let source_ids = string_column(batch, "source_id")?;
    let source_kinds = string_column(batch, "source_kind")?;
    let locators = string_column(batch, "locator")?;
    let contents = string_column(batch, "content")?;
    let created_ats = string_column(batch, "created_at")?;

    let chunk_indices = batch
        .column_by_name("chunk_index")
        .ok_or_else(|| ForgeError::Database("Missing chunk_index column".to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| ForgeError::Database("Invalid chunk_index column type".to_string()))?;

    let distances = batch
        .column_by_name("_distance")
        .map(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut matches = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata = ChunkMetadata {
            tenant_id: tenant_ids.value(row).to_string(),
            source_id: source_ids.value(row).to_string(),
            source_kind: source_kinds.value(row).to_string(),
            locator: locators.value(row).to_string(),
            content: contents.value(row).to_string(),
            chunk_index: chunk_indices.value(row),
            created_at: created_ats.value(row).to_string(),
        };

        let distance = distances
            .flatten()
            .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        matches.push(VectorMatch {
            metadata,
            // Convert distance to similarity score (higher is better)
            similarity: 1.0 - distance,
            distance,
        });
    }

    Ok(matches)
}

async fn collect_ids(
    mut results: lancedb::arrow::SendableRecordBatchStream,
) -> crate::Result<Vec<String>> {
    let mut ids = Vec::new();

    while let Some(batch) = results
        .try_next()
        .await
        .map_err(|e| ForgeError::Database(format!("Failed to read result stream: {e}")))?
    {
        let id_column = string_column(&batch, "id")?;
        for row in 0..batch.num_rows() {
            ids.push(id_column.value(row).to_string());
        }
    }

    Ok(ids)
}

/// Quote a string for use inside a filter predicate, escaping embedded
/// single quotes SQL-style.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
