use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    ChatLogEntry, Lead, NewLead, NewRowSet, NewTrainingSource, RowSet, SourceKind, TrainingSource,
};

/// Queries over the training source catalog.
pub struct SourceQueries;

impl SourceQueries {
    /// Insert a source row, or refresh an existing one's name and timestamps
    /// when re-ingesting under the same id.
    pub async fn upsert(pool: &SqlitePool, source: &NewTrainingSource) -> Result<TrainingSource> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO training_sources (id, tenant_id, kind, name, chunk_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                chunk_count = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&source.id)
        .bind(&source.tenant_id)
        .bind(source.kind)
        .bind(&source.name)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert training source")?;

        Self::get(pool, &source.tenant_id, &source.id)
            .await?
            .context("Upserted training source was not found")
    }

    pub async fn get(
        pool: &SqlitePool,
        tenant_id: &str,
        source_id: &str,
    ) -> Result<Option<TrainingSource>> {
        sqlx::query_as::<_, TrainingSource>(
            "SELECT id, tenant_id, kind, name, chunk_count, created_at, updated_at
             FROM training_sources WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id)
        .bind(source_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch training source")
    }

    pub async fn list_for_tenant(
        pool: &SqlitePool,
        tenant_id: &str,
    ) -> Result<Vec<TrainingSource>> {
        sqlx::query_as::<_, TrainingSource>(
            "SELECT id, tenant_id, kind, name, chunk_count, created_at, updated_at
             FROM training_sources WHERE tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .context("Failed to list training sources")
    }

    /// Find a source by its display name, used to overwrite prior ingests of
    /// the same file or URL.
    pub async fn find_by_name(
        pool: &SqlitePool,
        tenant_id: &str,
        kind: SourceKind,
        name: &str,
    ) -> Result<Option<TrainingSource>> {
        sqlx::query_as::<_, TrainingSource>(
            "SELECT id, tenant_id, kind, name, chunk_count, created_at, updated_at
             FROM training_sources WHERE tenant_id = ? AND kind = ? AND name = ?",
        )
        .bind(tenant_id)
        .bind(kind)
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("Failed to look up training source by name")
    }

    /// Record the final chunk count once ingestion has completed.
    pub async fn set_chunk_count(
        pool: &SqlitePool,
        tenant_id: &str,
        source_id: &str,
        chunk_count: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE training_sources SET chunk_count = ?, updated_at = ?
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(chunk_count)
        .bind(Utc::now().naive_utc())
        .bind(tenant_id)
        .bind(source_id)
        .execute(pool)
        .await
        .context("Failed to update chunk count")?;
        Ok(())
    }

    /// Returns whether a row was actually removed.
    pub async fn delete(pool: &SqlitePool, tenant_id: &str, source_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM training_sources WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(source_id)
            .execute(pool)
            .await
            .context("Failed to delete training source")?;
        Ok(result.rows_affected() > 0)
    }
}

/// Queries over persisted CSV row sets.
pub struct RowSetQueries;

impl RowSetQueries {
    /// Replace any row set previously uploaded under the same file name for
    /// this tenant, then insert the new one. Re-uploading a CSV is always an
    /// overwrite, never an accumulation.
    pub async fn replace(pool: &SqlitePool, row_set: &NewRowSet) -> Result<RowSet> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM row_sets WHERE tenant_id = ? AND file_name = ?")
            .bind(&row_set.tenant_id)
            .bind(&row_set.file_name)
            .execute(&mut *tx)
            .await
            .context("Failed to clear previous row set")?;

        let id = Uuid::new_v4().to_string();
        let headers =
            serde_json::to_string(&row_set.headers).context("Failed to encode headers")?;
        let rows = serde_json::to_string(&row_set.rows).context("Failed to encode rows")?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO row_sets (id, tenant_id, file_name, table_name, headers, row_count, rows, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&row_set.tenant_id)
        .bind(&row_set.file_name)
        .bind(&row_set.table_name)
        .bind(&headers)
        .bind(row_set.rows.len() as i64)
        .bind(&rows)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert row set")?;

        tx.commit().await.context("Failed to commit row set")?;
        debug!(
            "Stored row set '{}' ({} rows) for tenant {}",
            row_set.table_name,
            row_set.rows.len(),
            row_set.tenant_id
        );

        sqlx::query_as::<_, RowSet>(
            "SELECT id, tenant_id, file_name, table_name, headers, row_count, rows, created_at
             FROM row_sets WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(pool)
        .await
        .context("Failed to fetch stored row set")
    }

    pub async fn list_for_tenant(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<RowSet>> {
        sqlx::query_as::<_, RowSet>(
            "SELECT id, tenant_id, file_name, table_name, headers, row_count, rows, created_at
             FROM row_sets WHERE tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .context("Failed to list row sets")
    }

    pub async fn delete_by_file_name(
        pool: &SqlitePool,
        tenant_id: &str,
        file_name: &str,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM row_sets WHERE tenant_id = ? AND file_name = ?")
            .bind(tenant_id)
            .bind(file_name)
            .execute(pool)
            .await
            .context("Failed to delete row set")?;
        Ok(result.rows_affected() > 0)
    }
}

/// Queries over captured leads.
pub struct LeadQueries;

impl LeadQueries {
    pub async fn create(pool: &SqlitePool, lead: &NewLead) -> Result<Lead> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO leads (id, tenant_id, email, phone, message, source, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&lead.tenant_id)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.message)
        .bind(&lead.source)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to insert lead")?;

        sqlx::query_as::<_, Lead>(
            "SELECT id, tenant_id, email, phone, message, source, created_at
             FROM leads WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(pool)
        .await
        .context("Failed to fetch stored lead")
    }

    pub async fn list_for_tenant(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<Lead>> {
        sqlx::query_as::<_, Lead>(
            "SELECT id, tenant_id, email, phone, message, source, created_at
             FROM leads WHERE tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .context("Failed to list leads")
    }
}

/// Queries over the chat transcript log.
pub struct ChatLogQueries;

impl ChatLogQueries {
    pub async fn append(
        pool: &SqlitePool,
        tenant_id: &str,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_messages (id, tenant_id, session_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .context("Failed to append chat log entry")?;
        Ok(())
    }

    pub async fn session_history(
        pool: &SqlitePool,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Vec<ChatLogEntry>> {
        sqlx::query_as::<_, ChatLogEntry>(
            "SELECT id, tenant_id, session_id, role, content, created_at
             FROM chat_messages WHERE tenant_id = ? AND session_id = ? ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to load session history")
    }
}
