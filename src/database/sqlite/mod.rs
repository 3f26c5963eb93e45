use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    ChatLogEntry, Lead, NewLead, NewRowSet, NewTrainingSource, RowSet, SourceKind, TrainingSource,
};
use crate::database::sqlite::queries::{
    ChatLogQueries, LeadQueries, RowSetQueries, SourceQueries,
};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// SQLite-backed metadata store: training source catalog, CSV row sets,
/// leads, and chat transcripts. Vector data lives in LanceDB, not here.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_base_dir(base_dir: &Path) -> Result<Self> {
        let db_path = base_dir.join("metadata.db");
        let db_url = db_path.to_string_lossy();

        std::fs::create_dir_all(base_dir).with_context(|| {
            format!("Failed to create data directory: {}", base_dir.display())
        })?;

        Self::new(db_url.as_ref()).await
    }

    // Training source operations
    pub async fn upsert_source(&self, source: &NewTrainingSource) -> Result<TrainingSource> {
        SourceQueries::upsert(&self.pool, source).await
    }

    pub async fn get_source(
        &self,
        tenant_id: &str,
        source_id: &str,
    ) -> Result<Option<TrainingSource>> {
        SourceQueries::get(&self.pool, tenant_id, source_id).await
    }

    pub async fn find_source_by_name(
        &self,
        tenant_id: &str,
        kind: SourceKind,
        name: &str,
    ) -> Result<Option<TrainingSource>> {
        SourceQueries::find_by_name(&self.pool, tenant_id, kind, name).await
    }

    pub async fn list_sources(&self, tenant_id: &str) -> Result<Vec<TrainingSource>> {
        SourceQueries::list_for_tenant(&self.pool, tenant_id).await
    }

    pub async fn set_source_chunk_count(
        &self,
        tenant_id: &str,
        source_id: &str,
        chunk_count: i64,
    ) -> Result<()> {
        SourceQueries::set_chunk_count(&self.pool, tenant_id, source_id, chunk_count).await
    }

    pub async fn delete_source(&self, tenant_id: &str, source_id: &str) -> Result<bool> {
        SourceQueries::delete(&self.pool, tenant_id, source_id).await
    }

    // Row set operations
    pub async fn replace_row_set(&self, row_set: &NewRowSet) -> Result<RowSet> {
        RowSetQueries::replace(&self.pool, row_set).await
    }

    pub async fn list_row_sets(&self, tenant_id: &str) -> Result<Vec<RowSet>> {
        RowSetQueries::list_for_tenant(&self.pool, tenant_id).await
    }

    pub async fn delete_row_set_by_file_name(
        &self,
        tenant_id: &str,
        file_name: &str,
    ) -> Result<bool> {
        RowSetQueries::delete_by_file_name(&self.pool, tenant_id, file_name).await
    }

    // Lead operations
    pub async fn create_lead(&self, lead: &NewLead) -> Result<Lead> {
        LeadQueries::create(&self.pool, lead).await
    }

    pub async fn list_leads(&self, tenant_id: &str) -> Result<Vec<Lead>> {
        LeadQueries::list_for_tenant(&self.pool, tenant_id).await
    }

    // Chat log operations
    pub async fn log_chat_message(
        &self,
        tenant_id: &str,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        ChatLogQueries::append(&self.pool, tenant_id, session_id, role, content).await
    }

    pub async fn session_history(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Vec<ChatLogEntry>> {
        ChatLogQueries::session_history(&self.pool, tenant_id, session_id).await
    }
}
