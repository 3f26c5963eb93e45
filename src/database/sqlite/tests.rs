use super::*;
use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_base_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

fn sample_source(tenant_id: &str, id: &str) -> NewTrainingSource {
    NewTrainingSource {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        kind: SourceKind::Website,
        name: "https://example.com".to_string(),
    }
}

fn sample_row_set(tenant_id: &str, file_name: &str, rows: usize) -> NewRowSet {
    let rows = (0..rows)
        .map(|i| {
            let mut row = Map::new();
            row.insert("name".to_string(), Value::String(format!("row {i}")));
            row
        })
        .collect();

    NewRowSet {
        tenant_id: tenant_id.to_string(),
        file_name: file_name.to_string(),
        table_name: "customers".to_string(),
        headers: vec!["name".to_string()],
        rows,
    }
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> =
        ["training_sources", "row_sets", "leads", "chat_messages"]
            .into_iter()
            .collect();

    let actual_tables: HashSet<&str> = tables
        .iter()
        .map(|t| t.as_str())
        .filter(|t| *t != "_sqlx_migrations")
        .collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_source_lifecycle() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let created = database.upsert_source(&sample_source("tenant-a", "src-1")).await?;
    assert_eq!(created.chunk_count, 0);
    assert!(!created.is_indexed());

    database.set_source_chunk_count("tenant-a", "src-1", 12).await?;
    let fetched = database
        .get_source("tenant-a", "src-1")
        .await?
        .expect("source should exist");
    assert_eq!(fetched.chunk_count, 12);
    assert!(fetched.is_indexed());

    assert!(database.delete_source("tenant-a", "src-1").await?);
    assert!(database.get_source("tenant-a", "src-1").await?.is_none());
    assert!(!database.delete_source("tenant-a", "src-1").await?);

    Ok(())
}

#[tokio::test]
async fn integration_upsert_resets_chunk_count_for_reingest() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    database.upsert_source(&sample_source("tenant-a", "src-1")).await?;
    database.set_source_chunk_count("tenant-a", "src-1", 7).await?;

    // Re-ingesting under the same id returns the source to the indexing state.
    let refreshed = database.upsert_source(&sample_source("tenant-a", "src-1")).await?;
    assert_eq!(refreshed.chunk_count, 0);

    let all = database.list_sources("tenant-a").await?;
    assert_eq!(all.len(), 1);

    Ok(())
}

#[tokio::test]
async fn integration_sources_are_scoped_to_tenant() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    database.upsert_source(&sample_source("tenant-a", "src-a")).await?;
    database.upsert_source(&sample_source("tenant-b", "src-b")).await?;

    assert_eq!(database.list_sources("tenant-a").await?.len(), 1);
    assert!(database.get_source("tenant-a", "src-b").await?.is_none());
    assert!(!database.delete_source("tenant-a", "src-b").await?);
    assert!(database.get_source("tenant-b", "src-b").await?.is_some());

    Ok(())
}

#[tokio::test]
async fn integration_find_source_by_name() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    database.upsert_source(&sample_source("tenant-a", "src-1")).await?;

    let found = database
        .find_source_by_name("tenant-a", SourceKind::Website, "https://example.com")
        .await?;
    assert_eq!(found.map(|s| s.id), Some("src-1".to_string()));

    let wrong_kind = database
        .find_source_by_name("tenant-a", SourceKind::File, "https://example.com")
        .await?;
    assert!(wrong_kind.is_none());

    Ok(())
}

#[tokio::test]
async fn integration_row_set_replace_overwrites_same_file() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    database
        .replace_row_set(&sample_row_set("tenant-a", "customers.csv", 2))
        .await?;
    let replaced = database
        .replace_row_set(&sample_row_set("tenant-a", "customers.csv", 3))
        .await?;

    assert_eq!(replaced.row_count, 3);

    let all = database.list_row_sets("tenant-a").await?;
    assert_eq!(all.len(), 1, "re-upload must overwrite, not accumulate");
    assert_eq!(all[0].row_count, 3);
    assert_eq!(all[0].rows().len(), 3);

    Ok(())
}

#[tokio::test]
async fn integration_row_sets_are_scoped_to_tenant() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    database
        .replace_row_set(&sample_row_set("tenant-a", "customers.csv", 2))
        .await?;
    database
        .replace_row_set(&sample_row_set("tenant-b", "customers.csv", 5))
        .await?;

    let tenant_a = database.list_row_sets("tenant-a").await?;
    assert_eq!(tenant_a.len(), 1);
    assert_eq!(tenant_a[0].row_count, 2);

    assert!(!database.delete_row_set_by_file_name("tenant-a", "other.csv").await?);
    assert!(database.delete_row_set_by_file_name("tenant-b", "customers.csv").await?);
    assert_eq!(database.list_row_sets("tenant-a").await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn integration_lead_capture() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let lead = database
        .create_lead(&NewLead {
            tenant_id: "tenant-a".to_string(),
            email: "alice@example.com".to_string(),
            phone: Some("555-0100".to_string()),
            message: None,
            source: Some("widget".to_string()),
        })
        .await?;

    assert_eq!(lead.email, "alice@example.com");
    assert!(lead.message.is_none());

    let leads = database.list_leads("tenant-a").await?;
    assert_eq!(leads.len(), 1);
    assert!(database.list_leads("tenant-b").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn integration_chat_log_round_trip() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    database
        .log_chat_message("tenant-a", "session-1", "user", "What are your hours?")
        .await?;
    database
        .log_chat_message("tenant-a", "session-1", "assistant", "We are open 9 to 5.")
        .await?;
    database
        .log_chat_message("tenant-a", "session-2", "user", "unrelated")
        .await?;

    let history = database.session_history("tenant-a", "session-1").await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[1].role, "assistant");

    assert!(database.session_history("tenant-b", "session-1").await?.is_empty());

    Ok(())
}
