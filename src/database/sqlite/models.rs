use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, Type};

/// What kind of input a training source was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Website,
    File,
    Text,
    Csv,
}

impl SourceKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Website => "website",
            SourceKind::File => "file",
            SourceKind::Text => "text",
            SourceKind::Csv => "csv",
        }
    }
}

impl std::fmt::Display for SourceKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested unit: a URL, a file, a pasted text, or a CSV.
///
/// `chunk_count` doubles as a coarse completion signal: 0 while indexing,
/// positive once ingestion finished. Failed ingestions delete the row
/// outright so no zombie source ever lingers at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSource {
    pub id: String,
    pub tenant_id: String,
    pub kind: SourceKind,
    pub name: String,
    pub chunk_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TrainingSource {
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.chunk_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrainingSource {
    pub id: String,
    pub tenant_id: String,
    pub kind: SourceKind,
    pub name: String,
}

/// One CSV upload persisted as an opaque row set. Headers and rows are JSON
/// blobs; they are consulted by the structured-analysis path, never queried
/// as SQL.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RowSet {
    pub id: String,
    pub tenant_id: String,
    pub file_name: String,
    pub table_name: String,
    pub headers: String,
    pub row_count: i64,
    pub rows: String,
    pub created_at: NaiveDateTime,
}

impl RowSet {
    #[inline]
    pub fn headers(&self) -> Vec<String> {
        serde_json::from_str(&self.headers).unwrap_or_default()
    }

    #[inline]
    pub fn rows(&self) -> Vec<Map<String, Value>> {
        serde_json::from_str(&self.rows).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRowSet {
    pub tenant_id: String,
    pub file_name: String,
    pub table_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// Contact captured by the widget's lead form. Serialized camelCase like
/// the rest of the wire surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    pub tenant_id: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
}

/// One logged chat turn. Written fire-and-forget after a response streams.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChatLogEntry {
    pub id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn source_kind_round_trips_as_text() {
        assert_eq!(SourceKind::Website.as_str(), "website");
        assert_eq!(SourceKind::Csv.to_string(), "csv");
    }

    #[test]
    fn indexed_signal_is_chunk_count_positive() {
        let now = Utc::now().naive_utc();
        let source = TrainingSource {
            id: "s1".to_string(),
            tenant_id: "t1".to_string(),
            kind: SourceKind::Text,
            name: "Pasted text".to_string(),
            chunk_count: 0,
            created_at: now,
            updated_at: now,
        };
        assert!(!source.is_indexed());
        assert!(TrainingSource { chunk_count: 3, ..source }.is_indexed());
    }

    #[test]
    fn row_set_decodes_json_columns() {
        let row_set = RowSet {
            id: "r1".to_string(),
            tenant_id: "t1".to_string(),
            file_name: "x.csv".to_string(),
            table_name: "x".to_string(),
            headers: r#"["name","email"]"#.to_string(),
            row_count: 1,
            rows: r#"[{"name":"Alice","email":null}]"#.to_string(),
            created_at: Utc::now().naive_utc(),
        };

        assert_eq!(row_set.headers(), vec!["name", "email"]);
        let rows = row_set.rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0]["email"].is_null());
    }
}
