use anyhow::Result;
use itertools::Itertools;
use serde_json::{Map, Value};
use tracing::debug;

/// Parsed CSV upload: normalized headers, one header→value map per data
/// line, and a derived identifier-safe table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularData {
    pub table_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl TabularData {
    #[inline]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Flatten every row into "header: value, header: value" text, one row
    /// per line. This feeds the vector index so tabular data is also
    /// semantically searchable alongside prose sources.
    #[inline]
    pub fn flattened_text(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .map(|h| {
                        let value = row
                            .get(h)
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        format!("{h}: {value}")
                    })
                    .join(", ")
            })
            .join("\n")
    }
}

/// Parse CSV text into a row set.
///
/// Requires a header row plus at least one data row; anything shorter is a
/// validation error surfaced to the caller before anything is persisted.
/// Values are zipped to headers positionally; missing trailing values become
/// null.
#[inline]
pub fn parse_csv(file_name: &str, csv_text: &str) -> Result<TabularData> {
    let mut lines = csv_text.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("CSV must have a header row and at least one data row"))?;

    let headers: Vec<String> = split_csv_line(header_line)
        .iter()
        .map(|h| normalize_header(h))
        .collect();

    if headers.iter().all(String::is_empty) {
        anyhow::bail!("CSV header row is empty");
    }

    let mut rows = Vec::new();
    for line in lines {
        let values = split_csv_line(line);
        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = values
                .get(i)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null);
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }

    if rows.is_empty() {
        anyhow::bail!("CSV must have a header row and at least one data row");
    }

    let table_name = sanitize_identifier(file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem));

    debug!(
        "Parsed CSV {} into table '{}' with {} columns, {} rows",
        file_name,
        table_name,
        headers.len(),
        rows.len()
    );

    Ok(TabularData {
        table_name,
        headers,
        rows,
    })
}

/// Split one CSV line, honoring double-quoted fields (including escaped
/// quotes doubled inside them).
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());

    fields
}

/// Normalize a raw header: trim, strip quoting, lowercase, and replace
/// anything outside `[a-z0-9_]` with underscores.
fn normalize_header(raw: &str) -> String {
    sanitize_identifier(raw.trim().trim_matches('"'))
}

fn sanitize_identifier(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_rows() {
        let data = parse_csv("customers.csv", "Name,Email\nAlice,a@x.com\nBob,b@x.com")
            .expect("should parse");

        assert_eq!(data.table_name, "customers");
        assert_eq!(data.headers, vec!["name", "email"]);
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.rows[0]["name"], Value::String("Alice".to_string()));
        assert_eq!(data.rows[1]["email"], Value::String("b@x.com".to_string()));
    }

    #[test]
    fn header_normalization_replaces_special_characters() {
        let data = parse_csv("t.csv", "\"First Name\",E-Mail Address,Price ($)\nAlice,a@x.com,10")
            .expect("should parse");

        assert_eq!(data.headers, vec!["first_name", "e_mail_address", "price____"]);
    }

    #[test]
    fn missing_trailing_values_become_null() {
        let data = parse_csv("t.csv", "a,b,c\n1,2").expect("should parse");

        assert_eq!(data.rows[0]["a"], Value::String("1".to_string()));
        assert_eq!(data.rows[0]["b"], Value::String("2".to_string()));
        assert_eq!(data.rows[0]["c"], Value::Null);
    }

    #[test]
    fn fewer_than_two_lines_is_a_validation_error() {
        assert!(parse_csv("t.csv", "").is_err());
        assert!(parse_csv("t.csv", "only,a,header").is_err());
        assert!(parse_csv("t.csv", "only,a,header\n\n  \n").is_err());
    }

    #[test]
    fn quoted_fields_keep_commas() {
        let data = parse_csv("t.csv", "name,address\nAlice,\"1 Main St, Springfield\"")
            .expect("should parse");

        assert_eq!(
            data.rows[0]["address"],
            Value::String("1 Main St, Springfield".to_string())
        );
    }

    #[test]
    fn escaped_quotes_are_unescaped() {
        let data = parse_csv("t.csv", "name\n\"Alice \"\"The Ace\"\"\"").expect("should parse");
        assert_eq!(
            data.rows[0]["name"],
            Value::String("Alice \"The Ace\"".to_string())
        );
    }

    #[test]
    fn flattened_text_renders_header_value_pairs() {
        let data = parse_csv("t.csv", "Name,Email\nAlice,a@x.com\nBob,b@x.com")
            .expect("should parse");

        let flattened = data.flattened_text();
        let lines: Vec<&str> = flattened.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "name: Alice, email: a@x.com");
        assert_eq!(lines[1], "name: Bob, email: b@x.com");
    }

    #[test]
    fn table_name_is_sanitized_from_file_stem() {
        let data = parse_csv("Q3 Sales-Report.csv", "a\n1").expect("should parse");
        assert_eq!(data.table_name, "q3_sales_report");
    }
}
