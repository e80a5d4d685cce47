//! SQLite implementation of the TableSink trait
//!
//! This module provides a SQLite-based sink using rusqlite and
//! tokio-rusqlite for async operations. Each destination table is stored
//! with untyped columns named after the dataset header.

use std::collections::HashSet;

use async_trait::async_trait;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use tokio_rusqlite::Connection;

use super::{validate_table_name, TableSink};
use crate::error::SinkError;
use crate::models::FieldValue;

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Float(x) if x.is_finite() => ToSqlOutput::Owned(Value::Real(*x)),
            FieldValue::Float(_) => ToSqlOutput::Owned(Value::Null),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_sql_ref(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(i) => FieldValue::Integer(i),
        ValueRef::Real(x) => FieldValue::Float(x),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            FieldValue::Text(String::from_utf8_lossy(t).into_owned())
        }
    }
}

/// Quote an identifier for SQLite
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite table sink
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// SQLite compares identifiers without regard to ASCII case
    pub fn canonical_name(table: &str) -> String {
        table.to_ascii_lowercase()
    }

    /// Open a SQLite sink
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, SinkError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && path != ":memory:" {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).await?;
        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, SinkError> {
        Self::new(":memory:").await
    }

    /// Read a table back as header and rows, in insertion order
    pub async fn read_table(
        &self,
        table: &str,
    ) -> Result<(Vec<String>, Vec<Vec<FieldValue>>), SinkError> {
        validate_table_name(table)?;
        let sql = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table));

        let result = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let header: Vec<String> =
                    stmt.column_names().into_iter().map(String::from).collect();
                let width = header.len();

                let rows = stmt
                    .query_map([], |row| {
                        (0..width)
                            .map(|i| row.get_ref(i).map(from_sql_ref))
                            .collect::<Result<Vec<_>, _>>()
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok((header, rows))
            })
            .await?;

        Ok(result)
    }

    /// Whether a table exists
    pub async fn table_exists(&self, table: &str) -> Result<bool, SinkError> {
        let table = table.to_string();

        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&table],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;

        Ok(exists)
    }
}

fn create_table_sql(table: &str, header: &[String]) -> String {
    let columns: Vec<String> = header.iter().map(|c| quote_ident(c)).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        columns.join(", ")
    )
}

fn insert_sql(table: &str, header: &[String]) -> String {
    let columns: Vec<String> = header.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=header.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Column names that stay distinct under SQLite's case-insensitive matching
///
/// A later name that collides with an earlier one gets the first free `_N` suffix.
fn unique_columns(header: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(header.len());
    for name in header {
        let mut candidate = name.clone();
        let mut n = 2;
        while !seen.insert(candidate.to_ascii_lowercase()) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        columns.push(candidate);
    }
    columns
}

fn write_table(
    tx: &rusqlite::Transaction<'_>,
    table: &str,
    header: &[String],
    rows: &[Vec<FieldValue>],
) -> rusqlite::Result<()> {
    let header = unique_columns(header);
    tx.execute(&create_table_sql(table, &header), [])?;

    let mut stmt = tx.prepare(&insert_sql(table, &header))?;
    for row in rows {
        stmt.execute(rusqlite::params_from_iter(row.iter()))?;
    }

    Ok(())
}

fn ensure_columns(table: &str, header: &[String]) -> Result<(), SinkError> {
    if header.is_empty() {
        return Err(SinkError::InvalidTable(format!("{}: no columns", table)));
    }
    Ok(())
}

#[async_trait]
impl TableSink for SqliteSink {
    async fn open_or_create(&self, table: &str) -> Result<(), SinkError> {
        validate_table_name(table)?;

        // Columns come with the header, so only the database is checked here
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn clear(&self, table: &str) -> Result<(), SinkError> {
        validate_table_name(table)?;
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));

        self.conn
            .call(move |conn| {
                conn.execute(&sql, [])?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn write_rows(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<(), SinkError> {
        validate_table_name(table)?;
        ensure_columns(table, header)?;
        let table = table.to_string();
        let header = header.to_vec();
        let rows = rows.to_vec();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                write_table(&tx, &table, &header, &rows)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Drop, recreate and fill the table in a single transaction
    async fn replace(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<(), SinkError> {
        validate_table_name(table)?;
        ensure_columns(table, header)?;
        let table = table.to_string();
        let header = header.to_vec();
        let rows = rows.to_vec();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table)), [])?;
                write_table(&tx, &table, &header, &rows)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}
