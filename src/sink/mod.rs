//! Tabular destinations
//!
//! This module defines the [`TableSink`] trait and its SQLite and CSV
//! implementations. A sink holds one table per form.

pub mod csv;
pub mod sqlite;

pub use self::csv::CsvDirectorySink;
pub use self::sqlite::SqliteSink;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{SinkConfig, SinkKind};
use crate::error::SinkError;
use crate::models::FieldValue;

/// Tabular destination with replace semantics
///
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Make the table addressable, creating it when missing
    async fn open_or_create(&self, table: &str) -> Result<(), SinkError>;

    /// Remove the prior contents of a table, header included
    async fn clear(&self, table: &str) -> Result<(), SinkError>;

    /// Write a header and rows into a cleared table
    async fn write_rows(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<(), SinkError>;

    /// Replace a table's contents with the given header and rows
    ///
    /// Implementations may override this to make the swap atomic.
    async fn replace(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<(), SinkError> {
        self.open_or_create(table).await?;
        self.clear(table).await?;
        self.write_rows(table, header, rows).await
    }
}

/// Name a sink of `kind` actually stores `table` under
///
/// Distinct destination tables with equal canonical names overwrite each other.
pub fn canonical_table_name(kind: SinkKind, table: &str) -> String {
    match kind {
        SinkKind::Sqlite => SqliteSink::canonical_name(table),
        SinkKind::Csv => CsvDirectorySink::canonical_name(table),
    }
}

/// Open the sink selected by configuration
pub async fn open_sink(config: &SinkConfig) -> Result<Arc<dyn TableSink>, SinkError> {
    match config.kind {
        SinkKind::Sqlite => Ok(Arc::new(SqliteSink::new(&config.path).await?)),
        SinkKind::Csv => Ok(Arc::new(CsvDirectorySink::new(&config.path)?)),
    }
}

/// Reject table names no sink can address
pub(crate) fn validate_table_name(table: &str) -> Result<(), SinkError> {
    if table.trim().is_empty() || table.contains('\0') {
        return Err(SinkError::InvalidTable(table.to_string()));
    }
    Ok(())
}
