//! CSV directory implementation of the TableSink trait
//!
//! Each table is a `<dir>/<table>.csv` file. Writes go to a temporary file in
//! the same directory which is then renamed over the target, so readers
//! never observe a half-written table.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{validate_table_name, TableSink};
use crate::error::SinkError;
use crate::models::FieldValue;

/// Directory of CSV files, one per table
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    dir: PathBuf,
}

impl CsvDirectorySink {
    /// Create a sink rooted at `dir`, creating the directory when missing
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Name under which `table` is stored, folded for case-insensitive filesystems
    ///
    /// Two tables with the same canonical name share one file.
    pub fn canonical_name(table: &str) -> String {
        file_stem(table).to_lowercase()
    }

    /// Path of the file backing a table
    pub fn table_path(&self, table: &str) -> Result<PathBuf, SinkError> {
        validate_table_name(table)?;
        let name = file_stem(table);
        if name.trim_matches('.').is_empty() {
            return Err(SinkError::InvalidTable(table.to_string()));
        }
        Ok(self.dir.join(format!("{}.csv", name)))
    }

    async fn blocking<F, T>(f: F) -> Result<T, SinkError>
    where
        F: FnOnce() -> Result<T, SinkError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| SinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

/// Keep letters, digits, spaces, dots, dashes and underscores
fn file_stem(table: &str) -> String {
    table
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_atomic(
    dir: &Path,
    path: &Path,
    header: &[String],
    rows: &[Vec<FieldValue>],
) -> Result<(), SinkError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        if !header.is_empty() {
            writer.write_record(header)?;
            for row in rows {
                writer.write_record(row.iter().map(|v| v.to_string()))?;
            }
        }
        writer.flush()?;
    }
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| SinkError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl TableSink for CsvDirectorySink {
    async fn open_or_create(&self, table: &str) -> Result<(), SinkError> {
        let path = self.table_path(table)?;
        let dir = self.dir.clone();

        Self::blocking(move || {
            fs::create_dir_all(&dir)?;
            if !path.exists() {
                File::create(&path)?;
            }
            Ok(())
        })
        .await
    }

    async fn clear(&self, table: &str) -> Result<(), SinkError> {
        let path = self.table_path(table)?;

        Self::blocking(move || {
            let mut file = File::create(&path)?;
            file.flush()?;
            Ok(())
        })
        .await
    }

    async fn write_rows(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<(), SinkError> {
        let path = self.table_path(table)?;
        let dir = self.dir.clone();
        let header = header.to_vec();
        let rows = rows.to_vec();

        Self::blocking(move || write_atomic(&dir, &path, &header, &rows)).await
    }

    /// The atomic rename already replaces the file, so no separate clear
    async fn replace(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<(), SinkError> {
        let path = self.table_path(table)?;
        let dir = self.dir.clone();
        let header = header.to_vec();
        let rows = rows.to_vec();

        Self::blocking(move || {
            fs::create_dir_all(&dir)?;
            write_atomic(&dir, &path, &header, &rows)
        })
        .await
    }
}
