//! Domain models for formsync
//!
//! This module contains the core domain models used throughout the pipeline.

pub mod form;
pub mod record;
pub mod report;

// Re-export commonly used types
pub use form::{FormCatalog, FormSpec, SheetGroup, UnknownGroup};
pub use record::{Dataset, FieldValue, Page, Record, SourceObject};
pub use report::{RunOutcome, SyncReport, SyncResult, SyncStatus};
