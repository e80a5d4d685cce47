//! Form-related domain models
//!
//! This module defines the configured form types, the sheet groups they are
//! organised in, and the catalog used to resolve a trigger's group selector.

use serde::{Deserialize, Serialize};

/// One form type and the table it is replicated into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormSpec {
    /// Identifier of the form type at the source (an xmlns)
    pub source_id: String,

    /// Destination table (sheet tab) name
    pub destination_table: String,
}

impl FormSpec {
    /// Create a new form spec
    pub fn new(source_id: impl Into<String>, destination_table: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            destination_table: destination_table.into(),
        }
    }
}

/// Named group of forms, selectable with `?sheet=<name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetGroup {
    /// Group name
    pub name: String,

    /// Forms synced for this group, in order
    #[serde(default)]
    pub forms: Vec<FormSpec>,
}

/// Unknown group selector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown sheet group: {0}")]
pub struct UnknownGroup(pub String);

/// All configured groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormCatalog {
    groups: Vec<SheetGroup>,
}

impl FormCatalog {
    /// Create a catalog from configured groups
    pub fn new(groups: Vec<SheetGroup>) -> Self {
        Self { groups }
    }

    /// Configured groups
    pub fn groups(&self) -> &[SheetGroup] {
        &self.groups
    }

    /// Resolve the forms to sync
    ///
    /// `None` selects every group in configuration order. Forms listed twice
    /// with the same source id but different tables are kept as configured.
    pub fn select(&self, group: Option<&str>) -> Result<Vec<FormSpec>, UnknownGroup> {
        match group {
            None => Ok(self
                .groups
                .iter()
                .flat_map(|g| g.forms.iter().cloned())
                .collect()),
            Some(name) => self
                .groups
                .iter()
                .find(|g| g.name == name)
                .map(|g| g.forms.clone())
                .ok_or_else(|| UnknownGroup(name.to_string())),
        }
    }

    /// Total number of configured forms
    pub fn form_count(&self) -> usize {
        self.groups.iter().map(|g| g.forms.len()).sum()
    }
}
