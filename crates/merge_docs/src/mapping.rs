use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

use merge_core::MergeError;

use crate::data::DataTable;
use crate::template::normalize;

/// A template field with its proposed or chosen column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMapping {
    pub field: String,
    pub column: Option<String>,
    /// First-row value of the column, for display next to the choice.
    pub sample: String,
}

/// Field name without an optional `row.` prefix.
pub fn strip_row_prefix(field: &str) -> &str {
    let trimmed = field.trim();
    trimmed.strip_prefix("row.").unwrap_or(trimmed)
}

/// Suggest a column for every template field by normalized name.
pub fn propose_mapping(fields: &[String], table: &DataTable) -> Vec<FieldMapping> {
    let by_norm: HashMap<String, &String> = table
        .headers
        .iter()
        .map(|h| (normalize(h), h))
        .collect();

    fields
        .iter()
        .map(|field| {
            let column = by_norm
                .get(&normalize(strip_row_prefix(field)))
                .map(|h| (*h).clone());
            let sample = column
                .as_deref()
                .and_then(|c| table.cell(0, c))
                .map(|v| v.to_string())
                .unwrap_or_default();
            FieldMapping {
                field: field.clone(),
                column,
                sample,
            }
        })
        .collect()
}

/// Data columns that no template field refers to.
pub fn unmatched_columns(fields: &[String], table: &DataTable) -> Vec<String> {
    let wanted: Vec<String> = fields
        .iter()
        .map(|f| normalize(strip_row_prefix(f)))
        .collect();
    table
        .headers
        .iter()
        .filter(|h| !wanted.contains(&normalize(h)))
        .cloned()
        .collect()
}

/// The confirmed field → column mapping used for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, Option<String>)>,
}

/// On-disk form: `{ "field": "column" }`, empty string for unmapped.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct FieldMapFile(BTreeMap<String, String>);

impl FieldMap {
    pub fn from_proposal(mappings: &[FieldMapping]) -> Self {
        Self {
            entries: mappings
                .iter()
                .map(|m| (m.field.clone(), m.column.clone()))
                .collect(),
        }
    }

    /// Map `field` to `column`, adding the field if unknown.
    pub fn set(&mut self, field: &str, column: Option<String>) {
        match self.entries.iter_mut().find(|(f, _)| f == field) {
            Some(entry) => entry.1 = column,
            None => self.entries.push((field.to_string(), column)),
        }
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .and_then(|(_, c)| c.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(f, c)| (f.as_str(), c.as_deref()))
    }

    pub fn unmapped(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, c)| c.is_none())
            .map(|(f, _)| f)
            .collect()
    }

    /// Apply a `field=column` override. An empty column unmaps the field.
    pub fn apply_override(&mut self, spec: &str, table: &DataTable) -> Result<()> {
        let (field, column) = spec.split_once('=').ok_or_else(|| {
            MergeError::Config(format!("mapping '{spec}' must look like field=column"))
        })?;
        let (field, column) = (field.trim(), column.trim());
        if column.is_empty() {
            self.set(field, None);
            return Ok(());
        }
        if table.column_index(column).is_none() {
            return Err(MergeError::Config(format!(
                "column '{column}' does not exist (available: {})",
                table.headers.join(", ")
            ))
            .into());
        }
        debug!("Mapping override {field} -> {column}");
        self.set(field, Some(column.to_string()));
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        let file = FieldMapFile(
            self.entries
                .iter()
                .map(|(f, c)| (f.clone(), c.clone().unwrap_or_default()))
                .collect(),
        );
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: FieldMapFile = serde_json::from_str(json)
            .map_err(|e| MergeError::Config(format!("invalid mapping file: {e}")))?;
        Ok(Self {
            entries: file
                .0
                .into_iter()
                .map(|(f, c)| (f, Some(c).filter(|c| !c.is_empty())))
                .collect(),
        })
    }

    /// Merge entries from a mapping file over this map.
    pub fn load_overrides(&mut self, path: &Path) -> Result<()> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mapping file: {}", path.display()))?;
        for (field, column) in Self::from_json(&json)?.entries {
            self.set(&field, column);
        }
        Ok(())
    }
}
