use anyhow::{Context, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use merge_core::{Language, MergeError};

use crate::context::{RenderContext, TableValues, build_context};
use crate::data::DataTable;
use crate::mapping::FieldMap;
use crate::render::{RenderOptions, render_document};
use crate::template::{Template, validate_placeholders};

static UNSAFE_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("valid regex"));

/// Longest value used in a file name, in characters.
const MAX_NAME_VALUE: usize = 80;

/// Everything needed to merge a table into a template.
#[derive(Debug, Clone)]
pub struct MergeJob<'a> {
    pub template: &'a Template,
    pub data: &'a DataTable,
    pub mapping: &'a FieldMap,
    /// Square-bracket fields to fill in.
    pub square_fields: Vec<String>,
    pub language: Language,
    pub prefix: String,
    /// Column whose value names each file.
    pub primary_column: Option<String>,
    /// Used when the primary value is empty.
    pub secondary_column: Option<String>,
    pub strict: bool,
    pub clean_empty: bool,
    /// Date stamped into every file name.
    pub date: NaiveDate,
}

/// One merged document.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Zero-based data row.
    pub row: usize,
}

/// `"{prefix} {value} {date}.docx"` with characters that are unsafe in
/// file names replaced and underscores shown as spaces.
pub fn create_safe_filename(prefix: &str, primary: &str, secondary: &str, date: NaiveDate) -> String {
    let value = if primary.trim().is_empty() { secondary } else { primary };
    let safe = UNSAFE_CHARS_RE.replace_all(value, "_");
    let safe: String = safe.trim().chars().take(MAX_NAME_VALUE).collect();
    let safe = safe.trim();

    let date = date.format("%Y-%m-%d");
    let name = if safe.is_empty() {
        format!("{prefix} {date}.docx")
    } else {
        format!("{prefix} {safe} {date}.docx")
    };
    name.replace('_', " ")
}

/// Append ` (2)`, ` (3)`, ... until `name` is not in `taken`.
fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let stem = name.strip_suffix(".docx").unwrap_or(&name);
    let mut n = 2;
    loop {
        let candidate = format!("{stem} ({n}).docx");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn name_value(data: &DataTable, row: usize, column: Option<&str>) -> String {
    column
        .and_then(|c| data.cell(row, c))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_default()
}

fn check_column(data: &DataTable, column: Option<&str>) -> Result<(), MergeError> {
    match column {
        Some(c) if data.column_index(c).is_none() => Err(MergeError::Config(format!(
            "file name column '{c}' does not exist (available: {})",
            data.headers.join(", ")
        ))),
        _ => Ok(()),
    }
}

/// Merge every data row into its own document.
pub fn generate_batch(job: &MergeJob<'_>) -> Result<Vec<GeneratedDocument>> {
    check_column(job.data, job.primary_column.as_deref())?;
    check_column(job.data, job.secondary_column.as_deref())?;
    if job.data.is_empty() {
        warn!("Data file has no rows, nothing to generate");
        return Ok(Vec::new());
    }

    let values = TableValues::new(job.data, job.language);
    let options = RenderOptions {
        square_fields: job.square_fields.clone(),
        clean_empty: job.clean_empty,
    };
    let mut taken = HashSet::new();
    let mut documents = Vec::with_capacity(job.data.rows.len());

    for row in 0..job.data.rows.len() {
        let ctx = build_context(
            job.data,
            row,
            job.mapping,
            &job.square_fields,
            &values,
            job.language,
            job.strict,
        )
        .with_context(|| format!("Row {}", row + 1))?;
        let bytes = render_document(job.template, &ctx, &options)
            .with_context(|| format!("Row {}", row + 1))?;

        let primary = name_value(job.data, row, job.primary_column.as_deref());
        let secondary = name_value(job.data, row, job.secondary_column.as_deref());
        let file_name = unique_name(
            create_safe_filename(&job.prefix, &primary, &secondary, job.date),
            &mut taken,
        );
        debug!("Row {} -> {file_name}", row + 1);

        documents.push(GeneratedDocument {
            file_name,
            bytes,
            row,
        });
    }

    info!("Generated {} documents", documents.len());
    Ok(documents)
}

/// Render one document from literal form values (`field` → text).
pub fn generate_single<'a>(
    template: &Template,
    form: impl IntoIterator<Item = (&'a str, &'a str)>,
    clean_empty: bool,
) -> Result<Vec<u8>> {
    let ctx = RenderContext::from_form(form);
    let square_fields = template
        .extract_placeholders()
        .square
        .into_iter()
        .filter(|name| ctx.get(name).is_some())
        .collect();
    render_document(
        template,
        &ctx,
        &RenderOptions {
            square_fields,
            clean_empty,
        },
    )
}

/// User-facing problems that would break generation. Empty when the
/// template is fine.
pub fn validate_before_generation(template: &Template) -> Vec<String> {
    let placeholders = template.extract_placeholders();
    let mut messages = validate_placeholders(&placeholders.curly).messages();
    if template.detect_macros() {
        messages.push(
            "The template defines {% macro %} blocks. Macros are not executed and will be \
             removed from the output."
                .to_string(),
        );
    }
    messages
}
