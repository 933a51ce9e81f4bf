// Mail merge: templates, data, formatting, rendering and packaging

pub mod context;
pub mod csv;
pub mod data;
pub mod docx;
pub mod expr;
pub mod format;
pub mod generate;
pub mod mapping;
pub mod package;
pub mod render;
pub mod template;
pub mod xlsx;

pub(crate) mod xml;

#[cfg(test)]
pub(crate) mod testutil;

pub use context::{Record, RenderContext, TableValues, build_context, calculate_totals};
pub use data::{CellValue, ColumnKind, ColumnProfile, DataTable};
pub use generate::{
    GeneratedDocument, MergeJob, create_safe_filename, generate_batch, generate_single,
    validate_before_generation,
};
pub use mapping::{FieldMap, FieldMapping, propose_mapping, unmatched_columns};
pub use render::{RenderOptions, render_document, render_preview};
pub use template::{Block, PlaceholderReport, Placeholders, Template, validate_placeholders};
