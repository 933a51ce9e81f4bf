use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::generate::GeneratedDocument;

/// `"{prefix}_documents_{YYYYmmdd_HHMM}.zip"`.
pub fn archive_name(prefix: &str, now: NaiveDateTime) -> String {
    format!("{prefix}_documents_{}.zip", now.format("%Y%m%d_%H%M"))
}

/// Write every document into `dir`, creating it if needed.
pub fn write_to_dir(docs: &[GeneratedDocument], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let mut written = Vec::with_capacity(docs.len());
    for doc in docs {
        let path = dir.join(&doc.file_name);
        std::fs::write(&path, &doc.bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }

    info!("Wrote {} documents to {}", written.len(), dir.display());
    Ok(written)
}

/// Bundle all documents into one deflated ZIP archive.
pub fn package_zip(docs: &[GeneratedDocument]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(6));

    for doc in docs {
        zip.start_file(doc.file_name.as_str(), options)
            .with_context(|| format!("Failed to add {} to archive", doc.file_name))?;
        zip.write_all(&doc.bytes)
            .with_context(|| format!("Failed to write {} to archive", doc.file_name))?;
    }

    let cursor = zip.finish().context("Failed to finalize ZIP archive")?;
    Ok(cursor.into_inner())
}
