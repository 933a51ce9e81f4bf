use anyhow::{Context, Result};

use crate::mapping::FieldMapping;

/// Generate a CSV string from headers and rows.
///
/// Each field is properly quoted/escaped by the `csv` crate.
pub fn generate_csv(headers: &[&str], rows: &[Vec<String>]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());

    writer
        .write_record(headers)
        .context("Failed to write header record")?;

    for row in rows {
        writer
            .write_record(row)
            .context("Failed to write data record")?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;

    String::from_utf8(bytes).context("CSV output contained invalid UTF-8")
}

/// The mapping report: one line per template field with its column and
/// the first-row sample.
pub fn write_mapping_csv(mappings: &[FieldMapping]) -> Result<String> {
    let rows: Vec<Vec<String>> = mappings
        .iter()
        .map(|m| {
            vec![
                m.field.clone(),
                m.column.clone().unwrap_or_default(),
                m.sample.clone(),
            ]
        })
        .collect();
    generate_csv(&["Template field", "Column", "Example"], &rows)
}

/// Parse delimited text into headers and rows.
///
/// The first record is the header row. Records may be shorter or longer
/// than the header.
pub fn parse_delimited(input: &str, delimiter: u8) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(input.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV record {}", i + 1))?;
        rows.push(record.iter().map(String::from).collect());
    }

    Ok((headers, rows))
}
