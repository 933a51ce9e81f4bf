use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, FormatAlign, Workbook};

/// Column width of the blank data file, in Excel characters.
const BLANK_COLUMN_WIDTH: f64 = 20.0;

/// An empty workbook with the template fields as header row, ready to be
/// filled in.
///
/// Headers are bold, every column is 20 characters wide and aligned
/// left/top, and the cursor starts on A2.
pub fn generate_empty_data_file(fields: &[String]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    let cell_format = Format::new()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::Top);
    let header_format = cell_format.clone().set_bold();

    for (col, field) in fields.iter().enumerate() {
        let col = col as u16;
        worksheet
            .set_column_width(col, BLANK_COLUMN_WIDTH)
            .with_context(|| format!("Failed to size column {col}"))?;
        worksheet
            .set_column_format(col, &cell_format)
            .with_context(|| format!("Failed to format column {col}"))?;
        worksheet
            .write_string_with_format(0, col, field.as_str(), &header_format)
            .with_context(|| format!("Failed to write header '{field}'"))?;
    }
    worksheet
        .set_selection(1, 0, 1, 0)
        .context("Failed to set selection")?;

    workbook
        .save_to_buffer()
        .context("Failed to save workbook to buffer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataTable;

    #[test]
    fn test_empty_data_file_has_header_only() {
        let fields = vec!["Name".to_string(), "row.Amount".to_string(), "Datum".to_string()];
        let bytes = generate_empty_data_file(&fields).unwrap();
        assert_eq!(&bytes[0..2], b"PK");

        let table = DataTable::from_spreadsheet_bytes(bytes).unwrap();
        assert_eq!(table.headers, fields);
        assert!(table.is_empty());
    }
}
