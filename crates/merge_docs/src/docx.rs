use anyhow::Result;
use docx_rs::*;
use std::io::Cursor;

/// Turn a column header into a usable placeholder name.
pub fn placeholder_name(header: &str) -> String {
    let mut name: String = header
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// A starter template with one `Header: {{Header}}` line per data column.
///
/// The title is rendered as a bold heading followed by an empty line.
pub fn generate_starter_template(title: &str, headers: &[String]) -> Result<Vec<u8>> {
    let mut docx = Docx::new();

    let title_run = Run::new().add_text(title).bold().size(36); // 18pt
    docx = docx.add_paragraph(Paragraph::new().add_run(title_run));
    docx = docx.add_paragraph(Paragraph::new());

    for header in headers {
        let label = Run::new().add_text(format!("{}: ", header.trim())).bold().size(22);
        let field = Run::new()
            .add_text(format!("{{{{{}}}}}", placeholder_name(header)))
            .size(22);
        docx = docx.add_paragraph(Paragraph::new().add_run(label).add_run(field));
    }

    let mut buf = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buf)
        .map_err(|e| anyhow::anyhow!("Failed to pack DOCX: {}", e))?;

    Ok(buf.into_inner())
}
