//! Fixture builders for hand-written WordprocessingML.

use rust_xlsxwriter::Workbook;
use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// A paragraph with a single run.
pub fn paragraph(text: &str) -> String {
    split_paragraph(&[text])
}

/// A paragraph with one run per piece, the way Word splits edited text.
pub fn split_paragraph(pieces: &[&str]) -> String {
    let runs: String = pieces
        .iter()
        .map(|p| format!(r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r>"#, escape(p)))
        .collect();
    format!("<w:p>{runs}</w:p>")
}

/// A table with one paragraph per cell.
pub fn table(rows: &[&[&str]]) -> String {
    let rows: String = rows
        .iter()
        .map(|cells| {
            let cells: String = cells
                .iter()
                .map(|c| format!("<w:tc>{}</w:tc>", paragraph(c)))
                .collect();
            format!("<w:tr>{cells}</w:tr>")
        })
        .collect();
    format!("<w:tbl>{rows}</w:tbl>")
}

pub fn document_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
    )
}

pub fn zip_entries(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A docx whose body is the given raw XML, plus extra parts.
pub fn docx_from_parts(body: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let document = document_xml(body);
    let mut entries = vec![
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("word/document.xml", document.as_str()),
    ];
    entries.extend_from_slice(extra);
    zip_entries(&entries)
}

pub fn docx_with_body(blocks: &[String]) -> Vec<u8> {
    docx_from_parts(&blocks.concat(), &[])
}

/// Concatenated paragraph texts of every part of a rendered document.
pub fn texts_of(bytes: &[u8]) -> Vec<String> {
    crate::Template::from_bytes(bytes.to_vec())
        .unwrap()
        .paragraph_texts()
        .collect()
}

/// Workbook with one sheet. Numeric text becomes a number cell and
/// `true`/`false` a boolean cell.
pub fn workbook(headers: &[&str], rows: &[&[&str]]) -> Vec<u8> {
    let mut book = Workbook::new();
    let sheet = book.add_worksheet();
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        let r = r as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            if cell.is_empty() {
                continue;
            }
            match (*cell, cell.parse::<f64>()) {
                (_, Ok(n)) => sheet.write_number(r, col, n).unwrap(),
                ("true", _) => sheet.write_boolean(r, col, true).unwrap(),
                ("false", _) => sheet.write_boolean(r, col, false).unwrap(),
                (text, _) => sheet.write_string(r, col, text).unwrap(),
            };
        }
    }
    book.save_to_buffer().unwrap()
}
