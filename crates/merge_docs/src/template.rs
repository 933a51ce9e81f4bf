use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

use merge_core::MergeError;

use crate::xml::{OutlineItem, XmlPart};

/// `{{ ... }}` placeholder.
pub(crate) static CURLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("valid regex"));
/// `[ ... ]` optional field.
pub(crate) static SQUARE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]").expect("valid regex"));

static MACRO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{%\s*macro\s+\w+").expect("valid regex"));
static SIMPLE_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex")
});
static COMPLEX_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[A-Za-z0-9_\s.\[\]()'"~|,:-]+$"#).expect("valid regex"));
static CONTROL_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(for|if|else|endif|endfor)\b").expect("valid regex"));
static NORMALIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_]+").expect("valid regex"));

const EXPRESSION_HINTS: &[&str] = &[
    "|", "~", "if ", "else", "default(", "trim", "join(", "reject(", "equalto",
];

/// One XML part of the template (body, header or footer).
#[derive(Debug, Clone)]
pub(crate) struct TemplatePart {
    pub name: String,
    pub xml: XmlPart,
}

/// A Word template loaded into memory.
#[derive(Debug, Clone)]
pub struct Template {
    bytes: Vec<u8>,
    pub(crate) parts: Vec<TemplatePart>,
}

/// Placeholder names found in a template, de-duplicated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Placeholders {
    pub curly: Vec<String>,
    pub square: Vec<String>,
}

/// Body outline for previews.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(String),
    Table(Vec<Vec<String>>),
}

/// Problems found by [`validate_placeholders`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaceholderReport {
    pub invalid: Vec<String>,
    pub control_in_print: Vec<String>,
    pub unclosed: Vec<String>,
}

impl PlaceholderReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty() && self.control_in_print.is_empty() && self.unclosed.is_empty()
    }

    /// User-facing messages, one per non-empty category.
    pub fn messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.invalid.is_empty() {
            out.push(format!(
                "Invalid variable names found:\n- {}\nUse only letters, digits, underscores and \
                 optional dot notation (e.g. `row.Name`).",
                self.invalid.join("\n- ")
            ));
        }
        if !self.control_in_print.is_empty() {
            out.push(format!(
                "Control structures (for/if) found inside `{{{{ ... }}}}`:\n- {}\nUse \
                 `{{% ... %}}` for for/if/else/endfor/endif instead.",
                self.control_in_print.join("\n- ")
            ));
        }
        if !self.unclosed.is_empty() {
            out.push(format!(
                "Possibly incomplete placeholders:\n- {}\nCheck that every tag is opened and closed.",
                self.unclosed.join("\n- ")
            ));
        }
        out
    }
}

impl Template {
    /// Load a template from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("Failed to load template: {}", path.display()))
    }

    /// Parse a `.docx` file held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice()))
            .map_err(|e| MergeError::InvalidTemplate(format!("not a .docx file ({e})")))?;

        let mut names: Vec<String> = archive
            .file_names()
            .filter(|n| is_text_part(n))
            .map(String::from)
            .collect();
        if !names.iter().any(|n| n == "word/document.xml") {
            return Err(MergeError::InvalidTemplate("word/document.xml is missing".into()).into());
        }
        // Body first, then headers and footers in name order.
        names.sort_by_key(|n| (n != "word/document.xml", n.clone()));

        let mut parts = Vec::with_capacity(names.len());
        for name in names {
            let mut xml = String::new();
            archive
                .by_name(&name)
                .with_context(|| format!("Failed to open {name}"))?
                .read_to_string(&mut xml)
                .with_context(|| format!("Failed to read {name}"))?;
            let xml = XmlPart::parse(&xml)
                .map_err(|e| MergeError::InvalidTemplate(format!("{name}: {e}")))?;
            parts.push(TemplatePart { name, xml });
        }

        debug!("Loaded template with {} parts", parts.len());
        Ok(Self { bytes, parts })
    }

    /// Raw template bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Names of the XML parts that carry text.
    pub fn part_names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.name.as_str()).collect()
    }

    /// Every paragraph's text across body, tables, headers and footers.
    pub fn paragraph_texts(&self) -> impl Iterator<Item = String> + '_ {
        self.parts.iter().flat_map(|p| p.xml.paragraph_texts())
    }

    /// Find `{{curly}}` and `[square]` fields.
    pub fn extract_placeholders(&self) -> Placeholders {
        let mut curly = Vec::new();
        let mut square = Vec::new();
        for text in self.paragraph_texts() {
            curly.extend(CURLY_RE.captures_iter(&text).map(|c| c[1].trim().to_string()));
            square.extend(SQUARE_RE.captures_iter(&text).map(|c| c[1].to_string()));
        }
        Placeholders {
            curly: dedup(curly),
            square: dedup(square),
        }
    }

    /// True when the template defines `{% macro ... %}` blocks.
    pub fn detect_macros(&self) -> bool {
        self.paragraph_texts().any(|t| MACRO_RE.is_match(&t))
    }

    /// Body blocks in document order.
    pub fn outline(&self) -> Vec<Block> {
        let Some(body) = self.parts.iter().find(|p| p.name == "word/document.xml") else {
            return Vec::new();
        };
        body.xml
            .outline
            .iter()
            .map(|item| match *item {
                OutlineItem::Paragraph(id) => Block::Paragraph(body.xml.paragraph_text(id)),
                OutlineItem::Table(id) => Block::Table(body.xml.table_cells(id)),
            })
            .collect()
    }
}

fn is_text_part(name: &str) -> bool {
    name == "word/document.xml"
        || ((name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml")
            && !name.contains("/_rels/"))
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|x| seen.insert(x.clone())).collect()
}

/// Lower-case and strip whitespace and underscores, for fuzzy name matching.
pub fn normalize(text: &str) -> String {
    NORMALIZE_RE
        .replace_all(&text.trim().to_lowercase(), "")
        .into_owned()
}

/// A plain (optionally dotted) variable name such as `Name` or `total.Amount`.
pub(crate) fn is_variable_name(name: &str) -> bool {
    SIMPLE_VAR_RE.is_match(name.trim())
}

/// Whether a placeholder is a usable variable or expression.
pub fn is_valid_expression(name: &str) -> bool {
    let name = name.trim();
    if is_variable_name(name) {
        return true;
    }

    if EXPRESSION_HINTS.iter().any(|hint| name.contains(hint)) {
        let parens = name.matches('(').count() as isize - name.matches(')').count() as isize;
        if parens != 0 {
            return false;
        }
        return name.matches('\'').count() % 2 == 0 && name.matches('"').count() % 2 == 0;
    }

    if name.starts_with('[') && name.ends_with(']') {
        return true;
    }

    name.contains('~') && COMPLEX_CHARS_RE.is_match(name)
}

/// Check placeholders for common authoring mistakes.
pub fn validate_placeholders(curly: &[String]) -> PlaceholderReport {
    let mut report = PlaceholderReport::default();
    for field in curly {
        if !is_valid_expression(field) {
            report.invalid.push(field.clone());
        }
        if CONTROL_WORD_RE.is_match(field) {
            report.control_in_print.push(field.clone());
        }
        let trimmed = field.trim();
        if trimmed.to_lowercase().starts_with("note:") || trimmed.ends_with("if") {
            report.unclosed.push(field.clone());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{docx_from_parts, docx_with_body, paragraph, split_paragraph};

    #[test]
    fn test_extract_curly_and_square() {
        let bytes = docx_with_body(&[
            paragraph("Dear {{ Name }}, your order [OrderRef] ships {{Date}}."),
            paragraph("Regards {{Name}} [OrderRef] [Extra]"),
        ]);
        let template = Template::from_bytes(bytes).unwrap();
        let found = template.extract_placeholders();
        assert_eq!(found.curly, vec!["Name", "Date"]);
        assert_eq!(found.square, vec!["OrderRef", "Extra"]);
    }

    #[test]
    fn test_extract_across_runs() {
        let bytes = docx_with_body(&[split_paragraph(&["Hello {", "{first", "_name}", "} !"])]);
        let template = Template::from_bytes(bytes).unwrap();
        assert_eq!(template.extract_placeholders().curly, vec!["first_name"]);
    }

    #[test]
    fn test_extract_from_headers_footers_and_tables() {
        let body = format!(
            "<w:tbl><w:tr><w:tc>{}</w:tc><w:tc><w:tbl><w:tr><w:tc>{}</w:tc></w:tr></w:tbl>{}</w:tc></w:tr></w:tbl>{}",
            paragraph("{{Cell}}"),
            paragraph("{{Nested}}"),
            paragraph(""),
            paragraph("{{Body}}")
        );
        let header = format!("<w:hdr xmlns:w=\"w\">{}</w:hdr>", paragraph("{{Head}}"));
        let footer = format!("<w:ftr xmlns:w=\"w\">{}</w:ftr>", paragraph("[Foot]"));
        let bytes = docx_from_parts(&body, &[("word/header1.xml", &header), ("word/footer1.xml", &footer)]);
        let template = Template::from_bytes(bytes).unwrap();

        let found = template.extract_placeholders();
        assert_eq!(found.curly, vec!["Cell", "Nested", "Body", "Head"]);
        assert_eq!(found.square, vec!["Foot"]);
        assert_eq!(
            template.part_names(),
            vec!["word/document.xml", "word/footer1.xml", "word/header1.xml"]
        );
    }

    #[test]
    fn test_placeholders_independent_of_surrounding_text() {
        let texts = [
            "{{a}}",
            "xx{{a}}yy",
            "{{a}}{{b}} and {{ a }}",
            "prefix {{b}} suffix {{a}}",
        ];
        for text in texts {
            let template = Template::from_bytes(docx_with_body(&[paragraph(text)])).unwrap();
            let found: HashSet<String> = template.extract_placeholders().curly.into_iter().collect();
            let expected: HashSet<String> = CURLY_RE
                .captures_iter(text)
                .map(|c| c[1].trim().to_string())
                .collect();
            assert_eq!(found, expected, "text: {text}");
        }
    }

    #[test]
    fn test_not_a_docx_is_invalid_template() {
        let err = Template::from_bytes(b"plain text".to_vec()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MergeError>(),
            Some(MergeError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_zip_without_document_is_invalid_template() {
        let bytes = crate::testutil::zip_entries(&[("other.xml", "<a/>")]);
        let err = Template::from_bytes(bytes).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_detect_macros() {
        let with = Template::from_bytes(docx_with_body(&[paragraph(
            "{% macro greet(name) %}Hi{% endmacro %}",
        )]))
        .unwrap();
        let without = Template::from_bytes(docx_with_body(&[paragraph("{% if x %}")])).unwrap();
        assert!(with.detect_macros());
        assert!(!without.detect_macros());
    }

    #[test]
    fn test_outline() {
        let body = format!(
            "{}<w:tbl><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
            paragraph("Intro"),
            paragraph("Name"),
            paragraph("{{Name}}")
        );
        let template = Template::from_bytes(docx_from_parts(&body, &[])).unwrap();
        assert_eq!(
            template.outline(),
            vec![
                Block::Paragraph("Intro".into()),
                Block::Table(vec![vec!["Name".into(), "{{Name}}".into()]])
            ]
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  First Name "), "firstname");
        assert_eq!(normalize("first_name"), "firstname");
        assert_eq!(normalize("FIRST__NAME\t"), "firstname");
    }

    #[test]
    fn test_is_valid_expression() {
        assert!(is_valid_expression("Name"));
        assert!(is_valid_expression(" row.Name "));
        assert!(is_valid_expression("name | default('x')"));
        assert!(is_valid_expression("first ~ ' ' ~ last"));
        assert!(is_valid_expression("['a', 'b']"));
        assert!(!is_valid_expression("Voornaam Klant"));
        assert!(!is_valid_expression("name | default('x'"));
        assert!(!is_valid_expression("name | default('x)"));
        assert!(!is_valid_expression("1abc"));
        assert!(!is_valid_expression(""));
    }

    #[test]
    fn test_validate_placeholders() {
        let fields: Vec<String> = ["Name", "for x in rows", "Note: check", "x if", "bad name"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = validate_placeholders(&fields);
        assert_eq!(
            report.invalid,
            vec!["for x in rows", "Note: check", "x if", "bad name"]
        );
        assert_eq!(report.control_in_print, vec!["for x in rows", "x if"]);
        assert_eq!(report.unclosed, vec!["Note: check", "x if"]);
        assert!(!report.is_clean());
        assert_eq!(report.messages().len(), 3);
    }

    #[test]
    fn test_clean_report() {
        let report = validate_placeholders(&["Name".to_string(), "row.City".to_string()]);
        assert!(report.is_clean());
        assert!(report.messages().is_empty());
    }
}
