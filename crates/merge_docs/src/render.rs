//! Placeholder substitution inside a `.docx` package.
//!
//! Word freely splits typed text over several runs, so a placeholder such as
//! `{{Name}}` may arrive as `{{`, `Na`, `me}}`. Substitution works on the
//! concatenated text of a paragraph and then maps every replacement back
//! onto the text node where the token started, trimming the covered text
//! out of the following nodes. Run properties and all other markup are
//! written back untouched.
//!
//! Table rows holding `{%tr for var in list %}` and `{%tr endfor %}` frame a
//! row loop: the rows between them are written once per record of `list`
//! (for example `rows_all`) and the two marker rows are dropped.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use merge_core::MergeError;

use crate::context::RenderContext;
use crate::template::{Block, SQUARE_RE, Template};
use crate::xml::{PartEdits, RowRepeat, XmlPart};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}|\{%(.*?)%\}|\{#(.*?)#\}").expect("valid regex"));
static ROW_FOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%-?\s*tr\s+for\s+([A-Za-z_][A-Za-z0-9_]*)\s+in\s+([A-Za-z_][A-Za-z0-9_]*)\s*-?%\}")
        .expect("valid regex")
});
static ROW_ENDFOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{%-?\s*tr\s+endfor\s*-?%\}").expect("valid regex"));

const BODY_PART: &str = "word/document.xml";

/// Options for [`render_document`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Square-bracket fields to substitute. Other `[...]` text is left alone.
    pub square_fields: Vec<String>,
    /// Drop paragraphs and table rows that substitution left empty.
    pub clean_empty: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            square_fields: Vec::new(),
            clean_empty: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Print(String),
    /// `{% ... %}` or `{# ... #}`. Rendered as nothing.
    Control,
    Square(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    start: usize,
    end: usize,
    kind: TokenKind,
}

/// Tokens in `text`, sorted and non-overlapping.
fn find_tokens(text: &str, square: &HashSet<&str>) -> Vec<Token> {
    let mut tokens: Vec<Token> = TAG_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = match caps.get(1) {
                Some(expr) => TokenKind::Print(expr.as_str().to_string()),
                None => TokenKind::Control,
            };
            Some(Token {
                start: whole.start(),
                end: whole.end(),
                kind,
            })
        })
        .collect();

    if !square.is_empty() {
        for caps in SQUARE_RE.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !square.contains(name.as_str()) {
                continue;
            }
            let overlaps = tokens
                .iter()
                .any(|t| whole.start() < t.end && t.start < whole.end());
            if !overlaps {
                tokens.push(Token {
                    start: whole.start(),
                    end: whole.end(),
                    kind: TokenKind::Square(name.as_str().to_string()),
                });
            }
        }
        tokens.sort_by_key(|t| t.start);
    }
    tokens
}

fn resolve(token: &Token, ctx: &RenderContext) -> Result<String, MergeError> {
    match &token.kind {
        TokenKind::Print(expr) => ctx.evaluate(expr),
        TokenKind::Control => Ok(String::new()),
        TokenKind::Square(name) => Ok(ctx.get(name).unwrap_or_default().to_string()),
    }
}

/// Spread replacements over the original node texts.
///
/// Each replacement lands in the node where its token starts; text covered
/// by a token is removed from every node it spans.
fn distribute(node_texts: &[&str], replacements: &[(usize, usize, String)]) -> Vec<String> {
    let concat = node_texts.concat();
    let mut out = Vec::with_capacity(node_texts.len());
    let mut a = 0;

    for text in node_texts {
        let b = a + text.len();
        let mut node = String::new();
        let mut pos = a;
        for (start, end, replacement) in replacements {
            if *end <= pos {
                continue;
            }
            if *start >= b {
                break;
            }
            if *start >= pos {
                node.push_str(&concat[pos..*start]);
            }
            if *start >= a {
                node.push_str(replacement);
            }
            pos = *end;
        }
        if pos < b {
            node.push_str(&concat[pos..b]);
        }
        out.push(node);
        a = b;
    }
    out
}

/// Substitute every token in `text`, returning the rendered string.
fn render_text(text: &str, ctx: &RenderContext, square: &HashSet<&str>) -> Result<String, MergeError> {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for token in find_tokens(text, square) {
        out.push_str(&text[pos..token.start]);
        out.push_str(&resolve(&token, ctx)?);
        pos = token.end;
    }
    out.push_str(&text[pos..]);
    Ok(out)
}

/// A `{%tr for var in list %}` ... `{%tr endfor %}` pair of rows in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RowLoop {
    open: usize,
    close: usize,
    /// Rows between the markers.
    body: Vec<usize>,
    var: String,
    list: String,
}

impl RowLoop {
    fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        [self.open, self.close].into_iter().chain(self.body.iter().copied())
    }
}

fn row_text(part: &XmlPart, row: usize) -> String {
    part.rows[row]
        .cells
        .iter()
        .flatten()
        .map(|&p| part.paragraph_text(p))
        .collect()
}

/// Row loops of every table, in document order. An opening row without a
/// closing row is a template error.
fn find_row_loops(part: &XmlPart) -> Result<Vec<RowLoop>, MergeError> {
    let mut loops = Vec::new();
    for table in &part.tables {
        let mut i = 0;
        while i < table.rows.len() {
            let text = row_text(part, table.rows[i]);
            let Some(caps) = ROW_FOR_RE.captures(&text) else {
                i += 1;
                continue;
            };
            let close = table.rows[i + 1..]
                .iter()
                .position(|&r| ROW_ENDFOR_RE.is_match(&row_text(part, r)))
                .map(|offset| i + 1 + offset)
                .ok_or_else(|| MergeError::TemplateSyntax {
                    expression: caps[0].to_string(),
                    reason: "no row with {%tr endfor %} follows".to_string(),
                })?;
            loops.push(RowLoop {
                open: table.rows[i],
                close: table.rows[close],
                body: table.rows[i + 1..close].to_vec(),
                var: caps[1].to_string(),
                list: caps[2].to_string(),
            });
            i = close + 1;
        }
    }
    Ok(loops)
}

/// A paragraph after substitution.
struct RenderedParagraph {
    /// Changed text per text node id.
    edits: Vec<(usize, String)>,
    text: String,
    /// Had text before and has none now.
    emptied: bool,
}

fn render_paragraph(
    part: &XmlPart,
    p: usize,
    ctx: &RenderContext,
    square: &HashSet<&str>,
) -> Result<Option<RenderedParagraph>, MergeError> {
    let para = &part.paragraphs[p];
    if para.nodes.is_empty() {
        return Ok(None);
    }
    let texts: Vec<&str> = para.nodes.iter().map(|&n| part.nodes[n].text.as_str()).collect();
    let concat = texts.concat();
    let tokens = find_tokens(&concat, square);
    if tokens.is_empty() {
        return Ok(None);
    }

    let replacements = tokens
        .iter()
        .map(|t| Ok((t.start, t.end, resolve(t, ctx)?)))
        .collect::<Result<Vec<_>, MergeError>>()?;
    let rendered = distribute(&texts, &replacements);

    let edits = para
        .nodes
        .iter()
        .zip(&rendered)
        .filter(|(node, new_text)| **new_text != part.nodes[**node].text)
        .map(|(&node, new_text)| (node, new_text.clone()))
        .collect();
    let text = rendered.concat();
    Ok(Some(RenderedParagraph {
        edits,
        emptied: !concat.trim().is_empty() && text.trim().is_empty(),
        text,
    }))
}

/// One set of node edits per record of the loop's list.
fn render_loop(
    part: &XmlPart,
    row_loop: &RowLoop,
    ctx: &RenderContext,
    square: &HashSet<&str>,
) -> Result<RowRepeat, MergeError> {
    let records = match ctx.list(&row_loop.list) {
        Some(records) => records,
        None if ctx.is_strict() => {
            return Err(MergeError::UnmappedPlaceholder {
                field: row_loop.list.clone(),
            });
        }
        None => Default::default(),
    };
    let body: Vec<usize> = (0..part.paragraphs.len())
        .filter(|&p| part.paragraphs[p].rows.iter().any(|r| row_loop.body.contains(r)))
        .collect();

    let mut copies = Vec::with_capacity(records.len());
    for record in records.iter() {
        let scoped = ctx.with_item(&row_loop.var, record);
        let mut texts = HashMap::new();
        for &p in &body {
            if let Some(rendered) = render_paragraph(part, p, &scoped, square)? {
                texts.extend(rendered.edits);
            }
        }
        copies.push(texts);
    }
    trace!("Row loop over {}: {} copies", row_loop.list, copies.len());
    Ok(RowRepeat {
        open: row_loop.open,
        close: row_loop.close,
        copies,
    })
}

fn render_part(
    part: &XmlPart,
    ctx: &RenderContext,
    square: &HashSet<&str>,
    clean_empty: bool,
) -> Result<PartEdits, MergeError> {
    let mut edits = PartEdits::default();
    let mut final_text: Vec<Option<String>> = vec![None; part.paragraphs.len()];
    let mut emptied = vec![false; part.paragraphs.len()];

    let loops = find_row_loops(part)?;
    let loop_rows: HashSet<usize> = loops.iter().flat_map(|l| l.rows()).collect();

    for p in 0..part.paragraphs.len() {
        if part.paragraphs[p].rows.iter().any(|r| loop_rows.contains(r)) {
            continue;
        }
        if let Some(rendered) = render_paragraph(part, p, ctx, square)? {
            edits.texts.extend(rendered.edits);
            emptied[p] = rendered.emptied;
            final_text[p] = Some(rendered.text);
        }
    }
    for row_loop in &loops {
        edits.repeats.push(render_loop(part, row_loop, ctx, square)?);
    }

    if clean_empty {
        mark_removals(part, &final_text, &emptied, &loop_rows, &mut edits);
    }
    Ok(edits)
}

/// Paragraphs and table rows that substitution emptied.
///
/// Paragraphs inside table cells, text boxes or carrying section properties
/// stay. Loop rows are left alone and a table always keeps at least one
/// other row.
fn mark_removals(
    part: &XmlPart,
    final_text: &[Option<String>],
    emptied: &[bool],
    loop_rows: &HashSet<usize>,
    edits: &mut PartEdits,
) {
    for (p, para) in part.paragraphs.iter().enumerate() {
        if emptied[p] && !para.nested && !para.has_section && para.rows.is_empty() {
            edits.removed_paragraphs.push(p);
        }
    }

    let text_of = |p: usize| match &final_text[p] {
        Some(t) => t.clone(),
        None => part.paragraph_text(p),
    };
    let mut removed_per_table: HashMap<usize, usize> = HashMap::new();
    for (r, row) in part.rows.iter().enumerate() {
        if loop_rows.contains(&r) {
            continue;
        }
        let paras: Vec<usize> = row.cells.iter().flatten().copied().collect();
        let any_emptied = paras.iter().any(|&p| emptied[p]);
        let all_blank = paras.iter().all(|&p| text_of(p).trim().is_empty());
        if !any_emptied || !all_blank {
            continue;
        }
        let table = &part.tables[row.table];
        let plain_rows = table.rows.iter().filter(|r| !loop_rows.contains(r)).count();
        let removed = removed_per_table.entry(row.table).or_default();
        if plain_rows - *removed > 1 {
            *removed += 1;
            edits.removed_rows.push(r);
        }
    }
}

/// Render a template with a context into new `.docx` bytes.
///
/// Headers and footers are substituted like the body; clean-up only
/// applies to the body. A template without tokens comes back byte for byte.
pub fn render_document(
    template: &Template,
    ctx: &RenderContext,
    options: &RenderOptions,
) -> Result<Vec<u8>> {
    let square: HashSet<&str> = options.square_fields.iter().map(String::as_str).collect();
    let mut rendered: HashMap<&str, String> = HashMap::new();

    for part in &template.parts {
        let clean = options.clean_empty && part.name == BODY_PART;
        let edits = render_part(&part.xml, ctx, &square, clean)?;
        if edits.is_empty() {
            continue;
        }
        trace!(
            "{}: {} text edits, {} paragraphs and {} rows removed, {} row loops",
            part.name,
            edits.texts.len(),
            edits.removed_paragraphs.len(),
            edits.removed_rows.len(),
            edits.repeats.len()
        );
        let xml = part
            .xml
            .write(&edits)
            .with_context(|| format!("Failed to write {}", part.name))?;
        rendered.insert(part.name.as_str(), xml);
    }

    if rendered.is_empty() {
        return Ok(template.bytes().to_vec());
    }
    rebuild_package(template.bytes(), &rendered)
}

/// Copy the package, replacing the given parts. Other entries are copied
/// without recompression.
fn rebuild_package(original: &[u8], replaced: &HashMap<&str, String>) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(original)).context("Failed to reopen template")?;
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).context("Failed to read template entry")?;
        match replaced.get(file.name()) {
            Some(xml) => {
                let name = file.name().to_string();
                drop(file);
                zip.start_file(name.as_str(), options)
                    .with_context(|| format!("Failed to start {name}"))?;
                zip.write_all(xml.as_bytes())
                    .with_context(|| format!("Failed to write {name}"))?;
            }
            None => zip.raw_copy_file(file).context("Failed to copy template entry")?,
        }
    }

    let cursor = zip.finish().context("Failed to finalize DOCX zip")?;
    debug!("Rebuilt package with {} replaced parts", replaced.len());
    Ok(cursor.into_inner())
}

fn render_lenient(text: &str, ctx: &RenderContext, square: &HashSet<&str>) -> String {
    render_text(text, ctx, square).unwrap_or_else(|_| text.to_string())
}

/// Table rows with row loops expanded and every cell rendered.
fn preview_rows(rows: &[Vec<String>], ctx: &RenderContext, square: &HashSet<&str>) -> Vec<Vec<String>> {
    let render_row = |row: &[String], ctx: &RenderContext| -> Vec<String> {
        row.iter().map(|cell| render_lenient(cell, ctx, square)).collect()
    };
    let mut out = Vec::new();
    let mut i = 0;
    while i < rows.len() {
        let joined = rows[i].concat();
        let close = rows[i + 1..]
            .iter()
            .position(|r| ROW_ENDFOR_RE.is_match(&r.concat()))
            .map(|offset| i + 1 + offset);
        match (ROW_FOR_RE.captures(&joined), close) {
            (Some(caps), Some(close)) => {
                let records = ctx.list(&caps[2]).unwrap_or_default();
                for record in records.iter() {
                    let scoped = ctx.with_item(&caps[1], record);
                    out.extend(rows[i + 1..close].iter().map(|r| render_row(r, &scoped)));
                }
                i = close + 1;
            }
            _ => {
                out.push(render_row(&rows[i], ctx));
                i += 1;
            }
        }
    }
    out
}

/// Plain-text preview of the body.
///
/// Paragraphs are rendered one by one and tables become Markdown tables
/// with row loops expanded and blank rows skipped. Anything that fails to
/// render is shown as written.
pub fn render_preview(template: &Template, ctx: &RenderContext, square_fields: &[String]) -> String {
    let square: HashSet<&str> = square_fields.iter().map(String::as_str).collect();
    let mut out = Vec::new();

    for block in template.outline() {
        match block {
            Block::Paragraph(text) => {
                let rendered = render_lenient(&text, ctx, &square);
                if !rendered.trim().is_empty() {
                    out.push(rendered);
                }
            }
            Block::Table(rows) => {
                let rows = preview_rows(&rows, ctx, &square);
                let Some((header, body)) = rows.split_first() else {
                    continue;
                };
                let line = |cells: &[String]| {
                    let cells: Vec<String> = cells.iter().map(|c| c.replace('\n', " ")).collect();
                    format!("| {} |", cells.join(" | "))
                };
                let mut md = vec![
                    line(header),
                    format!("| {} |", vec!["---"; header.len()].join(" | ")),
                ];
                md.extend(
                    body.iter()
                        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
                        .map(|r| line(r)),
                );
                out.push(md.join("\n"));
            }
        }
    }
    out.join("\n\n")
}
