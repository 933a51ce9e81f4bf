//! Event-level view of one WordprocessingML part.
//!
//! A part is read once into a flat list of `quick-xml` events. On top of the
//! events we record where every paragraph, table row and `<w:t>` text node
//! lives, so callers can look at paragraph text as a single string and then
//! rewrite individual text nodes without touching the surrounding markup.

use anyhow::{Result, anyhow};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesStart, BytesText, Event};
use std::collections::{HashMap, HashSet};

const W_P: &[u8] = b"w:p";
const W_T: &[u8] = b"w:t";
const W_TBL: &[u8] = b"w:tbl";
const W_TR: &[u8] = b"w:tr";
const W_TC: &[u8] = b"w:tc";
const W_SECT_PR: &[u8] = b"w:sectPr";

/// One `<w:t>` node with its decoded text.
#[derive(Debug, Clone)]
pub(crate) struct TextNode {
    /// Index of the `<w:t>` start event.
    pub start_tag: usize,
    /// Index of the text event inside it.
    pub event: usize,
    pub text: String,
}

/// A `<w:p>` element.
#[derive(Debug, Clone)]
pub(crate) struct ParagraphSpan {
    pub start: usize,
    pub end: usize,
    /// Text nodes directly owned by this paragraph (nested text-box
    /// paragraphs own their own nodes).
    pub nodes: Vec<usize>,
    /// Enclosing table rows, outermost first.
    pub rows: Vec<usize>,
    /// Paragraph sits inside another paragraph (text box content).
    pub nested: bool,
    /// Paragraph carries the section properties of the document.
    pub has_section: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct TableSpan {
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct RowSpan {
    pub start: usize,
    pub end: usize,
    pub table: usize,
    /// Paragraph ids per cell, nested content flattened into the cell.
    pub cells: Vec<Vec<usize>>,
}

/// Top-level building blocks in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutlineItem {
    Paragraph(usize),
    Table(usize),
}

/// Parsed part plus structural index.
#[derive(Debug, Clone)]
pub(crate) struct XmlPart {
    events: Vec<Event<'static>>,
    pub nodes: Vec<TextNode>,
    pub paragraphs: Vec<ParagraphSpan>,
    pub tables: Vec<TableSpan>,
    pub rows: Vec<RowSpan>,
    pub outline: Vec<OutlineItem>,
}

/// Edits to apply when serializing a part back to XML.
#[derive(Debug, Default)]
pub(crate) struct PartEdits {
    /// New text per text node id.
    pub texts: HashMap<usize, String>,
    pub removed_paragraphs: Vec<usize>,
    pub removed_rows: Vec<usize>,
    pub repeats: Vec<RowRepeat>,
}

impl PartEdits {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
            && self.removed_paragraphs.is_empty()
            && self.removed_rows.is_empty()
            && self.repeats.is_empty()
    }
}

/// The rows strictly between `open` and `close`, written once per copy with
/// that copy's text edits. `open` and `close` themselves are dropped.
#[derive(Debug, Default)]
pub(crate) struct RowRepeat {
    pub open: usize,
    pub close: usize,
    pub copies: Vec<HashMap<usize, String>>,
}

/// Text edits keyed by event index.
struct EventEdits<'a> {
    texts: HashMap<usize, &'a str>,
    /// `<w:t>` start events that need `xml:space="preserve"`.
    preserve: HashSet<usize>,
}

impl XmlPart {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);

        let mut part = XmlPart {
            events: Vec::new(),
            nodes: Vec::new(),
            paragraphs: Vec::new(),
            tables: Vec::new(),
            rows: Vec::new(),
            outline: Vec::new(),
        };

        let mut p_stack: Vec<usize> = Vec::new();
        let mut tbl_stack: Vec<usize> = Vec::new();
        let mut tr_stack: Vec<usize> = Vec::new();
        let mut open_text: Option<usize> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| anyhow!("XML parse error at byte {}: {e}", reader.buffer_position()))?;
            let idx = part.events.len();

            match &event {
                Event::Start(e) => match e.name().as_ref() {
                    W_P => {
                        let id = part.paragraphs.len();
                        part.paragraphs.push(ParagraphSpan {
                            start: idx,
                            end: idx,
                            nodes: Vec::new(),
                            rows: tr_stack.clone(),
                            nested: !p_stack.is_empty(),
                            has_section: false,
                        });
                        if let Some(&outer_row) = tr_stack.first() {
                            if let Some(cell) = part.rows[outer_row].cells.last_mut() {
                                cell.push(id);
                            }
                        } else if p_stack.is_empty() {
                            part.outline.push(OutlineItem::Paragraph(id));
                        }
                        p_stack.push(id);
                    }
                    W_T => open_text = Some(idx),
                    W_TBL => {
                        let id = part.tables.len();
                        part.tables.push(TableSpan { rows: Vec::new() });
                        if tbl_stack.is_empty() && p_stack.is_empty() {
                            part.outline.push(OutlineItem::Table(id));
                        }
                        tbl_stack.push(id);
                    }
                    W_TR => {
                        let id = part.rows.len();
                        let table = tbl_stack.last().copied().unwrap_or_default();
                        part.rows.push(RowSpan {
                            start: idx,
                            end: idx,
                            table,
                            cells: Vec::new(),
                        });
                        if let Some(t) = part.tables.get_mut(table) {
                            t.rows.push(id);
                        }
                        tr_stack.push(id);
                    }
                    W_TC => {
                        if let Some(&row) = tr_stack.last() {
                            part.rows[row].cells.push(Vec::new());
                        }
                    }
                    W_SECT_PR => mark_section(&mut part, &p_stack),
                    _ => {}
                },
                Event::Empty(e) if e.name().as_ref() == W_SECT_PR => {
                    mark_section(&mut part, &p_stack);
                }
                Event::End(e) => match e.name().as_ref() {
                    W_P => {
                        if let Some(id) = p_stack.pop() {
                            part.paragraphs[id].end = idx;
                        }
                    }
                    W_T => open_text = None,
                    W_TBL => {
                        tbl_stack.pop();
                    }
                    W_TR => {
                        if let Some(id) = tr_stack.pop() {
                            part.rows[id].end = idx;
                        }
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    if let (Some(start_tag), Some(&p)) = (open_text, p_stack.last()) {
                        let text = t
                            .unescape()
                            .map_err(|e| anyhow!("XML text unescape error: {e}"))?
                            .into_owned();
                        let node = part.nodes.len();
                        part.nodes.push(TextNode {
                            start_tag,
                            event: idx,
                            text,
                        });
                        part.paragraphs[p].nodes.push(node);
                    }
                }
                Event::Eof => break,
                _ => {}
            }

            part.events.push(event.into_owned());
        }

        Ok(part)
    }

    /// Concatenated text of a paragraph.
    pub fn paragraph_text(&self, id: usize) -> String {
        self.paragraphs[id]
            .nodes
            .iter()
            .map(|&n| self.nodes[n].text.as_str())
            .collect()
    }

    /// Iterator over the text of every paragraph in document order.
    pub fn paragraph_texts(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.paragraphs.len()).map(|id| self.paragraph_text(id))
    }

    /// Text of every cell in the rows of a table, cell paragraphs joined with `\n`.
    pub fn table_cells(&self, table: usize) -> Vec<Vec<String>> {
        self.tables[table]
            .rows
            .iter()
            .map(|&r| {
                self.rows[r]
                    .cells
                    .iter()
                    .map(|cell| {
                        cell.iter()
                            .filter(|&&p| !self.paragraphs[p].nested)
                            .map(|&p| self.paragraph_text(p))
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .collect()
            })
            .collect()
    }

    /// Serialize the part with `edits` applied.
    pub fn write(&self, edits: &PartEdits) -> Result<String> {
        let mut skipped = vec![false; self.events.len()];
        let removed = edits
            .removed_paragraphs
            .iter()
            .map(|&p| (self.paragraphs[p].start, self.paragraphs[p].end))
            .chain(
                edits
                    .removed_rows
                    .iter()
                    .map(|&r| (self.rows[r].start, self.rows[r].end)),
            )
            .chain(
                edits
                    .repeats
                    .iter()
                    .map(|rep| (self.rows[rep.open].start, self.rows[rep.close].end)),
            );
        for (start, end) in removed {
            for flag in &mut skipped[start..=end] {
                *flag = true;
            }
        }
        let repeats: HashMap<usize, &RowRepeat> = edits
            .repeats
            .iter()
            .map(|rep| (self.rows[rep.open].start, rep))
            .collect();

        let base = self.event_edits(&edits.texts);
        let mut writer = Writer::new(Vec::new());
        for idx in 0..self.events.len() {
            if let Some(rep) = repeats.get(&idx) {
                let body = self.rows[rep.open].end + 1..self.rows[rep.close].start;
                for copy in &rep.copies {
                    let copy_edits = self.event_edits(copy);
                    for i in body.clone() {
                        self.write_event(&mut writer, i, &copy_edits)?;
                    }
                }
            }
            if !skipped[idx] {
                self.write_event(&mut writer, idx, &base)?;
            }
        }

        String::from_utf8(writer.into_inner()).map_err(|e| anyhow!("Rendered XML is not UTF-8: {e}"))
    }

    fn event_edits<'a>(&self, texts: &'a HashMap<usize, String>) -> EventEdits<'a> {
        let mut edits = EventEdits {
            texts: HashMap::new(),
            preserve: HashSet::new(),
        };
        for (&node, text) in texts {
            let n = &self.nodes[node];
            edits.texts.insert(n.event, text.as_str());
            if needs_preserve(text) {
                edits.preserve.insert(n.start_tag);
            }
        }
        edits
    }

    fn write_event(&self, writer: &mut Writer<Vec<u8>>, idx: usize, edits: &EventEdits<'_>) -> Result<()> {
        let event = &self.events[idx];
        if let Some(text) = edits.texts.get(&idx) {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        } else if let (true, Event::Start(start)) = (edits.preserve.contains(&idx), event) {
            writer.write_event(Event::Start(with_space_preserve(start)))?;
        } else {
            writer.write_event(event)?;
        }
        Ok(())
    }
}

fn mark_section(part: &mut XmlPart, p_stack: &[usize]) {
    if let Some(&p) = p_stack.last() {
        part.paragraphs[p].has_section = true;
    }
}

fn needs_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)
}

/// Copy of a `<w:t>` start tag that keeps leading/trailing spaces.
fn with_space_preserve(start: &BytesStart<'_>) -> BytesStart<'static> {
    let mut tag = BytesStart::new("w:t");
    let mut has_space = false;
    for attr in start.attributes().flatten() {
        if attr.key.as_ref() == b"xml:space" {
            has_space = true;
        }
        tag.push_attribute(attr);
    }
    if !has_space {
        tag.push_attribute(("xml:space", "preserve"));
    }
    tag.into_owned()
}
