use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use merge_core::{Language, MergeError};

use crate::data::{CellValue, DataTable};
use crate::format::{
    FieldKind, format_currency, format_field_value, format_field_value_strict, format_plain_number,
};
use crate::mapping::{FieldMap, strip_row_prefix};
use crate::template::{is_variable_name, normalize};

/// Label written in the first column of the totals row.
pub const TOTAL_LABEL: &str = "Totaal";

/// Formatted values of one data row, keyed by column name.
pub type Record = HashMap<String, String>;

/// Values available to placeholders while rendering one document.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: HashMap<String, String>,
    /// Record lists for `{%tr for %}` row loops.
    lists: HashMap<String, Arc<Vec<Record>>>,
    strict: bool,
}

impl RenderContext {
    pub fn new(strict: bool) -> Self {
        Self {
            values: HashMap::new(),
            lists: HashMap::new(),
            strict,
        }
    }

    /// Context for a filled-in form: every key is taken literally.
    pub fn from_form<'a>(form: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut ctx = Self::new(false);
        for (field, value) in form {
            ctx.insert_with_alias(strip_row_prefix(field), value);
        }
        ctx
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Insert `key` and its `row.key` alias.
    pub fn insert_with_alias(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.values.insert(format!("row.{key}"), value.clone());
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name.trim()).map(String::as_str)
    }

    pub fn insert_list(&mut self, name: impl Into<String>, records: Arc<Vec<Record>>) {
        self.lists.insert(name.into(), records);
    }

    pub fn list(&self, name: &str) -> Option<Arc<Vec<Record>>> {
        self.lists.get(name.trim()).cloned()
    }

    /// Copy of this context with `record` bound to the loop variable `var`,
    /// so `{{ var.Column }}` resolves to the record's value.
    pub fn with_item(&self, var: &str, record: &Record) -> Self {
        let mut scoped = self.clone();
        for (key, value) in record {
            scoped.values.insert(format!("{var}.{key}"), value.clone());
        }
        scoped
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Evaluate a `{{ ... }}` expression.
    pub fn evaluate(&self, expression: &str) -> Result<String, MergeError> {
        crate::expr::evaluate(expression, self)
    }
}

/// Column totals for the whole table, in column order.
///
/// Amount columns are summed as currency and count columns as integers.
/// Year columns and everything else stay blank. The first column carries
/// the [`TOTAL_LABEL`].
pub fn calculate_totals(table: &DataTable, lang: Language) -> Vec<(String, String)> {
    let mut totals: Vec<(String, String)> = table
        .headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            let norm = header.trim().to_lowercase();
            if norm == "year" || norm == "jaar" {
                return (header.clone(), String::new());
            }

            let numbers: Vec<f64> = table.rows.iter().filter_map(|r| r[col].as_number()).collect();
            if numbers.is_empty() {
                return (header.clone(), String::new());
            }
            let sum: f64 = numbers.iter().sum();

            let value = match FieldKind::of(header) {
                FieldKind::Currency => format_currency(sum, lang),
                FieldKind::Count => format_plain_number(sum),
                FieldKind::Plain => String::new(),
            };
            (header.clone(), value)
        })
        .collect();

    if let Some(first) = totals.first_mut() {
        first.1 = TOTAL_LABEL.to_string();
    }
    totals
}

/// Per-table values shared by every row of a merge.
#[derive(Debug, Clone, Default)]
pub struct TableValues {
    /// Column totals in column order, see [`calculate_totals`].
    pub totals: Vec<(String, String)>,
    /// Every data row followed by the totals row. Exposed as `rows_all`
    /// and `rows`.
    pub records: Arc<Vec<Record>>,
}

impl TableValues {
    pub fn new(table: &DataTable, lang: Language) -> Self {
        let totals = calculate_totals(table, lang);
        let mut records: Vec<Record> = table
            .rows
            .iter()
            .map(|cells| format_record(&table.headers, cells, lang))
            .collect();
        records.push(totals.iter().cloned().collect());
        Self {
            totals,
            records: Arc::new(records),
        }
    }
}

/// Every cell of a row formatted by its column name.
fn format_record(headers: &[String], cells: &[CellValue], lang: Language) -> Record {
    headers
        .iter()
        .zip(cells)
        .map(|(header, cell)| (header.clone(), format_field_value(cell, header, lang)))
        .collect()
}

/// Key under which a column total is exposed, e.g. `total.Amount`.
pub fn total_key(column: &str) -> String {
    let safe: String = column
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("total.{safe}")
}

/// Build the context for one data row.
///
/// Every column is available under its name and a `row.` alias, formatted
/// by that name. Mapped fields then get their formatted cell value and
/// unmapped fields an empty string; in strict mode an unmapped field or a
/// non-numeric amount is an error instead. Expressions and dotted names
/// such as `total.Amount` or loop attributes are left to rendering, which
/// applies the same strict check per lookup.
pub fn build_context(
    table: &DataTable,
    row: usize,
    mapping: &FieldMap,
    square_fields: &[String],
    values: &TableValues,
    lang: Language,
    strict: bool,
) -> Result<RenderContext, MergeError> {
    let cells = table
        .rows
        .get(row)
        .ok_or_else(|| MergeError::Internal(format!("row {row} is out of range")))?;
    let mut ctx = RenderContext::new(strict);

    let record = format_record(&table.headers, cells, lang);
    for (column, value) in &record {
        ctx.insert_with_alias(column, value.clone());
    }

    for (field, column) in mapping.iter() {
        let key = strip_row_prefix(field);
        if !is_variable_name(key) || (column.is_none() && key.contains('.')) {
            continue;
        }
        let cell = column.and_then(|c| table.column_index(c)).map(|i| &cells[i]);
        let value = match cell {
            Some(cell) if strict => format_field_value_strict(cell, key, lang)?,
            Some(cell) => format_field_value(cell, key, lang),
            None if strict => {
                return Err(MergeError::UnmappedPlaceholder {
                    field: field.to_string(),
                });
            }
            None => String::new(),
        };
        ctx.insert_with_alias(key, value);
    }

    for name in square_fields {
        let wanted = normalize(name);
        let value = table
            .headers
            .iter()
            .position(|h| normalize(h) == wanted)
            .map(|i| format_field_value(&cells[i], name, lang))
            .unwrap_or_default();
        ctx.insert(name.clone(), value);
    }

    for (column, value) in &values.totals {
        ctx.insert(total_key(column), value.clone());
    }

    let mut one: Record = record.clone();
    one.extend(record.into_iter().map(|(k, v)| (format!("row.{k}"), v)));
    ctx.insert_list("rows_one", Arc::new(vec![one]));
    ctx.insert_list("rows_all", values.records.clone());
    ctx.insert_list("rows", values.records.clone());

    trace!("Context for row {row}: {} keys", ctx.len());
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn table() -> DataTable {
        DataTable::new(
            vec![
                "Name".into(),
                "Year".into(),
                "Amount".into(),
                "Item count".into(),
                "Note".into(),
                "Order Ref".into(),
            ],
            vec![
                vec![
                    text("Alice"),
                    CellValue::Number(2024.0),
                    CellValue::Number(1234.5),
                    CellValue::Number(2.0),
                    text("first"),
                    text("A-1"),
                ],
                vec![
                    text("Bob"),
                    CellValue::Number(2025.0),
                    text("10,00"),
                    text("3"),
                    CellValue::Number(7.0),
                    CellValue::Empty,
                ],
            ],
        )
    }

    fn mapping(pairs: &[(&str, Option<&str>)]) -> FieldMap {
        let mut map = FieldMap::default();
        for (field, column) in pairs {
            map.set(field, column.map(String::from));
        }
        map
    }

    #[test]
    fn test_calculate_totals() {
        let totals = calculate_totals(&table(), Language::UK);
        let get = |name: &str| totals.iter().find(|(c, _)| c == name).unwrap().1.clone();
        assert_eq!(get("Name"), "Totaal");
        assert_eq!(get("Year"), "");
        assert_eq!(get("Amount"), "€1,244.50");
        assert_eq!(get("Item count"), "5");
        assert_eq!(get("Note"), "");
        assert_eq!(get("Order Ref"), "");
    }

    #[test]
    fn test_calculate_totals_dutch_separators() {
        let totals = calculate_totals(&table(), Language::NL);
        assert_eq!(totals[2].1, "€1.244,50");
    }

    #[test]
    fn test_build_context_formats_and_aliases() {
        let t = table();
        let map = mapping(&[("Name", Some("Name")), ("row.Amount", Some("Amount")), ("Extra", None)]);
        let values = TableValues::new(&t, Language::UK);
        let ctx = build_context(&t, 0, &map, &[], &values, Language::UK, false).unwrap();

        assert_eq!(ctx.get("Name"), Some("Alice"));
        assert_eq!(ctx.get("row.Name"), Some("Alice"));
        assert_eq!(ctx.get("Amount"), Some("€1,234.50"));
        assert_eq!(ctx.get("row.Amount"), Some("€1,234.50"));
        assert_eq!(ctx.get("Extra"), Some(""));
        assert_eq!(ctx.get("total.Amount"), Some("€1,244.50"));
        assert_eq!(ctx.get("total.Item_count"), Some("5"));
    }

    #[test]
    fn test_every_column_is_in_the_context() {
        let t = table();
        let ctx = build_context(
            &t,
            1,
            &FieldMap::default(),
            &[],
            &TableValues::default(),
            Language::UK,
            false,
        )
        .unwrap();
        assert_eq!(ctx.get("Name"), Some("Bob"));
        assert_eq!(ctx.get("row.Amount"), Some("€10.00"));
        assert_eq!(ctx.get("Item count"), Some("3"));
        assert_eq!(ctx.evaluate("Name | upper ~ '!'").unwrap(), "BOB!");
    }

    #[test]
    fn test_mapped_field_wins_over_column_of_same_name() {
        let t = table();
        let map = mapping(&[("Name", Some("Note")), ("Note", None)]);
        let ctx = build_context(&t, 0, &map, &[], &TableValues::default(), Language::UK, false)
            .unwrap();
        assert_eq!(ctx.get("Name"), Some("first"));
        assert_eq!(ctx.get("Note"), Some(""));
    }

    #[test]
    fn test_build_context_square_fields() {
        let t = table();
        let ctx = build_context(
            &t,
            0,
            &FieldMap::default(),
            &["OrderRef".to_string(), "Unknown".to_string()],
            &TableValues::default(),
            Language::UK,
            false,
        )
        .unwrap();
        assert_eq!(ctx.get("OrderRef"), Some("A-1"));
        assert_eq!(ctx.get("Unknown"), Some(""));
    }

    #[test]
    fn test_build_context_strict() {
        let t = table();
        let none = TableValues::default();
        let unmapped = mapping(&[("Extra", None)]);
        let err = build_context(&t, 0, &unmapped, &[], &none, Language::UK, true).unwrap_err();
        assert!(matches!(err, MergeError::UnmappedPlaceholder { .. }));

        let values = TableValues::new(&t, Language::UK);
        let only_totals = mapping(&[("total.Amount", None)]);
        let ctx = build_context(&t, 0, &only_totals, &[], &values, Language::UK, true).unwrap();
        assert_eq!(ctx.get("total.Amount"), Some("€1,244.50"));

        let bad_amount = mapping(&[("Amount", Some("Note"))]);
        let err = build_context(&t, 0, &bad_amount, &[], &none, Language::UK, true).unwrap_err();
        assert!(matches!(err, MergeError::TypeMismatch { .. }));

        assert!(build_context(&t, 0, &bad_amount, &[], &none, Language::UK, false).is_ok());
    }

    #[test]
    fn test_strict_expression_fields_use_columns() {
        let t = table();
        let map = mapping(&[("Name | upper", None), ("Name ~ '!'", None), ("Nope | lower", None)]);
        let ctx = build_context(&t, 0, &map, &[], &TableValues::default(), Language::UK, true)
            .unwrap();
        assert_eq!(ctx.evaluate("Name | upper").unwrap(), "ALICE");
        assert_eq!(ctx.evaluate("Name ~ '!'").unwrap(), "Alice!");
        let err = ctx.evaluate("Nope | lower").unwrap_err();
        assert!(matches!(err, MergeError::UnmappedPlaceholder { ref field } if field == "Nope"));
    }

    #[test]
    fn test_table_values_records_end_with_totals() {
        let t = table();
        let values = TableValues::new(&t, Language::UK);
        assert_eq!(values.records.len(), 3);
        assert_eq!(values.records[0]["Name"], "Alice");
        assert_eq!(values.records[1]["Amount"], "€10.00");
        assert_eq!(values.records[2]["Name"], "Totaal");
        assert_eq!(values.records[2]["Amount"], "€1,244.50");

        let ctx = build_context(&t, 1, &FieldMap::default(), &[], &values, Language::UK, false)
            .unwrap();
        assert_eq!(ctx.list("rows_all").unwrap().len(), 3);
        assert_eq!(ctx.list("rows").unwrap().len(), 3);
        let one = ctx.list("rows_one").unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0]["row.Name"], "Bob");
        assert!(ctx.list("nothing").is_none());
    }

    #[test]
    fn test_with_item_shadows_row_alias() {
        let t = table();
        let values = TableValues::new(&t, Language::UK);
        let ctx = build_context(&t, 0, &FieldMap::default(), &[], &values, Language::UK, false)
            .unwrap();
        let scoped = ctx.with_item("row", &values.records[2]);
        assert_eq!(scoped.get("row.Name"), Some("Totaal"));
        assert_eq!(scoped.get("Name"), Some("Alice"));
        assert_eq!(ctx.get("row.Name"), Some("Alice"));
    }

    #[test]
    fn test_form_context() {
        let ctx = RenderContext::from_form([("row.Name", "Eve"), ("City", "Gouda")]);
        assert_eq!(ctx.get("Name"), Some("Eve"));
        assert_eq!(ctx.get("row.City"), Some("Gouda"));
        assert!(!ctx.is_strict());
    }
}
