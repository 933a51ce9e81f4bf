//! Locale-aware display formatting for merged values.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use merge_core::{Language, MergeError};

use crate::data::CellValue;

pub const MONTHS_EN: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];
pub const MONTHS_NL: [&str; 12] = [
    "januari", "februari", "maart", "april", "mei", "juni", "juli", "augustus", "september",
    "oktober", "november", "december",
];

static EUROPEAN_DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+,\d+$").expect("valid regex"));
static EUROPEAN_GROUPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{3}){2,}$").expect("valid regex"));
static ENGLISH_GROUPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(,\d{3})+(\.\d+)?$").expect("valid regex"));
static PLAIN_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid regex"));
static ORDINAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)(st|nd|rd|th)\b").expect("valid regex"));
static DUTCH_LONG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}) ([a-z]+) (\d{4})$").expect("valid regex"));
static FOUR_DIGIT_YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("valid regex"));

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

// Day-first before month-first.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%m-%d-%Y",
    "%m/%d/%Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%B %d %Y",
];

/// How a field's name asks for numbers to be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Whole numbers without decimals.
    Count,
    /// Euro amount with two decimals.
    Currency,
    Plain,
}

impl FieldKind {
    pub fn of(field: &str) -> Self {
        let f = field.trim().to_lowercase();
        if f.contains("number") || f.contains('#') || f.contains("count") || f.starts_with("aantal")
        {
            FieldKind::Count
        } else if f.contains("amount") || f.contains("bedrag") {
            FieldKind::Currency
        } else {
            FieldKind::Plain
        }
    }
}

/// Parse `1234`, `1234.56`, `1,5`, `1.234,56`, `1,234.56`, `€ 12,50` and the like.
///
/// Values with a leading zero followed by a digit (`0612345678`, postal
/// codes) are identifiers, not numbers.
pub fn to_number(text: &str) -> Option<f64> {
    let mut s = text.trim();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_prefix(['€', '$', '£']) {
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.trim_start();
    }

    // A lone comma without a dot is always the decimal mark: `1,250` is 1.25.
    let cleaned: String = if EUROPEAN_DECIMAL_RE.is_match(s) {
        s.replace('.', "").replace(',', ".")
    } else if s.matches(',').count() == 1 && !s.contains('.') {
        s.replace(',', ".").replace(['\u{202f}', '\u{a0}', ' '], "")
    } else if EUROPEAN_GROUPED_RE.is_match(s) {
        s.replace('.', "")
    } else if ENGLISH_GROUPED_RE.is_match(s) {
        s.replace(',', "")
    } else {
        s.replace(['\u{202f}', '\u{a0}', ' '], "")
    };

    if !PLAIN_NUMBER_RE.is_match(&cleaned) {
        return None;
    }
    let bytes = cleaned.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' && bytes[1].is_ascii_digit() {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Parse a date written as ISO, day-first, month-first, or in the long form
/// produced by [`format_date_long`] for any language.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let s = text.trim();
    if s.is_empty() || !FOUR_DIGIT_YEAR_RE.is_match(s) || to_number(s).is_some() {
        return None;
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }

    let without_ordinals = ORDINAL_RE.replace_all(s, "$1");
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&without_ordinals, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    let lower = s.to_lowercase();
    let caps = DUTCH_LONG_RE.captures(&lower)?;
    let month = MONTHS_NL.iter().position(|m| *m == &caps[2])? as u32 + 1;
    let day: u32 = caps[1].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
}

/// `1st`, `2nd`, `3rd`, `4th`, `11th`, `21st`, ...
pub fn ordinal_en(n: u32) -> String {
    let suffix = if (11..=13).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{n}{suffix}")
}

pub fn format_date_long(date: &NaiveDateTime, lang: Language) -> String {
    let (y, m, d) = (date.year(), date.month() as usize, date.day());
    match lang {
        Language::NL => format!("{d} {} {y}", MONTHS_NL[m - 1]),
        Language::US => format!("{} {}, {y}", MONTHS_EN[m - 1], ordinal_en(d)),
        Language::UK => format!("{d} {} {y}", MONTHS_EN[m - 1]),
    }
}

/// Two decimals with thousands grouping for the language.
pub fn format_grouped(value: f64, lang: Language) -> String {
    let (group, decimal) = match lang {
        Language::NL => ('.', ','),
        Language::UK | Language::US => (',', '.'),
    };
    let fixed = format!("{:.2}", (value.abs() * 100.0).round() / 100.0);
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(group);
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && fixed.bytes().any(|b| b != b'0' && b != b'.') {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped}{decimal}{frac_part}")
}

pub fn format_currency(value: f64, lang: Language) -> String {
    format!("€{}", format_grouped(value, lang))
}

/// Integer text for whole numbers, shortest float text otherwise.
pub fn format_plain_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn format_number(value: f64, kind: FieldKind, lang: Language) -> String {
    match kind {
        FieldKind::Count => format_plain_number(value),
        FieldKind::Currency => format_currency(value, lang),
        FieldKind::Plain => {
            // Whole after rounding to cents: show without decimals.
            let cents = (value * 100.0).round() / 100.0;
            if cents.fract() == 0.0 {
                format_plain_number(cents)
            } else {
                format_grouped(value, lang)
            }
        }
    }
}

/// Display text for a cell, chosen by value type and field name.
pub fn format_field_value(value: &CellValue, field: &str, lang: Language) -> String {
    let kind = FieldKind::of(field);
    match value {
        CellValue::Empty => String::new(),
        CellValue::Date(dt) => format_date_long(dt, lang),
        CellValue::Number(n) => format_number(*n, kind, lang),
        CellValue::Bool(b) => value_of_bool(*b),
        CellValue::Text(text) => {
            if text.trim().is_empty() {
                return String::new();
            }
            if let Some(dt) = parse_date(text) {
                return format_date_long(&dt, lang);
            }
            match to_number(text) {
                Some(n) => format_number(n, kind, lang),
                None => text.clone(),
            }
        }
    }
}

/// Like [`format_field_value`], but a non-numeric value in an amount field
/// is an error instead of being passed through.
pub fn format_field_value_strict(
    value: &CellValue,
    field: &str,
    lang: Language,
) -> Result<String, MergeError> {
    if FieldKind::of(field) == FieldKind::Currency {
        let numeric = match value {
            CellValue::Empty | CellValue::Number(_) => true,
            CellValue::Text(t) => t.trim().is_empty() || to_number(t).is_some(),
            CellValue::Bool(_) | CellValue::Date(_) => false,
        };
        if !numeric {
            return Err(MergeError::TypeMismatch {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(format_field_value(value, field, lang))
}

fn value_of_bool(b: bool) -> String {
    if b { "True".into() } else { "False".into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_to_number_variants() {
        assert_eq!(to_number("1234"), Some(1234.0));
        assert_eq!(to_number(" 1234.56 "), Some(1234.56));
        assert_eq!(to_number("1,5"), Some(1.5));
        assert_eq!(to_number("1.234,56"), Some(1234.56));
        assert_eq!(to_number("1,234.56"), Some(1234.56));
        assert_eq!(to_number("1.234.567"), Some(1234567.0));
        assert_eq!(to_number("1 234"), Some(1234.0));
        assert_eq!(to_number("€1.234,50"), Some(1234.5));
        assert_eq!(to_number("€ 12,50"), Some(12.5));
        assert_eq!(to_number("-€5"), Some(-5.0));
        assert_eq!(to_number("€-1,234.00"), Some(-1234.0));
        assert_eq!(to_number("0,5"), Some(0.5));
    }

    #[test]
    fn test_to_number_single_comma_is_decimal() {
        assert_eq!(to_number("1,250"), Some(1.25));
        assert_eq!(to_number("12,500"), Some(12.5));
        assert_eq!(to_number("0,125"), Some(0.125));
        assert_eq!(to_number("€ 1 234,5"), Some(1234.5));
        assert_eq!(to_number("1,250,000"), Some(1250000.0));
        assert_eq!(to_number("1,250.75"), Some(1250.75));
    }

    #[test]
    fn test_to_number_rejects_text() {
        assert_eq!(to_number(""), None);
        assert_eq!(to_number("abc"), None);
        assert_eq!(to_number("inf"), None);
        assert_eq!(to_number("NaN"), None);
        assert_eq!(to_number("12 apples"), None);
        assert_eq!(to_number("0612345678"), None);
        assert_eq!(to_number("1,2,3"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        for s in [
            "2024-03-15",
            "2024-03-15 00:00:00",
            "15-03-2024",
            "15/03/2024",
            "15.03.2024",
            "03/15/2024",
            "15 March 2024",
            "March 15th, 2024",
            "15 maart 2024",
        ] {
            assert_eq!(parse_date(s), Some(expected), "input: {s}");
        }
    }

    #[test]
    fn test_parse_date_day_first_wins() {
        let d = parse_date("04/03/2024").unwrap();
        assert_eq!((d.day(), d.month()), (4, 3));
    }

    #[test]
    fn test_parse_date_rejects_non_dates() {
        assert_eq!(parse_date("2024"), None);
        assert_eq!(parse_date("12"), None);
        assert_eq!(parse_date("Hello"), None);
        assert_eq!(parse_date("31/31/2024"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_ordinal_en() {
        let cases = [
            (1, "1st"),
            (2, "2nd"),
            (3, "3rd"),
            (4, "4th"),
            (11, "11th"),
            (12, "12th"),
            (13, "13th"),
            (21, "21st"),
            (22, "22nd"),
            (111, "111th"),
        ];
        for (n, want) in cases {
            assert_eq!(ordinal_en(n), want);
        }
    }

    #[test]
    fn test_format_date_long() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(format_date_long(&dt, Language::UK), "1 March 2024");
        assert_eq!(format_date_long(&dt, Language::US), "March 1st, 2024");
        assert_eq!(format_date_long(&dt, Language::NL), "1 maart 2024");
    }

    #[test]
    fn test_format_grouped() {
        assert_eq!(format_grouped(1234567.891, Language::UK), "1,234,567.89");
        assert_eq!(format_grouped(1234.5, Language::NL), "1.234,50");
        assert_eq!(format_grouped(12.0, Language::US), "12.00");
        assert_eq!(format_grouped(-1234.5, Language::UK), "-1,234.50");
        assert_eq!(format_grouped(-0.001, Language::UK), "0.00");
    }

    #[test]
    fn test_field_kind() {
        assert_eq!(FieldKind::of("Invoice_Number"), FieldKind::Count);
        assert_eq!(FieldKind::of("#items"), FieldKind::Count);
        assert_eq!(FieldKind::of("aantal_leden"), FieldKind::Count);
        assert_eq!(FieldKind::of("Total Amount"), FieldKind::Currency);
        assert_eq!(FieldKind::of("bedrag"), FieldKind::Currency);
        assert_eq!(FieldKind::of("Name"), FieldKind::Plain);
    }

    #[test]
    fn test_format_field_value_rules() {
        let uk = Language::UK;
        assert_eq!(format_field_value(&CellValue::Empty, "Name", uk), "");
        assert_eq!(format_field_value(&text("Alice"), "Name", uk), "Alice");
        assert_eq!(format_field_value(&text("2024-03-15"), "Date", uk), "15 March 2024");
        assert_eq!(format_field_value(&CellValue::Number(3.0), "count", uk), "3");
        assert_eq!(format_field_value(&text("3.5"), "count", uk), "3.5");
        assert_eq!(format_field_value(&text("1234,5"), "Amount", uk), "€1,234.50");
        assert_eq!(format_field_value(&CellValue::Number(1234.5), "bedrag", Language::NL), "€1.234,50");
        assert_eq!(format_field_value(&CellValue::Number(42.0), "Age", uk), "42");
        assert_eq!(format_field_value(&CellValue::Number(2.125), "Ratio", uk), "2.13");
        assert_eq!(format_field_value(&CellValue::Bool(true), "Active", uk), "True");
        assert_eq!(format_field_value(&CellValue::Bool(false), "Active", uk), "False");
        assert_eq!(format_field_value(&text("0612345678"), "Phone", uk), "0612345678");
    }

    #[test]
    fn test_formatting_is_idempotent() {
        let values = [
            text("2024-03-15"),
            text("15/03/2024"),
            CellValue::Number(1234.5),
            CellValue::Number(-99.999),
            CellValue::Number(7.0),
            CellValue::Number(1234567.25),
            text("0,5"),
            text("12,5"),
            text("Alice Smith"),
            text("0612345678"),
            text("€1.234,56"),
            CellValue::Bool(false),
            CellValue::Date(
                NaiveDate::from_ymd_opt(2023, 12, 22)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            ),
        ];
        let fields = ["Name", "Amount", "count", "Date"];
        for lang in [Language::UK, Language::US, Language::NL] {
            for field in fields {
                for value in &values {
                    let once = format_field_value(value, field, lang);
                    let twice = format_field_value(&text(&once), field, lang);
                    assert_eq!(once, twice, "{value:?} as {field} in {lang}");
                }
            }
        }
    }

    #[test]
    fn test_strict_rejects_text_amount() {
        let err = format_field_value_strict(&text("n/a"), "Amount", Language::UK).unwrap_err();
        assert!(matches!(err, MergeError::TypeMismatch { .. }));
        assert_eq!(
            format_field_value_strict(&text("12"), "Amount", Language::UK).unwrap(),
            "€12.00"
        );
        assert_eq!(
            format_field_value_strict(&text("n/a"), "Name", Language::UK).unwrap(),
            "n/a"
        );
    }
}
