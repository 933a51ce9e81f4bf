//! Evaluation of the expression inside `{{ ... }}`.
//!
//! Supported: variables (`Name`, `row.Name`), quoted literals, `~`
//! concatenation and a handful of filters:
//! `upper`, `lower`, `trim`, `title`, `capitalize`, `default(x)` / `d(x)`,
//! `replace(a, b)`.

use once_cell::sync::Lazy;
use regex::Regex;

use merge_core::MergeError;

use crate::context::RenderContext;

static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex")
});
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("valid regex"));

fn syntax(expression: &str, reason: impl Into<String>) -> MergeError {
    MergeError::TemplateSyntax {
        expression: expression.trim().to_string(),
        reason: reason.into(),
    }
}

/// Split on `sep` outside quotes and parentheses.
fn split_top_level<'a>(
    s: &'a str,
    sep: char,
    expression: &str,
) -> Result<Vec<&'a str>, MergeError> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| syntax(expression, "unbalanced ')'"))?;
                }
                c if c == sep && depth == 0 => {
                    parts.push(&s[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    if quote.is_some() {
        return Err(syntax(expression, "unterminated string"));
    }
    if depth != 0 {
        return Err(syntax(expression, "unbalanced '('"));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn string_literal(token: &str) -> Option<&str> {
    let token = token.trim();
    if token.len() >= 2 {
        let first = token.chars().next()?;
        if (first == '\'' || first == '"') && token.ends_with(first) {
            return Some(&token[1..token.len() - 1]);
        }
    }
    None
}

/// Value of an atom: literal, number or variable. `None` when the variable
/// is not in the context.
fn atom(token: &str, ctx: &RenderContext, expression: &str) -> Result<Option<String>, MergeError> {
    let token = token.trim();
    if let Some(lit) = string_literal(token) {
        return Ok(Some(lit.to_string()));
    }
    if NUMBER_RE.is_match(token) {
        return Ok(Some(token.to_string()));
    }
    if VARIABLE_RE.is_match(token) {
        return Ok(ctx.get(token).map(String::from));
    }
    Err(syntax(expression, format!("'{token}' is not a variable or literal")))
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn apply_filter(
    value: Option<String>,
    filter: &str,
    ctx: &RenderContext,
    expression: &str,
) -> Result<Option<String>, MergeError> {
    let filter = filter.trim();
    let (name, args) = match filter.find('(') {
        Some(open) if filter.ends_with(')') => {
            let inner = &filter[open + 1..filter.len() - 1];
            let args = if inner.trim().is_empty() {
                Vec::new()
            } else {
                split_top_level(inner, ',', expression)?
            };
            (filter[..open].trim(), args)
        }
        Some(_) => return Err(syntax(expression, format!("malformed filter '{filter}'"))),
        None => (filter, Vec::new()),
    };

    let arg = |i: usize| -> Result<String, MergeError> {
        let token = args
            .get(i)
            .ok_or_else(|| syntax(expression, format!("filter '{name}' needs an argument")))?;
        Ok(atom(token, ctx, expression)?.unwrap_or_default())
    };

    Ok(match name {
        "upper" => value.map(|v| v.to_uppercase()),
        "lower" => value.map(|v| v.to_lowercase()),
        "trim" => value.map(|v| v.trim().to_string()),
        "title" => value.map(|v| title_case(&v)),
        "capitalize" => value.map(|v| capitalize(&v)),
        "default" | "d" => {
            let fallback = arg(0)?;
            match value {
                Some(v) if !v.is_empty() => Some(v),
                _ => Some(fallback),
            }
        }
        "replace" => {
            let (from, to) = (arg(0)?, arg(1)?);
            value.map(|v| v.replace(&from, &to))
        }
        other => return Err(syntax(expression, format!("unknown filter '{other}'"))),
    })
}

fn term(term: &str, ctx: &RenderContext, expression: &str) -> Result<String, MergeError> {
    let mut pieces = split_top_level(term, '|', expression)?.into_iter();
    let head = pieces.next().unwrap_or_default();
    if head.trim().is_empty() {
        return Err(syntax(expression, "empty expression"));
    }

    let variable = head.trim();
    let mut value = atom(variable, ctx, expression)?;
    for filter in pieces {
        value = apply_filter(value, filter, ctx, expression)?;
    }

    match value {
        Some(v) => Ok(v),
        None if ctx.is_strict() => Err(MergeError::UnmappedPlaceholder {
            field: variable.to_string(),
        }),
        None => Ok(String::new()),
    }
}

/// Evaluate a placeholder expression against the context.
pub fn evaluate(expression: &str, ctx: &RenderContext) -> Result<String, MergeError> {
    let mut out = String::new();
    for part in split_top_level(expression, '~', expression)? {
        out.push_str(&term(part, ctx, expression)?);
    }
    Ok(out)
}
