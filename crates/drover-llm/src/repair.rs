//! Best-effort repair of model output that is meant to be JSON.
//!
//! Models wrap JSON in markdown fences, prefix it with prose, emit Python
//! literals, leave trailing commas or stop mid-object. `repair` undoes the
//! common cases; `parse_structured` then parses strictly.

use std::sync::OnceLock;

use regex::Regex;

use drover_core::error::{DroverError, Result};

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?([\s\S]*?)```").expect("static regex")
    })
}

/// Repair raw model output into text that should parse as JSON.
///
/// Each top-level `{`/`[` span is repaired in order and the first one that
/// parses wins, so a bracket in leading prose does not hide the payload.
/// Falls back to the first repaired span, or an empty string when there is
/// no object or array at all.
pub fn repair(raw: &str) -> String {
    let candidates = repaired_candidates(raw);
    candidates
        .iter()
        .find(|c| serde_json::from_str::<serde::de::IgnoredAny>(c).is_ok())
        .or(candidates.first())
        .cloned()
        .unwrap_or_default()
}

/// Repair then strictly parse model output.
pub fn parse_structured(raw: &str) -> Result<serde_json::Value> {
    let mut first_error = None;
    for candidate in repaired_candidates(raw) {
        match serde_json::from_str(&candidate) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(DroverError::Parse(e.to_string())),
        None => Err(DroverError::Parse(format!(
            "no structured content in output: {}",
            preview(raw)
        ))),
    }
}

fn repaired_candidates(raw: &str) -> Vec<String> {
    let unfenced = strip_code_fences(raw);
    top_level_spans(&unfenced)
        .into_iter()
        .map(|span| balance_closers(&normalize_literals(span)))
        .filter(|repaired| !repaired.trim().is_empty())
        .collect()
}

fn preview(raw: &str) -> String {
    let mut p: String = raw.chars().take(80).collect();
    if raw.chars().count() > 80 {
        p.push('…');
    }
    p
}

/// Strip markdown code fences from text.
fn strip_code_fences(text: &str) -> String {
    match fence_regex().captures(text) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        None => text.trim().to_string(),
    }
}

/// Spans starting at each opening brace/bracket that is not inside an
/// earlier span.
fn top_level_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut offset = 0;
    while let Some(found) = text[offset..].find(['{', '[']) {
        let start = offset + found;
        let span = closed_span(&text[start..]);
        offset = start + span.len();
        spans.push(span);
    }
    spans
}

/// Cut from the opening brace/bracket at the start of `rest` to the point
/// where that value closes, or to the end of the text if the output was
/// truncated.
fn closed_span(rest: &str) -> &str {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for (idx, ch) in rest.char_indices() {
        if let Some(q) = quote {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &rest[..idx + ch.len_utf8()];
                }
            }
            _ => {}
        }
    }
    rest
}

/// Rewrite single-quoted strings, Python literals and trailing commas.
fn normalize_literals(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if let Some(q) = quote {
            match ch {
                '\\' if i + 1 < chars.len() => {
                    let next = chars[i + 1];
                    // `\'` is not a JSON escape in either quote style
                    if next == '\'' {
                        out.push('\'');
                    } else {
                        out.push('\\');
                        out.push(next);
                    }
                    i += 2;
                    continue;
                }
                c if c == q => {
                    out.push('"');
                    quote = None;
                }
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c => out.push(c),
            }
            i += 1;
            continue;
        }

        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                out.push('"');
                i += 1;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, None | Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    if quote.is_some() {
        out.push('"');
    }
    out
}

/// Append missing closers in the order the openers were seen.
fn balance_closers(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = text.trim_end().to_string();
    if result.ends_with(',') {
        result.pop();
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}
