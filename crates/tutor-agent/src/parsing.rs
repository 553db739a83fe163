//! Structured-output parsing for model replies
//!
//! Models wrap JSON in prose, markdown fences, or nothing at all.
//! `extract_json` tries, in order, first success wins:
//!
//! 1. the content of the first fenced block (optionally tagged `json`); a
//!    closing fence that fails to parse is skipped for the next one, since
//!    string values may themselves contain fences
//! 2. the whole text
//! 3. the span from the first `{` to the last `}`
//! 4. a `{...}` block anchored at the end of the trimmed text
//!
//! The remaining helpers pull single values (a unit float, an answer
//! letter, one sentence) out of free text.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tutor_core::{Result, TutorError};

fn fence_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)```(?:json)?").expect("valid regex"))
}

fn trailing_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}\s*$").expect("valid regex"))
}

/// Parse the first fenced block, trying each closing fence in turn
fn parse_fenced(text: &str) -> Option<Value> {
    let open = fence_open_re().find(text)?;
    let rest = &text[open.end()..];
    rest.match_indices("```")
        .find_map(|(end, _)| serde_json::from_str(rest[..end].trim()).ok())
}

/// Extract a JSON value from raw model output
pub fn extract_json(text: &str) -> Result<Value> {
    if let Some(value) = parse_fenced(text) {
        return Ok(value);
    }

    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                return Ok(value);
            }
        }
    }

    if let Some(m) = trailing_object_re().find(text.trim()) {
        if let Ok(value) = serde_json::from_str(m.as_str()) {
            return Ok(value);
        }
    }

    let preview: String = text.chars().take(80).collect();
    Err(TutorError::Parse(preview))
}

/// Extract a JSON object, rejecting arrays and scalars
pub fn extract_object(text: &str) -> Result<serde_json::Map<String, Value>> {
    match extract_json(text)? {
        Value::Object(map) => Ok(map),
        other => Err(TutorError::InvalidOutput(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Short name of a JSON value's type, for error messages
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// First float-looking token clamped to [0.0, 1.0]; 0.5 when none is found
pub fn extract_unit_float(text: &str) -> f64 {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"([01](?:\.\d+)?|0?\.\d+)").expect("valid regex"));

    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.5)
}

/// Extract a multiple-choice letter (A-D) from free text
///
/// Priority: explicit markers ("Answer: B"), a line-start label on the first
/// non-empty line ("C) ..."), a parenthesised letter ("(D)"), and finally the
/// last standalone A-D token.
pub fn extract_letter(text: &str) -> Option<char> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    static LINE_START: OnceLock<Regex> = OnceLock::new();
    static PAREN: OnceLock<Regex> = OnceLock::new();
    static TOKEN: OnceLock<Regex> = OnceLock::new();

    let t = text.trim();
    if t.is_empty() {
        return None;
    }

    let first_char = |s: &str| s.chars().next().map(|c| c.to_ascii_uppercase());

    let marker = MARKER.get_or_init(|| {
        Regex::new(r"(?i)\b(?:final\s*answer|answer|choice|option)\s*[:\-]?\s*([ABCD])\b")
            .expect("valid regex")
    });
    if let Some(m) = marker.captures(t).and_then(|c| c.get(1)) {
        return first_char(m.as_str());
    }

    let line_start =
        LINE_START.get_or_init(|| Regex::new(r"^\s*([ABCD])\s*[)\.\-]\s*").expect("valid regex"));
    let first_line = t.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if let Some(m) = line_start.captures(first_line).and_then(|c| c.get(1)) {
        return first_char(m.as_str());
    }

    let paren = PAREN.get_or_init(|| Regex::new(r"\(([ABCD])\)").expect("valid regex"));
    if let Some(m) = paren.captures(t).and_then(|c| c.get(1)) {
        return first_char(m.as_str());
    }

    let token = TOKEN.get_or_init(|| Regex::new(r"\b([ABCD])\b").expect("valid regex"));
    token
        .captures_iter(t)
        .filter_map(|c| c.get(1))
        .last()
        .and_then(|m| first_char(m.as_str()))
}

/// Reduce free text to a single sentence
///
/// Code fences are dropped and whitespace collapsed. Falls back to the first
/// 25 words when no sentence terminator is present.
pub fn extract_one_sentence(text: &str) -> String {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    static SENTENCE: OnceLock<Regex> = OnceLock::new();

    if text.trim().is_empty() {
        return String::new();
    }

    let fenced = FENCED.get_or_init(|| Regex::new(r"```[\s\S]*?```").expect("valid regex"));
    let stripped = fenced.replace_all(text, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    let sentence = SENTENCE.get_or_init(|| Regex::new(r"(.+?[.!?])\s").expect("valid regex"));
    let padded = format!("{} ", collapsed);
    if let Some(m) = sentence.captures(&padded).and_then(|c| c.get(1)) {
        return m.as_str().trim().to_string();
    }

    let words: Vec<&str> = collapsed.split_whitespace().collect();
    if words.len() > 25 {
        let head = words[..25].join(" ");
        return format!("{}.", head.trim_end_matches(['.', ',', ';', ':', '!', '?']));
    }
    collapsed
}

/// Collapse whitespace and keep at most `word_cap` words
pub fn normalize_words(text: &str, word_cap: usize) -> String {
    text.split_whitespace()
        .take(word_cap)
        .collect::<Vec<_>>()
        .join(" ")
}
