//! Recover a structured value from free-form capability output.
//!
//! Capability backends wrap JSON in code fences, prepend chatter, or trail
//! notes after the object. The scan here is deliberately character-level:
//! it finds the first `{` and walks to its matching `}` while tracking
//! quoted strings and backslash escapes, so trailing noise and braces inside
//! strings degrade the same way every time.

use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Why a raw output could not be turned into a structured result.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("output is empty")]
    Empty,
    #[error("invalid json: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error("output does not match schema: {}", .0.join("; "))]
    SchemaMismatch(Vec<String>),
    #[error("cannot bind output: {0}")]
    Binding(#[source] serde_json::Error),
}

/// A compiled output contract for a structured role.
pub struct OutputSchema {
    raw: Value,
    validator: Validator,
}

impl OutputSchema {
    /// Compile a JSON Schema (Draft 2020-12).
    pub fn compile(raw: &str) -> anyhow::Result<Self> {
        let raw: Value = serde_json::from_str(raw)
            .map_err(|err| anyhow::anyhow!("parse output schema: {err}"))?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&raw)
            .map_err(|err| anyhow::anyhow!("compile output schema: {err}"))?;
        Ok(Self { raw, validator })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn check(&self, value: &Value) -> Result<(), ParseError> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(ParseError::SchemaMismatch(messages))
        }
    }
}

/// Trim and drop a leading ```` ```json ```` (or bare ```` ``` ````) and a trailing ```` ``` ````.
pub fn strip_code_fence(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

/// Exact substring from the first `{` to its matching `}`.
///
/// Braces inside quoted strings are ignored and a backslash inside a string
/// escapes the next character. When the object never closes the rest of the
/// text from the first `{` is returned. `None` when there is no `{` at all.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

/// Salvage a generic JSON value from raw output.
pub fn salvage_value(raw: &str) -> Result<Value, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let cleaned = strip_code_fence(raw);
    let candidate = extract_json_object(cleaned).unwrap_or(cleaned);
    serde_json::from_str(candidate).map_err(ParseError::Syntax)
}

/// Salvage, check against `schema` when given, then bind to `T`.
pub fn parse_structured<T: DeserializeOwned>(
    raw: &str,
    schema: Option<&OutputSchema>,
) -> Result<T, ParseError> {
    let value = salvage_value(raw)?;
    if let Some(schema) = schema {
        schema.check(&value)?;
    }
    serde_json::from_value(value).map_err(ParseError::Binding)
}
