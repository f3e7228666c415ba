//! Parsing model replies into actions.
//!
//! The agent asks for replies of the form
//! `{"thoughts": {...}, "command": {"name": "...", "args": {...}}}`.
//! Models wrap this in code fences, add prose around it, or emit invalid
//! escapes; the parser tolerates all three and never panics.

use serde_json::{Map, Value};

/// A command chosen by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub name: String,
    pub args: Map<String, Value>,
}

/// Why a reply could not be turned into an [`Action`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Could not parse invalid json: {0}")]
    InvalidJson(String),
    #[error("Incomplete command args: {0}")]
    IncompleteCommand(String),
}

/// Parse a raw model reply.
pub fn parse_reply(text: &str) -> Result<Action, ParseError> {
    let candidate = json_span(strip_code_fences(text));

    let parsed: Value = serde_json::from_str(candidate)
        .or_else(|_| serde_json::from_str(&escape_lone_backslashes(candidate)))
        .map_err(|_| ParseError::InvalidJson(text.to_string()))?;

    let command = parsed.get("command");
    let name = command.and_then(|c| c.get("name")).and_then(Value::as_str);
    let args = command.and_then(|c| c.get("args")).and_then(Value::as_object);

    match (name, args) {
        (Some(name), Some(args)) if !name.trim().is_empty() => Ok(Action {
            name: name.trim().to_string(),
            args: args.clone(),
        }),
        _ => Err(ParseError::IncompleteCommand(parsed.to_string())),
    }
}

/// Drop a surrounding ```json ... ``` fence, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. "json") on the opening line
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// The outermost `{ ... }` span, or the whole text when there is none.
fn json_span(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Escape backslashes that do not start a valid JSON escape.
fn escape_lone_backslashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push_str("\\\\"),
        }
    }
    out
}
