//! Lenient JSON reading for hand-edited schema and metadata documents.
//!
//! Accepts `//` and `/* */` comments, trailing commas before `}` / `]`, and
//! property names in any case. Keys are folded to lowercase with `_` and `-`
//! removed, so `DatabaseName`, `databaseName` and `database_name` all land on
//! the serde name `databasename`. Null-valued properties are treated as absent.

use crate::domain::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Parse `input` into `T`. `document` names the input in error messages.
pub fn from_lenient_str<T: DeserializeOwned>(input: &str, document: &str) -> Result<T> {
    let without_comments = strip_comments(input);
    let normalized = strip_trailing_commas(&without_comments);

    let value: Value = serde_json::from_str(&normalized)
        .map_err(|e| AppError::ParseError(format!("Failed to parse {}: {}", document, e)))?;

    serde_json::from_value(fold_keys(value))
        .map_err(|e| AppError::ParseError(format!("Failed to deserialize {}: {}", document, e)))
}

fn strip_comments(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                // keep tokens on either side of the comment apart
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

fn fold_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut folded = Map::with_capacity(map.len());
            for (key, inner) in map {
                if inner.is_null() {
                    continue;
                }
                folded.insert(fold_key(&key), fold_keys(inner));
            }
            Value::Object(folded)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(fold_keys).collect()),
        other => other,
    }
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
