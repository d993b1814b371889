//! Path-expression engine for reading and writing values inside JSON job
//! documents, plus Cartesian expansion of experiment dimensions.
//!
//! A location is a `;`-separated list of path segments. Each segment is a
//! dotted path whose tokens are one of:
//!
//! - `key` - plain object field
//! - `key[2]` - list element by index, auto-extending on append
//! - `key[sub=match]` - first list element whose `sub` field equals `match`,
//!   appended as `{sub: match}` when absent
//! - `(a.b.c)` - literal field name containing dots
//!
//! Values written through a path are coerced to the type already present at
//! the target location; the sentinel value `"nil"` makes a segment a no-op.

use serde_json::Value;
use shared::types::{Combination, Dimension, ProcessId};
use shared::process_warn;

/// Sentinel value that skips a path segment entirely
pub const NULL_VALUE: &str = "nil";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Key(String),
    Index { key: String, index: usize },
    Match { key: String, sub_key: String, expect: String },
}

/// Split one `;`-segment into tokens. A leading dot is tolerated and
/// stripped; parenthesised groups keep their inner dots as literal text.
fn split_tokens(segment: &str) -> Result<Vec<Token>, String> {
    let segment = segment.strip_prefix('.').unwrap_or(segment);
    if segment.is_empty() {
        return Err("empty path segment".to_string());
    }

    let mut raw: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in segment.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                raw.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    raw.push(current);

    raw.iter().map(|t| parse_token(t)).collect()
}

fn parse_token(raw: &str) -> Result<Token, String> {
    if raw.is_empty() {
        return Err("empty token".to_string());
    }
    let open = raw.find('[');
    let closed = raw.ends_with(']');
    match (open, closed) {
        (None, false) => Ok(Token::Key(raw.to_string())),
        (Some(open), true) if open > 0 => {
            let key = raw[..open].to_string();
            let inner = &raw[open + 1..raw.len() - 1];
            if inner.is_empty() {
                return Err(format!("empty bracket in token '{raw}'"));
            }
            match inner.split_once('=') {
                Some((sub_key, expect)) => Ok(Token::Match {
                    key,
                    sub_key: sub_key.to_string(),
                    expect: expect.to_string(),
                }),
                None => inner
                    .parse::<usize>()
                    .map(|index| Token::Index { key, index })
                    .map_err(|_| format!("invalid list index in token '{raw}'")),
            }
        }
        _ => Err(format!("malformed bracket in token '{raw}'")),
    }
}

/// Render a JSON value the way it would appear as a dimension value.
/// Strings come out unquoted; everything else uses the JSON rendering.
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerce an incoming string to the type already present at the target.
/// Unparseable input degrades to the type's zero value rather than failing.
fn coerce_like(existing: Option<&Value>, value: &str) -> Value {
    match existing {
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {
            Value::from(value.parse::<i64>().unwrap_or_default())
        }
        Some(Value::Number(_)) => {
            match serde_json::Number::from_f64(value.parse::<f64>().unwrap_or_default()) {
                Some(n) => Value::Number(n),
                None => Value::String(value.to_string()),
            }
        }
        Some(Value::Bool(_)) => Value::Bool(value.parse::<bool>().unwrap_or_default()),
        _ => Value::String(value.to_string()),
    }
}

/// Every token form keys into an object, so missing intermediates are
/// always vivified as empty objects; list tokens create their own lists.
fn empty_container() -> Value {
    Value::Object(serde_json::Map::new())
}

fn set_path(node: &mut Value, tokens: &[Token], value: &str) -> Result<(), String> {
    let (token, rest) = tokens.split_first().ok_or("empty token list")?;
    let obj = node
        .as_object_mut()
        .ok_or_else(|| "cannot descend into non-object".to_string())?;

    match token {
        Token::Key(key) => {
            if rest.is_empty() {
                let coerced = coerce_like(obj.get(key), value);
                obj.insert(key.clone(), coerced);
                Ok(())
            } else {
                let child = obj
                    .entry(key.clone())
                    .or_insert_with(empty_container);
                set_path(child, rest, value)
            }
        }
        Token::Index { key, index } => {
            let entry = obj
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let arr = entry
                .as_array_mut()
                .ok_or_else(|| format!("'{key}' is not a list"))?;
            if rest.is_empty() {
                let coerced = coerce_like(arr.first(), value);
                if *index < arr.len() {
                    arr[*index] = coerced;
                } else {
                    arr.push(coerced);
                }
                Ok(())
            } else {
                let idx = if *index < arr.len() {
                    *index
                } else {
                    arr.push(empty_container());
                    arr.len() - 1
                };
                set_path(&mut arr[idx], rest, value)
            }
        }
        Token::Match { key, sub_key, expect } => {
            if rest.is_empty() {
                return Err(format!("search token '{key}[{sub_key}=...]' cannot end a path"));
            }
            let entry = obj
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let arr = entry
                .as_array_mut()
                .ok_or_else(|| format!("'{key}' is not a list"))?;
            let idx = match arr.iter().position(|e| {
                e.get(sub_key).map(value_to_string).as_deref() == Some(expect.as_str())
            }) {
                Some(i) => i,
                None => {
                    let mut fresh = serde_json::Map::new();
                    fresh.insert(sub_key.clone(), Value::String(expect.clone()));
                    arr.push(Value::Object(fresh));
                    arr.len() - 1
                }
            };
            set_path(&mut arr[idx], rest, value)
        }
    }
}

/// Write `value` into `doc` at `location`.
///
/// Multi-segment locations consume one `;`-separated value per segment.
/// Malformed segments and segments whose value is the `"nil"` sentinel are
/// skipped; nothing here ever fails the caller.
pub fn update_value(doc: &mut Value, location: &str, value: &str) {
    let values: Vec<&str> = value.split(';').collect();
    for (i, segment) in location.split(';').enumerate() {
        let Some(v) = values.get(i) else { break };
        if *v == NULL_VALUE {
            continue;
        }
        match split_tokens(segment) {
            Ok(tokens) => {
                if let Err(err) = set_path(doc, &tokens, v) {
                    process_warn!(
                        ProcessId::Orchestrator,
                        "⚠️ Skipping path segment '{}': {}",
                        segment,
                        err
                    );
                }
            }
            Err(err) => {
                process_warn!(
                    ProcessId::Orchestrator,
                    "⚠️ Skipping malformed path segment '{}': {}",
                    segment,
                    err
                );
            }
        }
    }
}

fn lookup<'a>(node: &'a Value, tokens: &[Token]) -> Option<&'a Value> {
    let (token, rest) = tokens.split_first()?;
    let next = match token {
        Token::Key(key) => node.get(key)?,
        Token::Index { key, index } => node.get(key)?.get(*index)?,
        Token::Match { key, sub_key, expect } => node.get(key)?.as_array()?.iter().find(|e| {
            e.get(sub_key).map(value_to_string).as_deref() == Some(expect.as_str())
        })?,
    };
    if rest.is_empty() { Some(next) } else { lookup(next, rest) }
}

/// Read `location` from `doc`, one string per `;`-segment.
/// Returns `None` when any segment is malformed or resolves to nothing.
pub fn get_value(doc: &Value, location: &str) -> Option<Vec<String>> {
    let mut out = Vec::new();
    for segment in location.split(';') {
        let tokens = split_tokens(segment).ok()?;
        out.push(value_to_string(lookup(doc, &tokens)?));
    }
    Some(out)
}

/// Expand dimensions into the full Cartesian product of their values.
///
/// The first declared dimension varies fastest. Dimensions with no values
/// contribute nothing to the product; all-empty input yields an empty list.
pub fn get_all_combinations(dimensions: &[Dimension]) -> Vec<Combination> {
    let mut combinations: Vec<Combination> = Vec::new();
    for dim in dimensions {
        if dim.values.is_empty() {
            continue;
        }
        let mut next = Vec::with_capacity(combinations.len().max(1) * dim.values.len());
        for value in &dim.values {
            if combinations.is_empty() {
                let mut item = Combination::new();
                item.insert(dim.name.clone(), value.clone());
                next.push(item);
            } else {
                for prev in &combinations {
                    let mut item = prev.clone();
                    item.insert(dim.name.clone(), value.clone());
                    next.push(item);
                }
            }
        }
        combinations = next;
    }
    combinations
}
