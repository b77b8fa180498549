//! Field paths into JSON objects
//!
//! A field path addresses a value inside a Kubernetes object, e.g.
//! `spec.forProvider.tags[0].key` or `metadata.labels[tessera.dev/composite]`.
//! Dots separate object fields; brackets hold either an array index or a
//! field name that itself contains dots or slashes.
//!
//! Reads distinguish "not there" (`Ok(None)`) from "cannot be traversed"
//! (`Err`), so callers can treat a missing field as a normal condition.

use serde_json::{Map, Value};

use crate::{Error, Result};

/// One step of a parsed field path
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Object field name
    Field(String),
    /// Array index
    Index(usize),
}

/// Parse a field path into its segments.
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    if path.is_empty() {
        return Err(Error::field_path(path, "empty field path"));
    }

    let mut segments = Vec::new();
    let mut field = String::new();
    let mut chars = path.chars().peekable();
    // Set after a closing bracket; only '.', '[' or the end may follow it.
    let mut after_bracket = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if field.is_empty() && !after_bracket {
                    return Err(Error::field_path(path, "unexpected '.'"));
                }
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
                after_bracket = false;
                if chars.peek().is_none() {
                    return Err(Error::field_path(path, "trailing '.'"));
                }
            }
            '[' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(Error::field_path(path, "unterminated '['"));
                }
                if inner.is_empty() {
                    return Err(Error::field_path(path, "empty brackets"));
                }
                match inner.parse::<usize>() {
                    Ok(i) => segments.push(Segment::Index(i)),
                    Err(_) => segments.push(Segment::Field(inner)),
                }
                after_bracket = true;
            }
            ']' => return Err(Error::field_path(path, "unexpected ']'")),
            c => {
                if after_bracket {
                    return Err(Error::field_path(
                        path,
                        format!("unexpected {c:?} after ']'"),
                    ));
                }
                field.push(c);
            }
        }
    }

    if !field.is_empty() {
        segments.push(Segment::Field(field));
    }
    Ok(segments)
}

/// Read the value at `path`.
///
/// Returns `Ok(None)` when any segment along the way is absent or null.
pub fn get<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>> {
    let mut current = root;
    for segment in parse(path)? {
        if current.is_null() {
            return Ok(None);
        }
        let next = match (&segment, current) {
            (Segment::Field(name), Value::Object(map)) => map.get(name),
            (Segment::Index(i), Value::Array(items)) => items.get(*i),
            (Segment::Field(name), _) => {
                return Err(Error::field_path(
                    path,
                    format!("cannot read field {name:?}: parent is not an object"),
                ))
            }
            (Segment::Index(i), _) => {
                return Err(Error::field_path(
                    path,
                    format!("cannot read index {i}: parent is not an array"),
                ))
            }
        };
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    if current.is_null() {
        return Ok(None);
    }
    Ok(Some(current))
}

/// Write `value` at `path`, creating intermediate objects and arrays.
///
/// Arrays are padded with nulls when the index is past their end.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments = parse(path)?;
    set_segments(root, &segments, value, path)
}

fn set_segments(current: &mut Value, segments: &[Segment], value: Value, path: &str) -> Result<()> {
    let Some((first, rest)) = segments.split_first() else {
        *current = value;
        return Ok(());
    };

    match first {
        Segment::Field(name) => {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let map = current.as_object_mut().ok_or_else(|| {
                Error::field_path(
                    path,
                    format!("cannot set field {name:?}: parent is not an object"),
                )
            })?;
            let child = map.entry(name.clone()).or_insert(Value::Null);
            set_segments(child, rest, value, path)
        }
        Segment::Index(i) => {
            if current.is_null() {
                *current = Value::Array(Vec::new());
            }
            let items = current.as_array_mut().ok_or_else(|| {
                Error::field_path(
                    path,
                    format!("cannot set index {i}: parent is not an array"),
                )
            })?;
            if items.len() <= *i {
                items.resize(*i + 1, Value::Null);
            }
            set_segments(&mut items[*i], rest, value, path)
        }
    }
}

/// Deep-merge `source` into `target`.
///
/// Objects merge key by key; any other value in `source` replaces the
/// corresponding value in `target`.
pub fn merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                merge(dst.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}
