//! # Set Expressions
//!
//! Parser for `--set` style assignments: `a.b.c=v,list[0]=x,tags={a,b}`.
//!
//! - `.` descends into a nested map, `\.` is a literal dot
//! - `name[i]` addresses a list element, growing the list with nulls
//! - `{a,b}` produces a list of strings
//! - scalars become booleans, null or integers when they look like one,
//!   strings otherwise

use crate::crd::Values;
use serde_json::Value;
use thiserror::Error;

/// Largest list index accepted in a key
const MAX_INDEX: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrvalsError {
    #[error("key is empty")]
    EmptyKey,
    #[error("key {0:?} has no value")]
    NoValue(String),
    #[error("invalid list index in key {0:?}")]
    InvalidIndex(String),
    #[error("unterminated list value for key {0:?}")]
    UnterminatedList(String),
    #[error("unexpected {found:?} after key {key:?}")]
    Unexpected { key: String, found: char },
}

/// Parse `expression` and write every assignment into `into`
pub fn parse_into(expression: &str, into: &mut Values) -> Result<(), StrvalsError> {
    let mut parser = Parser {
        chars: expression.chars().collect(),
        pos: 0,
    };
    while !parser.at_end() {
        parser.assignment(into)?;
    }
    Ok(())
}

/// Parse `key=value` pairs into a fresh map
pub fn parse(expression: &str) -> Result<Values, StrvalsError> {
    let mut values = Values::new();
    parse_into(expression, &mut values)?;
    Ok(values)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        self.pos += 1;
        c
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn assignment(&mut self, into: &mut Values) -> Result<(), StrvalsError> {
        let (key, stop) = self.read_until(&['=', '.', '[', ',']);
        if key.is_empty() {
            return Err(StrvalsError::EmptyKey);
        }
        match stop {
            Some('=') => {
                let value = self.read_value(&key)?;
                into.insert(key, value);
                Ok(())
            }
            Some('.') => {
                let child = into
                    .entry(key)
                    .or_insert_with(|| Value::Object(Values::new()));
                self.assignment(ensure_object(child))
            }
            Some('[') => {
                let index = self.read_index(&key)?;
                let list = into.entry(key.clone()).or_insert_with(|| Value::Array(vec![]));
                if !list.is_array() {
                    *list = Value::Array(vec![]);
                }
                let Value::Array(list) = list else {
                    unreachable!("list was just replaced with an array")
                };
                if list.len() <= index {
                    let len = index
                        .checked_add(1)
                        .ok_or_else(|| StrvalsError::InvalidIndex(key.clone()))?;
                    list.resize(len, Value::Null);
                }
                match self.next() {
                    Some('=') => {
                        list[index] = self.read_value(&key)?;
                        Ok(())
                    }
                    Some('.') => self.assignment(ensure_object(&mut list[index])),
                    Some(found) => Err(StrvalsError::Unexpected { key, found }),
                    None => Err(StrvalsError::NoValue(key)),
                }
            }
            _ => Err(StrvalsError::NoValue(key)),
        }
    }

    /// Read up to one of `stops`, honoring `\` escapes. The stop is consumed.
    fn read_until(&mut self, stops: &[char]) -> (String, Option<char>) {
        let mut out = String::new();
        while let Some(c) = self.next() {
            if c == '\\' {
                if let Some(escaped) = self.next() {
                    out.push(escaped);
                }
                continue;
            }
            if stops.contains(&c) {
                return (out, Some(c));
            }
            out.push(c);
        }
        (out, None)
    }

    fn read_index(&mut self, key: &str) -> Result<usize, StrvalsError> {
        let (raw, stop) = self.read_until(&[']']);
        if stop.is_none() {
            return Err(StrvalsError::InvalidIndex(key.to_string()));
        }
        raw.trim()
            .parse()
            .ok()
            .filter(|index| *index <= MAX_INDEX)
            .ok_or_else(|| StrvalsError::InvalidIndex(key.to_string()))
    }

    fn read_value(&mut self, key: &str) -> Result<Value, StrvalsError> {
        if self.peek() != Some('{') {
            let (raw, _) = self.read_until(&[',']);
            return Ok(typed_value(&raw));
        }

        self.pos += 1;
        let mut items = Vec::new();
        loop {
            match self.read_until(&[',', '}']) {
                (item, Some(',')) => items.push(Value::String(item)),
                (item, Some(_)) => {
                    if !item.is_empty() || !items.is_empty() {
                        items.push(Value::String(item));
                    }
                    break;
                }
                (_, None) => return Err(StrvalsError::UnterminatedList(key.to_string())),
            }
        }
        match self.next() {
            None | Some(',') => Ok(Value::Array(items)),
            Some(found) => Err(StrvalsError::Unexpected {
                key: key.to_string(),
                found,
            }),
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut Values {
    if !value.is_object() {
        *value = Value::Object(Values::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Scalar typing: booleans, null and integers without leading zeros
fn typed_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let looks_integer = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'));
    if looks_integer {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::from(n);
        }
    }
    Value::String(raw.to_string())
}
