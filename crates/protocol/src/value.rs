//! Wire parameter values and their declared schemas.
//!
//! A [`Schema`] describes how one named parameter is laid out on the wire;
//! a [`Value`] is the decoded form. Registered messages pair every parameter
//! name with a schema (see the registry); unregistered messages fall back to
//! an opaque decode that keeps text and nesting intact.

use std::collections::BTreeMap;

use crate::accessible::Accessible;
use crate::error::{ProtocolError, Result};
use crate::path::NodePath;
use crate::xmlwire::Elem;

/// A decoded parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    /// Open mapping (parameter sets, opaque nested documents).
    Map(BTreeMap<String, Value>),
    Path(NodePath),
    Accessible(Box<Accessible>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Wire layout of one named parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Unicode text; an empty element decodes as the empty string.
    Text,
    /// Decimal integer of any integral width.
    Int,
    /// Decimal number with optional fraction.
    Float,
    /// Literal `true`/`false`, case-insensitive on decode.
    Bool,
    /// Repeated child elements named `item`, optionally of fixed length.
    List {
        item: String,
        kind: Box<Schema>,
        len: Option<usize>,
    },
    /// Text restricted to a registered enumeration.
    Choice(Vec<String>),
    /// Open mapping with optional per-name override schemas; unlisted
    /// entries decode as text.
    ParamSet { overrides: BTreeMap<String, Schema> },
    /// Slash-separated child indices.
    Path,
    /// Nested accessible subdocument.
    Accessible,
}

impl Schema {
    pub fn list_of(item: impl Into<String>, kind: Schema) -> Self {
        Schema::List {
            item: item.into(),
            kind: Box::new(kind),
            len: None,
        }
    }

    pub fn fixed_list_of(item: impl Into<String>, kind: Schema, len: usize) -> Self {
        Schema::List {
            item: item.into(),
            kind: Box::new(kind),
            len: Some(len),
        }
    }

    pub fn choice<S: Into<String>, I: IntoIterator<Item = S>>(allowed: I) -> Self {
        Schema::Choice(allowed.into_iter().map(Into::into).collect())
    }

    pub fn param_set() -> Self {
        Schema::ParamSet {
            overrides: BTreeMap::new(),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Schema::Text => "text",
            Schema::Int => "integer",
            Schema::Float => "float",
            Schema::Bool => "boolean",
            Schema::List { .. } => "list",
            Schema::Choice(_) => "choice",
            Schema::ParamSet { .. } => "parameter set",
            Schema::Path => "path",
            Schema::Accessible => "accessible",
        }
    }
}

/// Encodes a named parameter value against its schema.
pub fn encode_value(name: &str, value: &Value, schema: Option<&Schema>) -> Result<Elem> {
    let mut elem = Elem::new(name);
    match (schema, value) {
        (Some(Schema::Text) | None, Value::Text(t)) => elem.text = t.clone(),
        (Some(Schema::Int) | None, Value::Int(i)) => elem.text = i.to_string(),
        (Some(Schema::Float) | None, Value::Float(f)) => elem.text = f.to_string(),
        // Canonical lower-case literals on encode.
        (Some(Schema::Bool) | None, Value::Bool(b)) => {
            elem.text = if *b { "true" } else { "false" }.to_string();
        }
        (Some(Schema::Path) | None, Value::Path(p)) => elem.text = p.to_string(),
        (Some(Schema::Choice(allowed)), Value::Text(t)) => {
            if !allowed.iter().any(|a| a == t) {
                return Err(ProtocolError::BadChoice {
                    name: name.to_string(),
                    value: t.clone(),
                    allowed: allowed.clone(),
                });
            }
            elem.text = t.clone();
        }
        (Some(Schema::List { item, kind, len }), Value::List(items)) => {
            if let Some(expected) = len {
                if items.len() != *expected {
                    return Err(ProtocolError::WrongLength {
                        name: name.to_string(),
                        expected: *expected,
                        actual: items.len(),
                    });
                }
            }
            for entry in items {
                elem.push(encode_value(item, entry, Some(kind))?);
            }
        }
        (None, Value::List(items)) => {
            for entry in items {
                elem.push(encode_value("item", entry, None)?);
            }
        }
        (Some(Schema::ParamSet { overrides }), Value::Map(entries)) => {
            for (key, entry) in entries {
                elem.push(encode_value(key, entry, Some(overrides.get(key).unwrap_or(&Schema::Text)))?);
            }
        }
        (None, Value::Map(entries)) => {
            for (key, entry) in entries {
                elem.push(encode_value(key, entry, None)?);
            }
        }
        (Some(Schema::Accessible) | None, Value::Accessible(node)) => {
            let sub = node.to_elem();
            elem.attrs = sub.attrs;
            elem.children = sub.children;
        }
        (Some(schema), _) => {
            return Err(ProtocolError::TypeMismatch {
                name: name.to_string(),
                expected: schema.expected(),
            });
        }
    }
    Ok(elem)
}

/// Decodes a parameter element against its schema.
pub fn decode_value(elem: &Elem, schema: &Schema) -> Result<Value> {
    let name = elem.name.as_str();
    match schema {
        Schema::Text => Ok(Value::Text(elem.text.clone())),
        Schema::Int => elem
            .text
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| ProtocolError::BadInt {
                name: name.to_string(),
                text: elem.text.clone(),
            }),
        Schema::Float => elem
            .text
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| ProtocolError::BadFloat {
                name: name.to_string(),
                text: elem.text.clone(),
            }),
        Schema::Bool => {
            let text = elem.text.trim();
            if text.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if text.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                Err(ProtocolError::BadBool {
                    name: name.to_string(),
                    text: elem.text.clone(),
                })
            }
        }
        Schema::Choice(allowed) => {
            let text = elem.text.clone();
            if !allowed.iter().any(|a| *a == text) {
                return Err(ProtocolError::BadChoice {
                    name: name.to_string(),
                    value: text,
                    allowed: allowed.clone(),
                });
            }
            Ok(Value::Text(text))
        }
        Schema::List { item, kind, len } => {
            let mut items = Vec::new();
            for child in &elem.children {
                if child.name != *item {
                    return Err(ProtocolError::BadItemName {
                        name: name.to_string(),
                        expected: item.clone(),
                        actual: child.name.clone(),
                    });
                }
                items.push(decode_value(child, kind)?);
            }
            if let Some(expected) = len {
                if items.len() != *expected {
                    return Err(ProtocolError::WrongLength {
                        name: name.to_string(),
                        expected: *expected,
                        actual: items.len(),
                    });
                }
            }
            Ok(Value::List(items))
        }
        Schema::ParamSet { overrides } => {
            let mut entries = BTreeMap::new();
            for child in &elem.children {
                let kind = overrides.get(&child.name).unwrap_or(&Schema::Text);
                entries.insert(child.name.clone(), decode_value(child, kind)?);
            }
            Ok(Value::Map(entries))
        }
        Schema::Path => Ok(Value::Path(elem.text.parse()?)),
        Schema::Accessible => Ok(Value::Accessible(Box::new(Accessible::from_elem(elem)?))),
    }
}

/// Best-effort decode for messages with no registered schema: nested
/// elements become maps, leaves become text.
pub fn decode_opaque(elem: &Elem) -> Value {
    if elem.children.is_empty() {
        return Value::Text(elem.text.clone());
    }
    let mut entries = BTreeMap::new();
    for child in &elem.children {
        entries.insert(child.name.clone(), decode_opaque(child));
    }
    Value::Map(entries)
}
