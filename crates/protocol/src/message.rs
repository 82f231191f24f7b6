//! Request/response message values and reserved identifiers.

use std::collections::BTreeMap;
use std::fmt;

use crate::accessible::Accessible;
use crate::error::{ProtocolError, Result};
use crate::path::NodePath;
use crate::value::Value;

/// Default id carried by messages whose id has not been bound yet.
pub const DEFAULT_ID: i64 = 0;
/// Mailbox id under which transport errors are served to waiting callers.
pub const ERROR_ID: i64 = -1;
/// Id of the unsolicited device-info response pushed right after accept.
pub const INFO_ID: i64 = -2;

/// Whether a message travels controller-to-device or back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    Request,
    Response,
}

impl MsgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MsgKind::Request => "request",
            MsgKind::Response => "response",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "request" => Ok(MsgKind::Request),
            "response" => Ok(MsgKind::Response),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// Message target subsystem on the device agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Accessibility tree operations (`a11y`).
    Accessibility,
    /// System operations: files, process execution, device info (`sys`).
    System,
    /// Registered protocol extensions (`ext`).
    Extension,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Accessibility => "a11y",
            Target::System => "sys",
            Target::Extension => "ext",
        }
    }

    /// Accepts both the short wire form and the long descriptive form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "a11y" | "accessibility" => Ok(Target::Accessibility),
            "sys" | "system" => Ok(Target::System),
            "ext" | "extension" => Ok(Target::Extension),
            other => Err(ProtocolError::UnknownTarget(other.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message: (kind, target, name, id, params).
///
/// Responses always carry a boolean `status` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MsgKind,
    pub target: Target,
    pub name: String,
    pub id: i64,
    pub params: BTreeMap<String, Value>,
}

impl Message {
    pub fn request(target: Target, name: impl Into<String>) -> Self {
        Self {
            kind: MsgKind::Request,
            target,
            name: name.into(),
            id: DEFAULT_ID,
            params: BTreeMap::new(),
        }
    }

    pub fn response(target: Target, name: impl Into<String>, status: bool) -> Self {
        Self {
            kind: MsgKind::Response,
            target,
            name: name.into(),
            id: DEFAULT_ID,
            params: BTreeMap::new(),
        }
        .with_param("status", Value::Bool(status))
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Sorted parameter names; part of the registry key for this message.
    pub fn param_names(&self) -> Vec<String> {
        self.params.keys().cloned().collect()
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// The `status` parameter, present on every well-formed response.
    pub fn status(&self) -> Option<bool> {
        match self.params.get("status") {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn text_param(&self, name: &str) -> Option<&str> {
        match self.params.get(name) {
            Some(Value::Text(t)) => Some(t),
            _ => None,
        }
    }

    pub fn int_param(&self, name: &str) -> Option<i64> {
        match self.params.get(name) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn path_param(&self, name: &str) -> Option<&NodePath> {
        match self.params.get(name) {
            Some(Value::Path(p)) => Some(p),
            _ => None,
        }
    }

    pub fn accessible_param(&self, name: &str) -> Option<&Accessible> {
        match self.params.get(name) {
            Some(Value::Accessible(a)) => Some(a),
            _ => None,
        }
    }

    pub fn list_param(&self, name: &str) -> Option<&[Value]> {
        match self.params.get(name) {
            Some(Value::List(items)) => Some(items),
            _ => None,
        }
    }
}
