//! Error types for the dtx wire protocol.

use thiserror::Error;

use crate::message::{MsgKind, Target};

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The document structure does not match the message envelope.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Low-level XML parse error.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed attribute inside a tag.
    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    /// Parameter expected to hold an integer held something else.
    #[error("parameter '{name}' is not an integer: '{text}'")]
    BadInt { name: String, text: String },

    /// Parameter expected to hold a float held something else.
    #[error("parameter '{name}' is not a number: '{text}'")]
    BadFloat { name: String, text: String },

    /// Booleans on the wire must be the literals `true` or `false`.
    #[error("parameter '{name}' is not a boolean: '{text}'")]
    BadBool { name: String, text: String },

    /// A path value failed to parse as slash-separated indices.
    #[error("invalid accessible path: '{0}'")]
    BadPath(String),

    /// A choice parameter held a value outside its registered enumeration.
    #[error("parameter '{name}' value '{value}' is not one of {allowed:?}")]
    BadChoice {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    /// A fixed-length list held the wrong number of items.
    #[error("parameter '{name}' expects {expected} items, got {actual}")]
    WrongLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A list item was named differently than the schema requires.
    #[error("parameter '{name}' expects items named '{expected}', got '{actual}'")]
    BadItemName {
        name: String,
        expected: String,
        actual: String,
    },

    /// A value of the wrong kind was supplied for a schema on encode.
    #[error("parameter '{name}' does not match its schema (expected {expected})")]
    TypeMismatch { name: String, expected: &'static str },

    /// A required field of the envelope or a subdocument is missing.
    #[error("missing field: {0}")]
    MissingField(String),

    /// No registered message matches (kind, target, name, param-set).
    #[error("unsupported message: {kind:?} {target}/{name} with params {params:?}")]
    Unsupported {
        kind: MsgKind,
        target: Target,
        name: String,
        params: Vec<String>,
    },

    /// Two registrations collided on the same message key.
    #[error("duplicate message registration: {kind:?} {target}/{name} with params {params:?}")]
    DuplicateRegistration {
        kind: MsgKind,
        target: Target,
        name: String,
        params: Vec<String>,
    },

    /// Unknown `target` field value.
    #[error("unknown message target: '{0}'")]
    UnknownTarget(String),

    /// The envelope child was neither `request` nor `response`.
    #[error("unknown message kind: '{0}'")]
    UnknownKind(String),
}
