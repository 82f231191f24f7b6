//! Frame and message codec.
//!
//! Frames on the wire are documents delimited by the literal `"<>"`
//! terminator. Each document carries an envelope with a single child whose
//! tag is the message kind, an `id` attribute, and `target`/`name`/`params`
//! fields.

use crate::error::{ProtocolError, Result};
use crate::message::{Message, MsgKind, Target};
use crate::registry::Registry;
use crate::value::{decode_opaque, decode_value, encode_value};
use crate::xmlwire::{self, Elem};

/// Frame terminator; cannot occur inside a well-formed document.
pub const TERMINATOR: &[u8] = b"<>";

/// Serializes a message as its envelope document (no terminator).
pub fn encode_message(msg: &Message, registry: &Registry) -> Result<String> {
    let names = msg.param_names();
    let spec = registry
        .lookup(msg.kind, msg.target, &msg.name, &names)
        .or_else(|| registry.lookup_loose(msg.kind, msg.target, &msg.name, &names));

    let mut body = Elem::new(msg.kind.as_str());
    body.set_attr("id", msg.id.to_string());
    body.push(Elem::with_text("target", msg.target.as_str()));
    body.push(Elem::with_text("name", &msg.name));
    let mut params = Elem::new("params");
    for (name, value) in &msg.params {
        let schema = spec.and_then(|s| s.params.get(name));
        params.push(encode_value(name, value, schema)?);
    }
    body.push(params);

    let mut envelope = Elem::new("env");
    envelope.push(body);
    Ok(envelope.to_xml())
}

/// Serializes a message as a terminated frame ready for the socket.
pub fn encode_frame(msg: &Message, registry: &Registry) -> Result<Vec<u8>> {
    let mut bytes = encode_message(msg, registry)?.into_bytes();
    bytes.extend_from_slice(TERMINATOR);
    Ok(bytes)
}

/// Decodes one frame payload (without terminator) into a message.
///
/// Invalid control characters are stripped before parsing. When the
/// (kind, target, name, param-set) key is not registered, `opaque_fallback`
/// selects between an opaque decode that keeps target/name/params as-is and
/// an "unsupported message" error.
pub fn decode_message(payload: &[u8], registry: &Registry, opaque_fallback: bool) -> Result<Message> {
    let text = xmlwire::sanitize(&String::from_utf8_lossy(payload));
    let envelope = xmlwire::parse(&text)?;
    if envelope.children.len() != 1 {
        return Err(ProtocolError::Malformed(format!(
            "envelope must hold exactly one message, got {}",
            envelope.children.len()
        )));
    }
    let body = &envelope.children[0];
    let kind = MsgKind::parse(&body.name)?;
    let id: i64 = body
        .attr("id")
        .ok_or_else(|| ProtocolError::MissingField("id".into()))?
        .trim()
        .parse()
        .map_err(|_| ProtocolError::BadInt {
            name: "id".into(),
            text: body.attr("id").unwrap_or_default().to_string(),
        })?;
    let target = Target::parse(
        &body
            .child("target")
            .ok_or_else(|| ProtocolError::MissingField("target".into()))?
            .text,
    )?;
    let name = body
        .child("name")
        .ok_or_else(|| ProtocolError::MissingField("name".into()))?
        .text
        .clone();

    let empty = Elem::new("params");
    let params_elem = body.child("params").unwrap_or(&empty);
    let mut param_names: Vec<String> = params_elem.children.iter().map(|c| c.name.clone()).collect();
    param_names.sort();
    param_names.dedup();

    let spec = registry
        .lookup(kind, target, &name, &param_names)
        .or_else(|| registry.lookup_loose(kind, target, &name, &param_names));

    let mut msg = Message {
        kind,
        target,
        name: name.clone(),
        id,
        params: Default::default(),
    };

    match spec {
        Some(spec) => {
            for child in &params_elem.children {
                let schema = spec.params.get(&child.name).ok_or_else(|| {
                    ProtocolError::Malformed(format!("unexpected parameter '{}'", child.name))
                })?;
                msg.params
                    .insert(child.name.clone(), decode_value(child, schema)?);
            }
        }
        None if opaque_fallback => {
            for child in &params_elem.children {
                msg.params.insert(child.name.clone(), decode_opaque(child));
            }
        }
        None => {
            return Err(ProtocolError::Unsupported {
                kind,
                target,
                name,
                params: param_names,
            });
        }
    }
    Ok(msg)
}

/// Incremental splitter that carves `"<>"`-terminated frames out of a byte
/// stream.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete frame payload, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self
            .buf
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)?;
        let mut frame: Vec<u8> = self.buf.drain(..pos + TERMINATOR.len()).collect();
        frame.truncate(pos);
        Some(frame)
    }

    /// Bytes of an unfinished trailing frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
