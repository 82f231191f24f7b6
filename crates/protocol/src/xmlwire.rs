//! Minimal element tree over the angle-bracket wire documents.
//!
//! Frames on the wire are small XML documents. Parsing goes through
//! `quick-xml` events into an [`Elem`] tree; serialization writes the tree
//! back with proper escaping. Decoders must tolerate streams polluted with
//! invalid control characters, so [`sanitize`] strips them before parsing.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use crate::error::{ProtocolError, Result};

/// One element of a wire document: tag name, attributes, text and children.
///
/// Text and children are mutually exclusive in practice; whitespace-only text
/// left behind by pretty-printed documents is dropped during parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Elem {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Elem>,
}

impl Elem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.push((name.into(), value.into()));
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, child: Elem) {
        self.children.push(child);
    }

    /// First child with the given tag name.
    pub fn child(&self, name: &str) -> Option<&Elem> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given tag name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Elem> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Serializes the element tree as a compact document.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value));
            out.push('"');
        }
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if self.children.is_empty() {
            out.push_str(&escape(&self.text));
        } else {
            for child in &self.children {
                child.write(out);
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Removes invalid control characters (below 0x20 except tab, LF, CR).
///
/// Misbehaving agents occasionally emit raw control bytes inside frames;
/// stripping them silently preserves forward progress on the stream.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|&c| c >= '\u{20}' || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Parses one document into an element tree.
///
/// Inter-element whitespace is discarded; a leaf element whose text is
/// entirely whitespace decodes as the empty string.
pub fn parse(text: &str) -> Result<Elem> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Elem> = Vec::new();
    let mut root: Option<Elem> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(elem_from_start(&start)?),
            Event::Empty(start) => {
                let elem = elem_from_start(&start)?;
                attach(&mut stack, &mut root, elem)?;
            }
            Event::End(_) => {
                let mut elem = stack
                    .pop()
                    .ok_or_else(|| ProtocolError::Malformed("unbalanced end tag".into()))?;
                if !elem.children.is_empty() || elem.text.trim().is_empty() {
                    elem.text.clear();
                }
                attach(&mut stack, &mut root, elem)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            // Declarations, comments and processing instructions are ignored.
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ProtocolError::Malformed("unclosed element".into()));
    }
    root.ok_or_else(|| ProtocolError::Malformed("empty document".into()))
}

fn elem_from_start(start: &BytesStart<'_>) -> Result<Elem> {
    let mut elem = Elem::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr?;
        elem.attrs.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            attr.unescape_value()?.into_owned(),
        ));
    }
    Ok(elem)
}

fn attach(stack: &mut [Elem], root: &mut Option<Elem>, elem: Elem) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(elem);
        return Ok(());
    }
    if root.is_some() {
        return Err(ProtocolError::Malformed(
            "multiple top-level elements".into(),
        ));
    }
    *root = Some(elem);
    Ok(())
}
