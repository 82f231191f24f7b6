//! The accessible node value type and its wire subdocument.
//!
//! An [`Accessible`] is a plain value: constructing one never talks to a
//! device. Lazy traversal lives in the runtime crate, where nodes are bound
//! to the device handle that produced them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::path::NodePath;
use crate::xmlwire::Elem;

/// A relation from one accessible node to a set of target nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Relation {
    /// Relation kind, e.g. `labelled-by`.
    pub kind: String,
    /// Paths of the target nodes.
    pub targets: Vec<NodePath>,
}

/// Snapshot of one node of a device accessibility tree.
///
/// Every attribute is optional: a device answers only what the request's
/// `include` list asked for. `children` is populated only up to the request's
/// `depth`; `child_count` is reported independently so callers can traverse
/// lazily.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Accessible {
    pub path: NodePath,
    pub name: Option<String>,
    pub description: Option<String>,
    pub role: Option<String>,
    /// On-screen position (x, y).
    pub position: Option<(i32, i32)>,
    /// On-screen size (width, height).
    pub size: Option<(u32, u32)>,
    pub text: Option<String>,
    /// Whether the text is editable; only meaningful alongside `text`.
    pub editable: Option<bool>,
    pub value: Option<f64>,
    pub actions: Vec<String>,
    pub relations: Vec<Relation>,
    pub states: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub child_count: Option<usize>,
    pub children: Vec<Accessible>,
}

impl Accessible {
    pub fn new(path: NodePath) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    /// Encodes the node as its wire subdocument.
    pub fn to_elem(&self) -> Elem {
        let mut elem = Elem::new("accessible");
        elem.push(Elem::with_text("path", self.path.to_string()));
        if let Some(name) = &self.name {
            elem.push(Elem::with_text("name", name));
        }
        if let Some(description) = &self.description {
            elem.push(Elem::with_text("description", description));
        }
        if let Some(role) = &self.role {
            elem.push(Elem::with_text("role", role));
        }
        if let Some((x, y)) = self.position {
            let mut position = Elem::new("position");
            position.set_attr("x", x.to_string());
            position.set_attr("y", y.to_string());
            elem.push(position);
        }
        if let Some((width, height)) = self.size {
            let mut size = Elem::new("size");
            size.set_attr("width", width.to_string());
            size.set_attr("height", height.to_string());
            elem.push(size);
        }
        if let Some(text) = &self.text {
            let mut node = Elem::with_text("text", text);
            if let Some(editable) = self.editable {
                node.set_attr("editable", if editable { "true" } else { "false" });
            }
            elem.push(node);
        }
        if let Some(value) = self.value {
            elem.push(Elem::with_text("value", value.to_string()));
        }
        if !self.actions.is_empty() {
            let mut actions = Elem::new("actions");
            for action in &self.actions {
                actions.push(Elem::with_text("action", action));
            }
            elem.push(actions);
        }
        if !self.relations.is_empty() {
            let mut relations = Elem::new("relations");
            for relation in &self.relations {
                let mut node = Elem::new("relation");
                node.set_attr("type", &relation.kind);
                for target in &relation.targets {
                    node.push(Elem::with_text("target", target.to_string()));
                }
                relations.push(node);
            }
            elem.push(relations);
        }
        if !self.states.is_empty() {
            let mut states = Elem::new("states");
            for state in &self.states {
                states.push(Elem::with_text("state", state));
            }
            elem.push(states);
        }
        if !self.attributes.is_empty() {
            let mut attributes = Elem::new("attributes");
            for (key, value) in &self.attributes {
                let mut node = Elem::with_text("attr", value);
                node.set_attr("name", key);
                attributes.push(node);
            }
            elem.push(attributes);
        }
        if let Some(count) = self.child_count {
            elem.push(Elem::with_text("count", count.to_string()));
        }
        if !self.children.is_empty() {
            let mut children = Elem::new("children");
            for child in &self.children {
                children.push(child.to_elem());
            }
            elem.push(children);
        }
        elem
    }

    /// Decodes the node from its wire subdocument. Unknown children are
    /// ignored for forward compatibility.
    pub fn from_elem(elem: &Elem) -> Result<Self> {
        let path: NodePath = elem
            .child("path")
            .ok_or_else(|| ProtocolError::MissingField("accessible.path".into()))?
            .text
            .parse()?;
        let mut node = Accessible::new(path);

        node.name = elem.child("name").map(|c| c.text.clone());
        node.description = elem.child("description").map(|c| c.text.clone());
        node.role = elem.child("role").map(|c| c.text.clone());
        if let Some(position) = elem.child("position") {
            node.position = Some((
                parse_attr_int(position, "x")?,
                parse_attr_int(position, "y")?,
            ));
        }
        if let Some(size) = elem.child("size") {
            node.size = Some((
                parse_attr_int(size, "width")?,
                parse_attr_int(size, "height")?,
            ));
        }
        if let Some(text) = elem.child("text") {
            node.text = Some(text.text.clone());
            node.editable = match text.attr("editable") {
                Some(v) if v.eq_ignore_ascii_case("true") => Some(true),
                Some(v) if v.eq_ignore_ascii_case("false") => Some(false),
                Some(v) => {
                    return Err(ProtocolError::BadBool {
                        name: "editable".into(),
                        text: v.to_string(),
                    });
                }
                None => None,
            };
        }
        if let Some(value) = elem.child("value") {
            node.value = Some(value.text.trim().parse().map_err(|_| {
                ProtocolError::BadFloat {
                    name: "value".into(),
                    text: value.text.clone(),
                }
            })?);
        }
        if let Some(actions) = elem.child("actions") {
            node.actions = actions
                .children_named("action")
                .map(|a| a.text.clone())
                .collect();
        }
        if let Some(relations) = elem.child("relations") {
            for rel in relations.children_named("relation") {
                let mut targets = Vec::new();
                for target in rel.children_named("target") {
                    targets.push(target.text.parse()?);
                }
                node.relations.push(Relation {
                    kind: rel.attr("type").unwrap_or_default().to_string(),
                    targets,
                });
            }
        }
        if let Some(states) = elem.child("states") {
            node.states = states
                .children_named("state")
                .map(|s| s.text.clone())
                .collect();
        }
        if let Some(attributes) = elem.child("attributes") {
            for attr in attributes.children_named("attr") {
                node.attributes.insert(
                    attr.attr("name").unwrap_or_default().to_string(),
                    attr.text.clone(),
                );
            }
        }
        if let Some(count) = elem.child("count") {
            node.child_count =
                Some(
                    count
                        .text
                        .trim()
                        .parse()
                        .map_err(|_| ProtocolError::BadInt {
                            name: "count".into(),
                            text: count.text.clone(),
                        })?,
                );
        }
        if let Some(children) = elem.child("children") {
            for child in children.children_named("accessible") {
                node.children.push(Accessible::from_elem(child)?);
            }
        }
        Ok(node)
    }
}

fn parse_attr_int<T: std::str::FromStr>(elem: &Elem, name: &str) -> Result<T> {
    let text = elem
        .attr(name)
        .ok_or_else(|| ProtocolError::MissingField(format!("{}.{}", elem.name, name)))?;
    text.trim().parse().map_err(|_| ProtocolError::BadInt {
        name: name.to_string(),
        text: text.to_string(),
    })
}
