//! Accessible paths - positional addresses into a device accessibility tree.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ProtocolError;

/// Positional address of a node in a device accessibility tree.
///
/// Position `i` holds the child index at depth `i`; the empty path addresses
/// the tree root. Equality is structural. The textual form joins the indices
/// with `/`, so `(0, 1, 2, 3)` renders as `/0/1/2/3` and the empty path as
/// `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct NodePath(Vec<u32>);

impl NodePath {
    /// The empty path (tree root).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from child indices, outermost first.
    pub fn from_indices<I: Into<Vec<u32>>>(indices: I) -> Self {
        Self(indices.into())
    }

    /// The path of the enclosing node, or `None` at the root.
    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The path of child `index` under this node.
    pub fn child(&self, index: u32) -> NodePath {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// The child index of this node inside its parent, `None` at the root.
    pub fn index(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Number of indices (tree depth).
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw child indices, outermost first.
    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &NodePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Self::root());
        }
        let mut indices = Vec::new();
        for segment in body.split('/') {
            let index: u32 = segment
                .parse()
                .map_err(|_| ProtocolError::BadPath(s.to_string()))?;
            indices.push(index);
        }
        Ok(Self(indices))
    }
}
