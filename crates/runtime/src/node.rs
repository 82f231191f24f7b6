//! Device-bound node handles with lazy traversal.

use std::collections::BTreeMap;

use dtx_protocol::{Accessible, NodePath, SearchMethod};

use crate::device::Device;
use crate::error::Result;

/// An accessible node tied to the device it came from.
///
/// Children and relation targets are fetched on demand, so walking a large
/// tree only transfers the nodes actually visited.
pub struct NodeRef<'d> {
    device: &'d dyn Device,
    pub node: Accessible,
}

impl<'d> NodeRef<'d> {
    pub fn new(device: &'d dyn Device, node: Accessible) -> Self {
        Self { device, node }
    }

    /// Fetches the node at `path` and binds it to `device`.
    pub async fn fetch(
        device: &'d dyn Device,
        path: &NodePath,
        include: &[String],
    ) -> Result<Option<NodeRef<'d>>> {
        Ok(device
            .get_accessible(path, 0, include)
            .await?
            .map(|node| Self::new(device, node)))
    }

    pub fn path(&self) -> &NodePath {
        &self.node.path
    }

    /// Fetches the direct children. Uses the reported child count; children
    /// that vanished since the snapshot are skipped.
    pub async fn children(&self) -> Result<Vec<NodeRef<'d>>> {
        let count = self
            .node
            .child_count
            .unwrap_or(self.node.children.len());
        let mut children = Vec::with_capacity(count);
        for index in 0..count {
            let path = self.node.path.child(index as u32);
            if let Some(child) = self.device.get_accessible(&path, 0, &[]).await? {
                children.push(Self::new(self.device, child));
            }
        }
        Ok(children)
    }

    /// Fetches the targets of the named relation.
    pub async fn relation_targets(&self, kind: &str) -> Result<Vec<NodeRef<'d>>> {
        let mut targets = Vec::new();
        for relation in self.node.relations.iter().filter(|r| r.kind == kind) {
            for path in &relation.targets {
                if let Some(node) = self.device.get_accessible(path, 0, &[]).await? {
                    targets.push(Self::new(self.device, node));
                }
            }
        }
        Ok(targets)
    }

    /// Searches below this node on the device.
    pub async fn search(
        &self,
        method: SearchMethod,
        predicates: &BTreeMap<String, String>,
    ) -> Result<Option<NodeRef<'d>>> {
        Ok(self
            .device
            .search_accessible(&self.node.path, method, predicates)
            .await?
            .map(|node| Self::new(self.device, node)))
    }
}
