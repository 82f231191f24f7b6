//! Device handle over a saved accessibility dump.
//!
//! Serves `get` requests from an in-memory tree parsed out of a dump file,
//! so inspection code runs unchanged against recorded sessions. Mutating
//! operations report failure, and search reports not-found, matching what
//! the live agent answers for unsupported requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dtx_protocol::{
    Accessible, DEFAULT_ID, Message, MsgKind, NodePath, SearchMethod, Target, Value, build, xmlwire,
};

use crate::device::{Device, ExecOutput};
use crate::error::{Error, Result};
use crate::info::DeviceInfo;

/// A device handle whose tree comes from a dump instead of a socket.
pub struct OfflineDevice {
    name: String,
    root: Accessible,
    connected: AtomicBool,
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, Message>>,
}

impl OfflineDevice {
    /// Parses a dump document into an offline device.
    pub fn from_xml(name: impl Into<String>, xml: &str) -> Result<Self> {
        let elem = xmlwire::parse(&xmlwire::sanitize(xml)).map_err(Error::from)?;
        let root = Accessible::from_elem(&elem).map_err(Error::from)?;
        Ok(Self {
            name: name.into(),
            root,
            connected: AtomicBool::new(true),
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_tree(name: impl Into<String>, root: Accessible) -> Self {
        Self {
            name: name.into(),
            root,
            connected: AtomicBool::new(true),
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn node_at(&self, path: &NodePath) -> Option<&Accessible> {
        let mut node = &self.root;
        for &index in path.indices() {
            node = node.children.get(index as usize)?;
        }
        Some(node)
    }

    /// Clones `node` with descendants below `depth` cut off.
    fn prune(node: &Accessible, depth: i64) -> Accessible {
        let mut copy = node.clone();
        if depth <= 0 {
            copy.children.clear();
        } else {
            copy.children = node
                .children
                .iter()
                .map(|c| Self::prune(c, depth - 1))
                .collect();
        }
        copy
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }
}

#[async_trait]
impl Device for OfflineDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            version: "offline".into(),
            locale: String::new(),
            extensions: Vec::new(),
        }
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
    }

    async fn get_accessible(
        &self,
        path: &NodePath,
        depth: i64,
        _include: &[String],
    ) -> Result<Option<Accessible>> {
        self.check_connected()?;
        Ok(self.node_at(path).map(|node| Self::prune(node, depth)))
    }

    async fn search_accessible(
        &self,
        _path: &NodePath,
        _method: SearchMethod,
        _predicates: &BTreeMap<String, String>,
    ) -> Result<Option<Accessible>> {
        self.check_connected()?;
        // Dumps do not support search; reported as not found, like a live
        // agent without the capability.
        Ok(None)
    }

    async fn set_text(&self, _path: &NodePath, _text: &str) -> Result<bool> {
        self.check_connected()?;
        Ok(false)
    }

    async fn set_value(&self, _path: &NodePath, _value: f64) -> Result<bool> {
        self.check_connected()?;
        Ok(false)
    }

    async fn exec_action(&self, _path: &NodePath, _action: &str) -> Result<bool> {
        self.check_connected()?;
        Ok(false)
    }

    async fn keyboard(&self, _path: &NodePath, _keycode: i64, _modifiers: &[i64]) -> Result<bool> {
        self.check_connected()?;
        Ok(false)
    }

    async fn mouse(
        &self,
        _path: &NodePath,
        _button: &str,
        _event: &str,
        _x: i64,
        _y: i64,
    ) -> Result<bool> {
        self.check_connected()?;
        Ok(false)
    }

    async fn get_file(&self, _path: &str) -> Result<Option<String>> {
        self.check_connected()?;
        Ok(None)
    }

    async fn put_file(&self, _path: &str, _data: &str) -> Result<bool> {
        self.check_connected()?;
        Ok(false)
    }

    async fn system_exec(&self, _command: &str, _wait: bool) -> Result<Option<ExecOutput>> {
        self.check_connected()?;
        Ok(None)
    }

    async fn extension(&self, name: &str, params: BTreeMap<String, Value>) -> Result<Message> {
        self.check_connected()?;
        let request = build::extension(self.next_id.fetch_add(1, Ordering::SeqCst), name, params);
        Ok(build::response_for(&request, false))
    }

    async fn push_request(&self, msg: Message) -> Result<i64> {
        self.check_connected()?;
        let id = if msg.id == DEFAULT_ID {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        } else {
            msg.id
        };
        let msg = msg.with_id(id);

        // Answer synchronously out of the dump.
        let response = match (msg.kind, msg.target, msg.name.as_str()) {
            (MsgKind::Request, Target::Accessibility, "get") => {
                let found = msg
                    .path_param("path")
                    .and_then(|path| self.node_at(path))
                    .map(|node| Self::prune(node, msg.int_param("depth").unwrap_or(0)));
                match found {
                    Some(node) => build::response_for(&msg, true)
                        .with_param("accessible", Value::Accessible(Box::new(node))),
                    None => build::response_for(&msg, false),
                }
            }
            _ => build::response_for(&msg, false),
        };
        self.pending.lock().insert(id, response);
        Ok(id)
    }

    async fn pull_response(&self, id: i64, _timeout: Option<Duration>) -> Result<Message> {
        self.check_connected()?;
        self.pending
            .lock()
            .remove(&id)
            .ok_or(Error::ResponseTimeout {
                id,
                timeout: Duration::ZERO,
            })
    }
}
