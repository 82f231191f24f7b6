//! The synchronous device facade.
//!
//! Test code drives devices through this trait and never sees ids, frames or
//! the mailbox. Every operation sends one request and blocks on its response;
//! the `push_request`/`pull_response` pair exposes the raw split for callers
//! that want to overlap requests.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use dtx_protocol::{Accessible, Message, NodePath, SearchMethod, Value};

use crate::error::Result;
use crate::info::DeviceInfo;

/// Captured output of a remote command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// One device under automation.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable name this device is addressed by in task targets and results.
    fn name(&self) -> &str;

    /// Self-description announced by the agent.
    fn info(&self) -> DeviceInfo;

    fn connected(&self) -> bool;

    async fn disconnect(&self);

    /// Fetches the accessibility node at `path`, with descendants to `depth`
    /// levels and the named attributes filled in. `None` when the path does
    /// not resolve on the device.
    async fn get_accessible(
        &self,
        path: &NodePath,
        depth: i64,
        include: &[String],
    ) -> Result<Option<Accessible>>;

    /// Searches under `path` for the first node matching every predicate.
    async fn search_accessible(
        &self,
        path: &NodePath,
        method: SearchMethod,
        predicates: &BTreeMap<String, String>,
    ) -> Result<Option<Accessible>>;

    async fn set_text(&self, path: &NodePath, text: &str) -> Result<bool>;

    async fn set_value(&self, path: &NodePath, value: f64) -> Result<bool>;

    async fn exec_action(&self, path: &NodePath, action: &str) -> Result<bool>;

    async fn keyboard(&self, path: &NodePath, keycode: i64, modifiers: &[i64]) -> Result<bool>;

    async fn mouse(
        &self,
        path: &NodePath,
        button: &str,
        event: &str,
        x: i64,
        y: i64,
    ) -> Result<bool>;

    /// Reads a file from the device; `None` when it does not exist.
    async fn get_file(&self, path: &str) -> Result<Option<String>>;

    async fn put_file(&self, path: &str, data: &str) -> Result<bool>;

    /// Runs a command on the device. With `wait` the captured output comes
    /// back; without it the device acknowledges and `None` is returned.
    async fn system_exec(&self, command: &str, wait: bool) -> Result<Option<ExecOutput>>;

    /// Calls a protocol extension by name and returns the raw response.
    async fn extension(&self, name: &str, params: BTreeMap<String, Value>) -> Result<Message>;

    /// Sends a request without waiting; returns the id to pull on.
    async fn push_request(&self, msg: Message) -> Result<i64>;

    /// Waits for the response to a previously pushed request.
    async fn pull_response(&self, id: i64, timeout: Option<Duration>) -> Result<Message>;
}
