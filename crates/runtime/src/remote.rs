//! Device handle backed by a live TCP transport.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dtx_protocol::{Accessible, DEFAULT_ID, Message, NodePath, SearchMethod, Value, build};

use crate::device::{Device, ExecOutput};
use crate::error::{Error, Result};
use crate::info::DeviceInfo;
use crate::transport::{ConnectOptions, Transport};

/// Default deadline for any single device operation.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

/// A connected device.
pub struct RemoteDevice {
    name: String,
    transport: Transport,
    next_id: AtomicI64,
    response_timeout: Duration,
}

impl std::fmt::Debug for RemoteDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDevice")
            .field("name", &self.name)
            .field("addr", &self.transport.addr())
            .field("connected", &self.transport.is_connected())
            .finish_non_exhaustive()
    }
}

impl RemoteDevice {
    /// Connects to the agent at `addr` and performs the handshake.
    pub async fn connect(name: impl Into<String>, addr: &str, options: ConnectOptions) -> Result<Self> {
        let transport = Transport::connect(addr, options).await?;
        Ok(Self {
            name: name.into(),
            transport,
            next_id: AtomicI64::new(1),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    fn take_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call(&self, msg: Message) -> Result<Message> {
        let id = msg.id;
        self.transport.send(&msg).await?;
        self.transport
            .response(id, Some(self.response_timeout))
            .await
    }

    /// True status plus the named parameter, or `None` on a false status.
    fn found<T>(response: &Message, extract: impl FnOnce(&Message) -> Option<T>) -> Result<Option<T>> {
        match response.status() {
            Some(true) => match extract(response) {
                Some(value) => Ok(Some(value)),
                None => Err(Error::Protocol(format!(
                    "response to '{}' is missing its result parameter",
                    response.name
                ))),
            },
            Some(false) => Ok(None),
            None => Err(Error::Protocol(format!(
                "response to '{}' carries no status",
                response.name
            ))),
        }
    }

    fn status_of(response: &Message) -> Result<bool> {
        response.status().ok_or_else(|| {
            Error::Protocol(format!("response to '{}' carries no status", response.name))
        })
    }
}

#[async_trait]
impl Device for RemoteDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> DeviceInfo {
        self.transport.info().clone()
    }

    fn connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    async fn get_accessible(
        &self,
        path: &NodePath,
        depth: i64,
        include: &[String],
    ) -> Result<Option<Accessible>> {
        let response = self
            .call(build::get_accessible(self.take_id(), path, depth, include))
            .await?;
        Self::found(&response, |r| r.accessible_param("accessible").cloned())
    }

    async fn search_accessible(
        &self,
        path: &NodePath,
        method: SearchMethod,
        predicates: &BTreeMap<String, String>,
    ) -> Result<Option<Accessible>> {
        let response = self
            .call(build::search_accessible(
                self.take_id(),
                path,
                method,
                predicates,
            ))
            .await?;
        Self::found(&response, |r| r.accessible_param("accessible").cloned())
    }

    async fn set_text(&self, path: &NodePath, text: &str) -> Result<bool> {
        let response = self.call(build::set_text(self.take_id(), path, text)).await?;
        Self::status_of(&response)
    }

    async fn set_value(&self, path: &NodePath, value: f64) -> Result<bool> {
        let response = self
            .call(build::set_value(self.take_id(), path, value))
            .await?;
        Self::status_of(&response)
    }

    async fn exec_action(&self, path: &NodePath, action: &str) -> Result<bool> {
        let response = self
            .call(build::exec_action(self.take_id(), path, action))
            .await?;
        Self::status_of(&response)
    }

    async fn keyboard(&self, path: &NodePath, keycode: i64, modifiers: &[i64]) -> Result<bool> {
        let response = self
            .call(build::keyboard(self.take_id(), path, keycode, modifiers))
            .await?;
        Self::status_of(&response)
    }

    async fn mouse(
        &self,
        path: &NodePath,
        button: &str,
        event: &str,
        x: i64,
        y: i64,
    ) -> Result<bool> {
        let response = self
            .call(build::mouse(self.take_id(), path, button, event, x, y))
            .await?;
        Self::status_of(&response)
    }

    async fn get_file(&self, path: &str) -> Result<Option<String>> {
        let response = self.call(build::get_file(self.take_id(), path)).await?;
        Self::found(&response, |r| r.text_param("data").map(str::to_string))
    }

    async fn put_file(&self, path: &str, data: &str) -> Result<bool> {
        let response = self.call(build::put_file(self.take_id(), path, data)).await?;
        Self::status_of(&response)
    }

    async fn system_exec(&self, command: &str, wait: bool) -> Result<Option<ExecOutput>> {
        let response = self
            .call(build::system_exec(self.take_id(), command, wait))
            .await?;
        if !Self::status_of(&response)? {
            return Ok(None);
        }
        if !wait {
            return Ok(None);
        }
        Ok(Some(ExecOutput {
            stdout: response.text_param("stdout").unwrap_or_default().to_string(),
            stderr: response.text_param("stderr").unwrap_or_default().to_string(),
        }))
    }

    async fn extension(&self, name: &str, params: BTreeMap<String, Value>) -> Result<Message> {
        self.call(build::extension(self.take_id(), name, params)).await
    }

    async fn push_request(&self, msg: Message) -> Result<i64> {
        let msg = if msg.id == DEFAULT_ID {
            msg.with_id(self.take_id())
        } else {
            msg
        };
        let id = msg.id;
        self.transport.send(&msg).await?;
        Ok(id)
    }

    async fn pull_response(&self, id: i64, timeout: Option<Duration>) -> Result<Message> {
        self.transport
            .response(id, timeout.or(Some(self.response_timeout)))
            .await
    }
}
