//! TCP transport to one device agent.
//!
//! Each transport owns a socket, a reader task and a response mailbox. The
//! reader task splits the inbound byte stream into frames, decodes them and
//! files responses under their id; callers correlate by waiting on the
//! mailbox. Writes go through a mutex so concurrent senders interleave whole
//! frames, never bytes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use dtx_protocol::{FrameSplitter, INFO_ID, Message, MsgKind, Registry, codec};

use crate::error::{Error, Result, classify_io};
use crate::info::DeviceInfo;

/// Connection parameters for [`Transport::connect`].
#[derive(Clone)]
pub struct ConnectOptions {
    /// Window during which an actively refused connect keeps being retried.
    /// Covers the gap between launching an agent and it starting to listen.
    pub retry_window: Duration,
    /// Pause between connect attempts inside the retry window.
    pub retry_step: Duration,
    /// How long to wait for the device-info announcement after accept.
    pub handshake_timeout: Duration,
    /// Message registry used to encode and decode frames.
    pub registry: Arc<Registry>,
}

impl ConnectOptions {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            retry_window: Duration::from_secs(2),
            retry_step: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(5),
            registry,
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new(Arc::new(Registry::with_catalog()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Closing,
    Closed,
}

/// Live connection to one device agent.
pub struct Transport {
    addr: String,
    registry: Arc<Registry>,
    writer: TokioMutex<Option<OwnedWriteHalf>>,
    mailbox: Arc<crate::mailbox::Mailbox>,
    state: Arc<Mutex<State>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    info: DeviceInfo,
}

impl Transport {
    /// Connects to `addr`, retrying refused attempts within the retry
    /// window, and waits for the device-info announcement.
    pub async fn connect(addr: &str, options: ConnectOptions) -> Result<Self> {
        let stream = Self::dial(addr, &options).await?;
        let _ = stream.set_nodelay(true);
        let (mut read_half, write_half) = stream.into_split();

        let mailbox = Arc::new(crate::mailbox::Mailbox::new());
        let state = Arc::new(Mutex::new(State::Connected));

        let reader = {
            let mailbox = Arc::clone(&mailbox);
            let state = Arc::clone(&state);
            let registry = Arc::clone(&options.registry);
            let addr = addr.to_string();
            tokio::spawn(async move {
                let mut splitter = FrameSplitter::new();
                let mut buf = [0u8; 4096];
                loop {
                    match read_half.read(&mut buf).await {
                        Ok(0) => {
                            let quiet = *state.lock() != State::Connected;
                            if !quiet {
                                tracing::debug!(%addr, "device closed the connection");
                            }
                            mailbox.fail(Error::ConnectionLost(
                                "connection closed by device".into(),
                            ));
                            break;
                        }
                        Ok(n) => {
                            splitter.push(&buf[..n]);
                            while let Some(frame) = splitter.next_frame() {
                                match codec::decode_message(&frame, &registry, true) {
                                    Ok(msg) if msg.kind == MsgKind::Response => {
                                        tracing::trace!(id = msg.id, name = %msg.name, "response");
                                        mailbox.deliver(msg);
                                    }
                                    Ok(msg) => {
                                        tracing::warn!(
                                            name = %msg.name,
                                            "ignoring unexpected request from device"
                                        );
                                    }
                                    Err(err) => {
                                        tracing::warn!(%err, "dropping undecodable frame");
                                    }
                                }
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            let classified = classify_io(&addr, &err);
                            tracing::debug!(%addr, %err, "read failed");
                            mailbox.fail(classified);
                            break;
                        }
                    }
                }
                *state.lock() = State::Closed;
            })
        };

        // The agent announces itself with an unsolicited info response.
        let announcement = mailbox
            .wait(INFO_ID, Some(options.handshake_timeout))
            .await?
            .ok_or(Error::Handshake(options.handshake_timeout))?;
        let info = DeviceInfo::from_message(&announcement)?;
        tracing::debug!(addr, version = %info.version, locale = %info.locale, "device connected");

        Ok(Self {
            addr: addr.to_string(),
            registry: options.registry,
            writer: TokioMutex::new(Some(write_half)),
            mailbox,
            state,
            reader: Mutex::new(Some(reader)),
            info,
        })
    }

    async fn dial(addr: &str, options: &ConnectOptions) -> Result<TcpStream> {
        let deadline = tokio::time::Instant::now() + options.retry_window;
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(err) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(Error::ConnectionRefused {
                            addr: addr.to_string(),
                        });
                    }
                    tokio::time::sleep(options.retry_step).await;
                }
                Err(err) => return Err(classify_io(addr, &err)),
            }
        }
    }

    /// Device self-description captured during the handshake.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        *self.state.lock() == State::Connected
    }

    /// Sends one request frame.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }
        let frame = codec::encode_frame(msg, &self.registry)?;
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(Error::Closed);
        };
        tracing::trace!(id = msg.id, target = %msg.target, name = %msg.name, "request");
        if let Err(err) = writer.write_all(&frame).await {
            let classified = classify_io(&self.addr, &err);
            self.mailbox.fail(classified.clone());
            *self.state.lock() = State::Closed;
            return Err(classified);
        }
        Ok(())
    }

    /// Waits for the response to `id`.
    pub async fn response(&self, id: i64, timeout: Option<Duration>) -> Result<Message> {
        match self.mailbox.wait(id, timeout).await? {
            Some(msg) => Ok(msg),
            None => Err(Error::ResponseTimeout {
                id,
                timeout: timeout.unwrap_or_default(),
            }),
        }
    }

    /// Closes the connection and logs responses nobody claimed.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state != State::Connected {
                return;
            }
            *state = State::Closing;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        self.mailbox.fail(Error::Closed);
        for orphan in self.mailbox.drain_orphans() {
            tracing::debug!(id = orphan.id, name = %orphan.name, "unclaimed response at disconnect");
        }
        *self.state.lock() = State::Closed;
    }
}
