//! Response mailbox keyed by request id.
//!
//! The reader task files every inbound response under its id. Callers wait
//! for a specific id with an optional deadline; responses nobody is waiting
//! for stay filed until someone asks or the connection goes down. A transport
//! failure is fanned out to every current and future waiter.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use dtx_protocol::Message;

use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    mailed: HashMap<i64, VecDeque<Message>>,
    waiters: HashMap<i64, Vec<oneshot::Sender<Result<Message>>>>,
    failure: Option<Error>,
}

/// Id-indexed mailbox shared between the reader task and request callers.
#[derive(Default)]
pub struct Mailbox {
    inner: Mutex<Inner>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files one inbound response, waking a live waiter on its id if any.
    pub fn deliver(&self, msg: Message) {
        let mut inner = self.inner.lock();
        let id = msg.id;
        let mut msg = msg;
        if let Some(waiters) = inner.waiters.get_mut(&id) {
            while let Some(tx) = waiters.pop() {
                match tx.send(Ok(msg)) {
                    Ok(()) => return,
                    // Waiter gave up (deadline elapsed); try the next one.
                    Err(Ok(returned)) => msg = returned,
                    Err(Err(_)) => return,
                }
            }
        }
        inner.mailed.entry(id).or_default().push_back(msg);
    }

    /// Waits for a response to `id`. Returns `Ok(None)` when the deadline
    /// elapses first, and the stored failure when the transport is down.
    pub async fn wait(&self, id: i64, timeout: Option<Duration>) -> Result<Option<Message>> {
        let rx = {
            let mut inner = self.inner.lock();
            if let Some(queue) = inner.mailed.get_mut(&id) {
                if let Some(msg) = queue.pop_front() {
                    if queue.is_empty() {
                        inner.mailed.remove(&id);
                    }
                    return Ok(Some(msg));
                }
            }
            if let Some(failure) = &inner.failure {
                return Err(failure.clone());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(id).or_default().push(tx);
            rx
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(result) => result,
                Err(_) => return Ok(None),
            },
            None => rx.await,
        };
        match outcome {
            Ok(result) => result.map(Some),
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// Records a transport failure and serves it to every pending waiter.
    pub fn fail(&self, err: Error) {
        let mut inner = self.inner.lock();
        if inner.failure.is_some() {
            return;
        }
        inner.failure = Some(err.clone());
        for (_, waiters) in inner.waiters.drain() {
            for tx in waiters {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    /// Removes and returns every response nobody claimed.
    pub fn drain_orphans(&self) -> Vec<Message> {
        let mut inner = self.inner.lock();
        inner
            .mailed
            .drain()
            .flat_map(|(_, queue)| queue)
            .collect()
    }
}
