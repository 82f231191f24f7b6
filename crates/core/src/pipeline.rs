//! Result sinks and the pipeline that feeds them.
//!
//! Sinks observe the run lifecycle: once at start and stop, and around every
//! case on every device. Dispatch is serialized so no sink needs internal
//! ordering; a sink that errors is dropped from the rest of the run, while a
//! sink that aborts stops the run after its peers have seen the event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use dtx_runtime::Device;

use crate::error::TestError;
use crate::result::{RecordId, SharedResults};

#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink malfunctioned; it is disabled for the rest of the run.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The sink demands the run stop, e.g. on a fresh core dump.
    #[error("sink abort: {0}")]
    Abort(String),
}

pub type SinkResult = std::result::Result<(), SinkError>;

/// Everything a sink may want to know about the run as a whole.
#[derive(Clone)]
pub struct RunInfo {
    pub results: SharedResults,
    pub devices: Vec<Arc<dyn Device>>,
    pub started: DateTime<Utc>,
}

/// One case execution on one device.
#[derive(Clone)]
pub struct TestEvent {
    pub record: RecordId,
    pub name: String,
    pub device: Arc<dyn Device>,
}

impl TestEvent {
    pub fn device_name(&self) -> &str {
        self.device.name()
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    /// Verbose sinks also receive step-level start/stop traffic through
    /// [`ResultSink::start_test`] and [`ResultSink::stop_test`].
    fn verbose(&self) -> bool {
        false
    }

    async fn start(&self, _run: &RunInfo) -> SinkResult {
        Ok(())
    }

    async fn stop(&self, _run: &RunInfo) -> SinkResult {
        Ok(())
    }

    async fn start_test(&self, _event: &TestEvent) -> SinkResult {
        Ok(())
    }

    async fn stop_test(&self, _event: &TestEvent) -> SinkResult {
        Ok(())
    }
}

struct Entry {
    sink: Arc<dyn ResultSink>,
    enabled: bool,
}

/// Serialized fan-out to every registered sink.
#[derive(Default)]
pub struct Pipeline {
    sinks: Mutex<Vec<Entry>>,
}

enum Hook<'a> {
    Start(&'a RunInfo),
    Stop(&'a RunInfo),
    StartTest(&'a TestEvent),
    StopTest(&'a TestEvent),
    StartStep(&'a TestEvent),
    StopStep(&'a TestEvent),
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, sink: Arc<dyn ResultSink>) {
        self.sinks.lock().await.push(Entry { sink, enabled: true });
    }

    pub async fn start(&self, run: &RunInfo) -> Result<(), TestError> {
        self.dispatch(Hook::Start(run)).await
    }

    pub async fn stop(&self, run: &RunInfo) -> Result<(), TestError> {
        self.dispatch(Hook::Stop(run)).await
    }

    pub async fn start_test(&self, event: &TestEvent) -> Result<(), TestError> {
        self.dispatch(Hook::StartTest(event)).await
    }

    pub async fn stop_test(&self, event: &TestEvent) -> Result<(), TestError> {
        self.dispatch(Hook::StopTest(event)).await
    }

    /// Step-level traffic; only verbose sinks see it.
    pub async fn start_step(&self, event: &TestEvent) -> Result<(), TestError> {
        self.dispatch(Hook::StartStep(event)).await
    }

    pub async fn stop_step(&self, event: &TestEvent) -> Result<(), TestError> {
        self.dispatch(Hook::StopStep(event)).await
    }

    async fn dispatch(&self, hook: Hook<'_>) -> Result<(), TestError> {
        let mut sinks = self.sinks.lock().await;
        let mut abort: Option<String> = None;
        for entry in sinks.iter_mut() {
            if !entry.enabled {
                continue;
            }
            let outcome = match &hook {
                Hook::Start(run) => entry.sink.start(run).await,
                Hook::Stop(run) => entry.sink.stop(run).await,
                Hook::StartTest(event) => entry.sink.start_test(event).await,
                Hook::StopTest(event) => entry.sink.stop_test(event).await,
                Hook::StartStep(event) if entry.sink.verbose() => {
                    entry.sink.start_test(event).await
                }
                Hook::StopStep(event) if entry.sink.verbose() => {
                    entry.sink.stop_test(event).await
                }
                Hook::StartStep(_) | Hook::StopStep(_) => continue,
            };
            match outcome {
                Ok(()) => {}
                Err(SinkError::Failed(reason)) => {
                    tracing::warn!(sink = entry.sink.name(), %reason, "sink failed, disabling it");
                    entry.enabled = false;
                }
                Err(SinkError::Abort(reason)) => {
                    // Remaining sinks still see the event before the abort
                    // propagates.
                    tracing::warn!(sink = entry.sink.name(), %reason, "sink requested an abort");
                    if abort.is_none() {
                        abort = Some(reason);
                    }
                }
            }
        }
        match abort {
            Some(reason) => Err(TestError::abort(reason)),
            None => Ok(()),
        }
    }
}
