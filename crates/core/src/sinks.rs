//! Ready-made sinks.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::pipeline::{ResultSink, RunInfo, SinkResult, TestEvent};

/// Records the lifecycle as plain strings. Useful for harnesses and for
/// asserting scheduling order.
#[derive(Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<String>>>,
    verbose: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recording sink that also captures step-level traffic.
    pub fn verbose() -> Self {
        RecordingSink {
            events: Arc::default(),
            verbose: true,
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.events)
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn verbose(&self) -> bool {
        self.verbose
    }

    async fn start(&self, _run: &RunInfo) -> SinkResult {
        self.events.lock().push("start".to_string());
        Ok(())
    }

    async fn stop(&self, _run: &RunInfo) -> SinkResult {
        self.events.lock().push("stop".to_string());
        Ok(())
    }

    async fn start_test(&self, event: &TestEvent) -> SinkResult {
        self.events
            .lock()
            .push(format!("startTest {}@{}", event.name, event.device_name()));
        Ok(())
    }

    async fn stop_test(&self, event: &TestEvent) -> SinkResult {
        self.events
            .lock()
            .push(format!("stopTest {}@{}", event.name, event.device_name()));
        Ok(())
    }
}
