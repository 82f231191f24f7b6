//! Core dump detection between tests.
//!
//! The sink snapshots the configured dump directories on every device at run
//! start, before each case and again after it. Dumps are identified by their
//! (device, path, mtime, size) tuple; a tuple never seen before is attached
//! to the case that was running when it appeared, and each tuple is assigned
//! to at most one case for the whole run.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dtx_runtime::Device;

use crate::pipeline::{ResultSink, RunInfo, SinkError, SinkResult, TestEvent};
use crate::result::{CoreDump, SharedResults};

#[derive(Debug, Clone, Default)]
pub struct CoreDumpConfig {
    /// Directories scanned on every device.
    pub dirs: Vec<String>,
    /// Stop the run as soon as a fresh dump shows up.
    pub abort_on_new: bool,
}

type DumpKey = (String, String, String, u64);

#[derive(Default)]
struct State {
    results: Option<SharedResults>,
    taken: HashSet<DumpKey>,
}

pub struct CoreDumpSink {
    config: CoreDumpConfig,
    state: Mutex<State>,
}

impl CoreDumpSink {
    pub fn new(config: CoreDumpConfig) -> Self {
        CoreDumpSink {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Lists the dump directories through the device's shell. Directories
    /// that cannot be listed are skipped; a flaky scan must not sink the run.
    async fn snapshot(&self, device: &Arc<dyn Device>) -> Vec<CoreDump> {
        let mut dumps = Vec::new();
        for dir in &self.config.dirs {
            let command = format!("find {dir} -type f -printf '%p|%T@|%s\\n'");
            match device.system_exec(&command, true).await {
                Ok(Some(output)) => {
                    for line in output.stdout.lines() {
                        if let Some(dump) = parse_line(line) {
                            dumps.push(dump);
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(device = device.name(), %dir, error = %err, "dump scan failed");
                }
            }
        }
        dumps
    }
}

/// One `path|mtime|size` line. Split from the right, since paths may carry
/// the separator.
fn parse_line(line: &str) -> Option<CoreDump> {
    let mut fields = line.rsplitn(3, '|');
    let size = fields.next()?.trim().parse::<u64>().ok()?;
    let mtime = fields.next()?.to_string();
    let path = fields.next()?.to_string();
    if path.is_empty() {
        return None;
    }
    Some(CoreDump { path, mtime, size })
}

#[async_trait]
impl ResultSink for CoreDumpSink {
    fn name(&self) -> &str {
        "core-dumps"
    }

    /// Seeds the seen set so pre-existing dumps are never reported.
    async fn start(&self, run: &RunInfo) -> SinkResult {
        let mut seed = Vec::new();
        for device in &run.devices {
            let name = device.name().to_string();
            for dump in self.snapshot(device).await {
                seed.push((name.clone(), dump.path, dump.mtime, dump.size));
            }
        }
        let mut state = self.state.lock();
        state.results = Some(Arc::clone(&run.results));
        state.taken.extend(seed);
        Ok(())
    }

    /// Re-baselines before the case so dumps that appeared between cases
    /// are absorbed without being pinned on anyone.
    async fn start_test(&self, event: &TestEvent) -> SinkResult {
        if self.config.dirs.is_empty() {
            return Ok(());
        }
        let dumps = self.snapshot(&event.device).await;
        let device = event.device_name();
        let mut state = self.state.lock();
        for dump in dumps {
            state
                .taken
                .insert((device.to_string(), dump.path, dump.mtime, dump.size));
        }
        Ok(())
    }

    async fn stop_test(&self, event: &TestEvent) -> SinkResult {
        if self.config.dirs.is_empty() {
            return Ok(());
        }
        let dumps = self.snapshot(&event.device).await;
        let device = event.device_name().to_string();

        let mut fresh = Vec::new();
        {
            let mut state = self.state.lock();
            for dump in dumps {
                let key = (device.clone(), dump.path.clone(), dump.mtime.clone(), dump.size);
                if state.taken.insert(key) {
                    fresh.push(dump);
                }
            }
            if !fresh.is_empty() {
                if let Some(results) = &state.results {
                    let mut arena = results.lock();
                    if let Some(slot) = arena.slot_mut(event.record, &device) {
                        slot.cores.extend(fresh.iter().cloned());
                    }
                }
            }
        }

        if !fresh.is_empty() {
            tracing::warn!(%device, count = fresh.len(), "new core dumps after case");
            if self.config.abort_on_new {
                return Err(SinkError::Abort(format!(
                    "{} new core dump(s) on {device}",
                    fresh.len()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_find_output_lines() {
        let dump = parse_line("/var/crash/core.1234|1756500000.123|8192").unwrap();
        assert_eq!(dump.path, "/var/crash/core.1234");
        assert_eq!(dump.mtime, "1756500000.123");
        assert_eq!(dump.size, 8192);
    }

    #[test]
    fn separator_in_the_path_stays_with_the_path() {
        let dump = parse_line("/odd|name/core|1756500000.0|42").unwrap();
        assert_eq!(dump.path, "/odd|name/core");
        assert_eq!(dump.size, 42);
    }

    #[test]
    fn garbage_lines_are_skipped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("no separators here").is_none());
        assert!(parse_line("/core|mtime|not-a-size").is_none());
    }
}
