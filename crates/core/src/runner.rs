//! The runner: owns the workers and the run lifecycle.
//!
//! One worker task per device, each behind its own [`DeviceLock`]. Pause
//! holds every lock so test code parks at the next device access; stop
//! signals the locks, gives the workers a grace period and then aborts the
//! stragglers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use dtx_runtime::Device;

use crate::context::device_worker;
use crate::error::TestError;
use crate::lock::DeviceLock;
use crate::pipeline::{Pipeline, RunInfo};
use crate::result::SharedResults;
use crate::task::Tasker;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long a stopping worker may keep running before it is aborted.
    pub stop_grace: Duration,
    /// Record full error cause chains instead of surface messages.
    pub debug_errors: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            stop_grace: Duration::from_secs(5),
            debug_errors: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

struct Worker {
    lock: Arc<DeviceLock>,
    handle: JoinHandle<()>,
}

pub struct Runner {
    tasker: Arc<Tasker>,
    pipeline: Arc<Pipeline>,
    config: RunnerConfig,
    state: Mutex<RunnerState>,
    workers: TokioMutex<HashMap<String, Worker>>,
    run: Mutex<Option<RunInfo>>,
}

impl Runner {
    pub fn new(tasker: Arc<Tasker>, pipeline: Arc<Pipeline>, config: RunnerConfig) -> Runner {
        Runner {
            tasker,
            pipeline,
            config,
            state: Mutex::new(RunnerState::Idle),
            workers: TokioMutex::new(HashMap::new()),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    pub fn results(&self) -> SharedResults {
        self.tasker.results()
    }

    /// Opens the pipeline and spawns one worker per device. A second call on
    /// a live run is a no-op; a stopped runner cannot be restarted.
    pub async fn start(&self, devices: Vec<Arc<dyn Device>>) -> Result<(), TestError> {
        {
            let mut state = self.state.lock();
            match *state {
                RunnerState::Idle => *state = RunnerState::Running,
                RunnerState::Running | RunnerState::Paused => return Ok(()),
                RunnerState::Stopped => return Err(TestError::abort("runner already stopped")),
            }
        }
        let run = RunInfo {
            results: self.tasker.results(),
            devices: devices.clone(),
            started: Utc::now(),
        };
        *self.run.lock() = Some(run.clone());
        self.pipeline.start(&run).await?;

        let mut workers = self.workers.lock().await;
        for device in devices {
            self.spawn_into(&mut workers, device);
        }
        Ok(())
    }

    fn spawn_into(&self, workers: &mut HashMap<String, Worker>, device: Arc<dyn Device>) {
        let name = device.name().to_string();
        let lock = Arc::new(DeviceLock::new(device));
        // A worker joining a paused run starts parked.
        if *self.state.lock() == RunnerState::Paused {
            lock.hold();
        }
        let handle = tokio::spawn(device_worker(
            Arc::clone(&self.tasker),
            Arc::clone(&self.pipeline),
            Arc::clone(&lock),
            self.config.debug_errors,
        ));
        tracing::info!(device = %name, "worker spawned");
        workers.insert(name, Worker { lock, handle });
    }

    /// Adds a device to a live run.
    pub async fn add_device(&self, device: Arc<dyn Device>) {
        if let Some(run) = self.run.lock().as_mut() {
            run.devices.push(Arc::clone(&device));
        }
        let mut workers = self.workers.lock().await;
        self.spawn_into(&mut workers, device);
    }

    /// Stops the named device's worker; the rest of the run continues.
    pub async fn remove_device(&self, name: &str) {
        let worker = self.workers.lock().await.remove(name);
        let Some(worker) = worker else {
            return;
        };
        worker.lock.signal_stop();
        self.tasker.kick();
        let mut handle = worker.handle;
        if timeout(self.config.stop_grace, &mut handle).await.is_err() {
            tracing::warn!(device = name, "worker ignored the stop, aborting it");
            handle.abort();
        }
    }

    /// Holds every device lock. Running cases finish their current device
    /// operation and park at the next one.
    pub async fn pause(&self) {
        {
            let mut state = self.state.lock();
            if *state != RunnerState::Running {
                return;
            }
            *state = RunnerState::Paused;
        }
        for worker in self.workers.lock().await.values() {
            worker.lock.hold();
        }
        tracing::info!("run paused");
    }

    pub async fn resume(&self) {
        {
            let mut state = self.state.lock();
            if *state != RunnerState::Paused {
                return;
            }
            *state = RunnerState::Running;
        }
        for worker in self.workers.lock().await.values() {
            worker.lock.release();
        }
        tracing::info!("run resumed");
    }

    /// Stops the run. Workers get `stop_grace` to unwind; whoever is still
    /// running after that is aborted. Works on paused runs too.
    pub async fn stop(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers.values() {
            worker.lock.signal_stop();
        }
        self.tasker.kick();
        for (name, worker) in workers {
            let mut handle = worker.handle;
            if timeout(self.config.stop_grace, &mut handle).await.is_err() {
                tracing::warn!(device = %name, "worker ignored the stop, aborting it");
                handle.abort();
            }
        }
        self.finalize().await;
    }

    /// Waits for every worker to finish on its own, then closes the
    /// pipeline.
    pub async fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for (name, worker) in workers {
            if worker.handle.await.is_err() {
                tracing::warn!(device = %name, "worker panicked");
            }
        }
        self.finalize().await;
    }

    async fn finalize(&self) {
        let transitioned = {
            let mut state = self.state.lock();
            if *state == RunnerState::Stopped {
                false
            } else {
                *state = RunnerState::Stopped;
                true
            }
        };
        if !transitioned {
            return;
        }
        let run = self.run.lock().clone();
        if let Some(run) = run {
            if let Err(err) = self.pipeline.stop(&run).await {
                tracing::warn!(error = %err, "closing the result pipeline failed");
            }
        }
        tracing::info!("run finished");
    }
}
