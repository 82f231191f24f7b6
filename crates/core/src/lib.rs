//! Distributed test execution on top of the device runtime.
//!
//! A plan of suites, cases and steps is frozen into a [`Tasker`]; a
//! [`Runner`] drives one worker per connected device through it, with
//! pause, resume and stop control via per-device locks. Results accumulate
//! in a shared arena and stream through a pipeline of [`ResultSink`]s.

pub mod context;
pub mod coredumps;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod plan;
pub mod result;
pub mod runner;
pub mod sinks;
pub mod status;
pub mod task;

pub use coredumps::{CoreDumpConfig, CoreDumpSink};
pub use error::{StepResult, TestError, format_error};
pub use lock::{DeviceLock, Session};
pub use pipeline::{Pipeline, ResultSink, RunInfo, SinkError, SinkResult, TestEvent};
pub use plan::{TestCase, TestNode, TestStep, TestSuite};
pub use result::{CoreDump, Record, RecordId, RecordKind, ResultArena, SharedResults, Slot};
pub use runner::{Runner, RunnerConfig, RunnerState};
pub use sinks::RecordingSink;
pub use status::Status;
pub use task::{CaseNode, SuiteNode, TaskId, Tasker};
