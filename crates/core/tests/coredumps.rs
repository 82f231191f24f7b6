//! Core dump diffing against a scripted device shell.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dtx::{
    CoreDumpConfig, CoreDumpSink, Pipeline, Runner, RunnerConfig, Status, Tasker, TestCase,
    TestStep, TestSuite,
};
use dtx_protocol::{Accessible, Message, NodePath, SearchMethod, Target, Value};
use dtx_runtime::{Device, DeviceInfo, Error, ExecOutput, Result};

/// A device whose shell answers `find` scans from a script, one entry per
/// call. The sink scans once at run start and twice per case, before and
/// after it.
struct FakeDevice {
    name: String,
    scans: Mutex<VecDeque<String>>,
}

impl FakeDevice {
    fn new(name: &str, scans: &[&str]) -> Arc<Self> {
        Arc::new(FakeDevice {
            name: name.to_string(),
            scans: Mutex::new(scans.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo::default()
    }

    fn connected(&self) -> bool {
        true
    }

    async fn disconnect(&self) {}

    async fn get_accessible(
        &self,
        _path: &NodePath,
        _depth: i64,
        _include: &[String],
    ) -> Result<Option<Accessible>> {
        Ok(None)
    }

    async fn search_accessible(
        &self,
        _path: &NodePath,
        _method: SearchMethod,
        _predicates: &BTreeMap<String, String>,
    ) -> Result<Option<Accessible>> {
        Ok(None)
    }

    async fn set_text(&self, _path: &NodePath, _text: &str) -> Result<bool> {
        Ok(false)
    }

    async fn set_value(&self, _path: &NodePath, _value: f64) -> Result<bool> {
        Ok(false)
    }

    async fn exec_action(&self, _path: &NodePath, _action: &str) -> Result<bool> {
        Ok(false)
    }

    async fn keyboard(&self, _path: &NodePath, _keycode: i64, _modifiers: &[i64]) -> Result<bool> {
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
        Ok(false)
    }

    async fn get_file(&self, _path: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put_file(&self, _path: &str, _data: &str) -> Result<bool> {
        Ok(false)
    }

    async fn system_exec(&self, _command: &str, _wait: bool) -> Result<Option<ExecOutput>> {
        let stdout = self.scans.lock().pop_front().unwrap_or_default();
        Ok(Some(ExecOutput {
            stdout,
            stderr: String::new(),
        }))
    }

    async fn extension(&self, name: &str, _params: BTreeMap<String, Value>) -> Result<Message> {
        Ok(Message::response(Target::Extension, name, false))
    }

    async fn push_request(&self, _msg: Message) -> Result<i64> {
        Err(Error::Protocol("not scripted".into()))
    }

    async fn pull_response(&self, _id: i64, _timeout: Option<Duration>) -> Result<Message> {
        Err(Error::Protocol("not scripted".into()))
    }
}

fn plan(cases: &[&str]) -> Vec<TestSuite> {
    let mut suite = TestSuite::new("dumps");
    for name in cases {
        suite = suite.case(TestCase::new(*name).step(TestStep::new("noop", |_s| async { Ok(()) })));
    }
    vec![suite]
}

async fn run(plan: Vec<TestSuite>, config: CoreDumpConfig, device: Arc<FakeDevice>) -> Arc<Tasker> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let tasker = Tasker::build(plan);
    let pipeline = Arc::new(Pipeline::new());
    pipeline.add(Arc::new(CoreDumpSink::new(config))).await;
    let runner = Runner::new(
        Arc::clone(&tasker),
        Arc::clone(&pipeline),
        RunnerConfig::default(),
    );
    runner.start(vec![device as Arc<dyn Device>]).await.unwrap();
    runner.join().await;
    tasker
}

fn config(abort_on_new: bool) -> CoreDumpConfig {
    CoreDumpConfig {
        dirs: vec!["/var/crash".to_string()],
        abort_on_new,
    }
}

#[tokio::test]
async fn pre_existing_dumps_are_not_reported() {
    let device = FakeDevice::new(
        "dev-a",
        &[
            "/var/crash/core.old|100.0|64",
            "/var/crash/core.old|100.0|64",
            "/var/crash/core.old|100.0|64\n/var/crash/core.new|200.0|128",
        ],
    );
    let tasker = run(plan(&["only"]), config(false), device).await;

    let results = tasker.results();
    let arena = results.lock();
    let id = arena.find("only").unwrap();
    let cores = &arena.record(id).unwrap().slots["dev-a"].cores;
    assert_eq!(cores.len(), 1);
    assert_eq!(cores[0].path, "/var/crash/core.new");
    assert_eq!(cores[0].mtime, "200.0");
    assert_eq!(cores[0].size, 128);
}

#[tokio::test]
async fn each_dump_is_assigned_to_one_case() {
    let device = FakeDevice::new(
        "dev-a",
        &[
            "",
            "",
            "/var/crash/core.a|1.0|8",
            "/var/crash/core.a|1.0|8",
            "/var/crash/core.a|1.0|8",
        ],
    );
    let tasker = run(plan(&["one", "two"]), config(false), device).await;

    let results = tasker.results();
    let arena = results.lock();
    let one = arena.find("one").unwrap();
    let two = arena.find("two").unwrap();
    assert_eq!(arena.record(one).unwrap().slots["dev-a"].cores.len(), 1);
    assert!(arena.record(two).unwrap().slots["dev-a"].cores.is_empty());
}

#[tokio::test]
async fn a_fresh_dump_can_abort_the_run() {
    let device = FakeDevice::new("dev-a", &["", "", "/var/crash/core.x|5.0|9"]);
    let tasker = run(plan(&["one", "two"]), config(true), device).await;

    let results = tasker.results();
    let arena = results.lock();
    let one = arena.find("one").unwrap();
    assert_eq!(arena.rolled_status(one), Status::NotCompleted);
    let slot = &arena.record(one).unwrap().slots["dev-a"];
    assert_eq!(slot.cores.len(), 1);
    assert!(slot.errors.iter().any(|e| e.contains("core dump")));
    let two = arena.find("two").unwrap();
    assert_eq!(arena.rolled_status(two), Status::NoRun);
}
