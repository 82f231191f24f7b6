//! End-to-end scheduling over offline devices.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use dtx::{
    Pipeline, RecordingSink, Runner, RunnerConfig, Session, Status, Tasker, TestCase, TestError,
    TestStep, TestSuite,
};
use dtx_runtime::{Device, OfflineDevice};

type Log = Arc<Mutex<Vec<String>>>;

fn device(name: &str) -> Arc<dyn Device> {
    Arc::new(OfflineDevice::from_xml(name, "<accessible><path>/</path><name>root</name></accessible>").unwrap())
}

fn log_step(log: &Log, name: &str) -> TestStep {
    let log = Arc::clone(log);
    let label = name.to_string();
    TestStep::new(name, move |s: Session| {
        let log = Arc::clone(&log);
        let label = label.clone();
        async move {
            log.lock().push(format!("{label}@{}", s.device_name()));
            Ok(())
        }
    })
}

fn harness(plan: Vec<TestSuite>) -> (Arc<Tasker>, Arc<Pipeline>, Runner) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let tasker = Tasker::build(plan);
    let pipeline = Arc::new(Pipeline::new());
    let runner = Runner::new(
        Arc::clone(&tasker),
        Arc::clone(&pipeline),
        RunnerConfig::default(),
    );
    (tasker, pipeline, runner)
}

#[tokio::test]
async fn hooks_bracket_cases_and_everything_passes() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let hook = |log: &Log, label: &'static str| {
        let log = Arc::clone(log);
        move |s: Session| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{label}@{}", s.device_name()));
                Ok(())
            }
        }
    };

    let suite = TestSuite::new("regression")
        .set_up_suite(hook(&log, "setUpSuite"))
        .tear_down_suite(hook(&log, "tearDownSuite"))
        .set_up_case(hook(&log, "setUpCase"))
        .tear_down_case(hook(&log, "tearDownCase"))
        .case(
            TestCase::new("first")
                .step(log_step(&log, "s1"))
                .step(log_step(&log, "s2")),
        )
        .case(TestCase::new("second").step(log_step(&log, "s3")));

    let (tasker, _pipeline, runner) = harness(vec![suite]);
    runner.start(vec![device("dev-a")]).await.unwrap();
    runner.join().await;

    let results = tasker.results();
    let arena = results.lock();
    for name in ["first", "second"] {
        let id = arena.find(name).unwrap();
        assert_eq!(arena.rolled_status(id), Status::Passed, "case {name}");
    }
    let suite_id = arena.find("regression").unwrap();
    assert_eq!(arena.rolled_status(suite_id), Status::Passed);
    drop(arena);

    let expected: Vec<String> = [
        "setUpSuite@dev-a",
        "setUpCase@dev-a",
        "s1@dev-a",
        "s2@dev-a",
        "tearDownCase@dev-a",
        "setUpCase@dev-a",
        "s3@dev-a",
        "tearDownCase@dev-a",
        "tearDownSuite@dev-a",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(*log.lock(), expected);
}

#[tokio::test]
async fn two_devices_split_the_queue_without_duplicates() {
    let mut suite = TestSuite::new("parallel");
    for name in ["c1", "c2", "c3", "c4"] {
        suite = suite.case(TestCase::new(name).step(TestStep::new("work", |_s| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        })));
    }

    let (_tasker, pipeline, runner) = harness(vec![suite]);
    let sink = Arc::new(RecordingSink::new());
    let events = sink.events();
    pipeline.add(sink).await;

    runner.start(vec![device("dev-a"), device("dev-b")]).await.unwrap();
    runner.join().await;

    let events = events.lock();
    let starts: Vec<&String> = events.iter().filter(|e| e.starts_with("startTest")).collect();
    assert_eq!(starts.len(), 4);
    for name in ["c1", "c2", "c3", "c4"] {
        let needle = format!("startTest {name}@");
        assert_eq!(
            starts.iter().filter(|e| e.starts_with(&needle)).count(),
            1,
            "case {name} must run exactly once"
        );
    }
    assert_eq!(events.first().map(String::as_str), Some("start"));
    assert_eq!(events.last().map(String::as_str), Some("stop"));
}

#[tokio::test]
async fn fixture_failure_on_one_device_leaves_work_to_the_other() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let set_up_log = Arc::clone(&log);
    let slow_step = |log: &Log, name: &str| {
        let log = Arc::clone(log);
        let label = name.to_string();
        TestStep::new(name, move |s: Session| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                log.lock().push(format!("{label}@{}", s.device_name()));
                Ok(())
            }
        })
    };
    let suite = TestSuite::new("picky")
        .set_up_suite(move |s: Session| {
            let log = Arc::clone(&set_up_log);
            async move {
                log.lock().push(format!("setUpSuite@{}", s.device_name()));
                if s.device_name() == "dev-a" {
                    // Fail late enough that the other device is already busy
                    // inside the suite when the opening case comes back.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(TestError::fail("fixture broke"))
                } else {
                    Ok(())
                }
            }
        })
        .case(TestCase::new("one").step(slow_step(&log, "one")))
        .case(TestCase::new("two").step(slow_step(&log, "two")));

    let (tasker, _pipeline, runner) = harness(vec![suite]);
    runner.start(vec![device("dev-a"), device("dev-b")]).await.unwrap();
    runner.join().await;

    let results = tasker.results();
    let arena = results.lock();
    for name in ["one", "two"] {
        let id = arena.find(name).unwrap();
        assert_eq!(arena.rolled_status(id), Status::Passed, "case {name}");
    }
    let suite_id = arena.find("picky").unwrap();
    // The suite rolls up from its children; the broken fixture stays on the
    // dev-a slot.
    assert_eq!(arena.rolled_status(suite_id), Status::Passed);
    let suite_slot = &arena.record(suite_id).unwrap().slots["dev-a"];
    assert_eq!(suite_slot.status, Status::Failed);
    assert!(suite_slot.errors.iter().any(|e| e.contains("fixture broke")));
    drop(arena);

    let events = log.lock().clone();
    // The healthy device picks up the returned case inside the suite context
    // it already opened, so its fixtures do not fire again.
    assert_eq!(
        events.iter().filter(|e| *e == "setUpSuite@dev-b").count(),
        1,
        "suite fixtures re-ran on the healthy device"
    );
    for entry in events.iter().filter(|e| !e.starts_with("setUpSuite")) {
        assert!(entry.ends_with("@dev-b"), "unexpected execution: {entry}");
    }
}

#[tokio::test]
async fn verbose_sinks_see_step_traffic_and_quiet_ones_do_not() {
    let suite = TestSuite::new("steppy").case(
        TestCase::new("only")
            .step(TestStep::new("s1", |_s| async { Ok(()) }))
            .step(TestStep::new("s2", |_s| async { Ok(()) })),
    );

    let (_tasker, pipeline, runner) = harness(vec![suite]);
    let quiet = Arc::new(RecordingSink::new());
    let chatty = Arc::new(RecordingSink::verbose());
    let quiet_events = quiet.events();
    let chatty_events = chatty.events();
    pipeline.add(quiet).await;
    pipeline.add(chatty).await;

    runner.start(vec![device("dev-a")]).await.unwrap();
    runner.join().await;

    let expect = |entries: &[&str]| -> Vec<String> { entries.iter().map(|e| e.to_string()).collect() };
    assert_eq!(
        *quiet_events.lock(),
        expect(&["start", "startTest only@dev-a", "stopTest only@dev-a", "stop"])
    );
    assert_eq!(
        *chatty_events.lock(),
        expect(&[
            "start",
            "startTest only@dev-a",
            "startTest s1@dev-a",
            "stopTest s1@dev-a",
            "startTest s2@dev-a",
            "stopTest s2@dev-a",
            "stopTest only@dev-a",
            "stop",
        ])
    );
}

#[tokio::test]
async fn a_dropped_device_loses_only_the_case_it_was_running() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut suite = TestSuite::new("resilient").case(TestCase::new("flaky").step(
        TestStep::new("vanish", |s: Session| async move {
            let device = s.device().await?;
            device.disconnect().await;
            Err(TestError::abort("link dropped"))
        }),
    ));
    for name in ["c1", "c2", "c3"] {
        suite = suite.case(TestCase::new(name).step(log_step(&log, name)));
    }

    let (tasker, _pipeline, runner) = harness(vec![suite]);
    runner.start(vec![device("dev-a"), device("dev-b")]).await.unwrap();
    runner.join().await;

    let results = tasker.results();
    let arena = results.lock();
    let flaky = arena.find("flaky").unwrap();
    assert_eq!(arena.rolled_status(flaky), Status::NotCompleted);
    for name in ["c1", "c2", "c3"] {
        let id = arena.find(name).unwrap();
        assert_eq!(arena.rolled_status(id), Status::Passed, "case {name}");
    }
}

#[tokio::test]
async fn a_silent_disconnect_hands_queued_work_back() {
    let mut suite = TestSuite::new("handover").case(TestCase::new("quiet").step(
        TestStep::new("unplug", |s: Session| async move {
            // The device dies without the step noticing; the worker only
            // finds out at its next gate.
            let device = s.device().await?;
            device.disconnect().await;
            Ok(())
        }),
    ));
    let names = ["after-0", "after-1", "after-2", "after-3", "after-4"];
    for name in names {
        suite = suite.case(TestCase::new(name).step(TestStep::new("work", |_s| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        })));
    }

    let (tasker, pipeline, runner) = harness(vec![suite]);
    let sink = Arc::new(RecordingSink::new());
    let events = sink.events();
    pipeline.add(sink).await;

    runner.start(vec![device("dev-a"), device("dev-b")]).await.unwrap();
    runner.join().await;

    let results = tasker.results();
    let arena = results.lock();
    for name in ["quiet"].into_iter().chain(names) {
        let id = arena.find(name).unwrap();
        assert_eq!(arena.rolled_status(id), Status::Passed, "case {name}");
    }
    drop(arena);

    // The case the dying worker had already pulled went back to the queue
    // and ran exactly once on the surviving device.
    let events = events.lock();
    for name in ["quiet"].into_iter().chain(names) {
        let needle = format!("startTest {name}@");
        assert_eq!(
            events.iter().filter(|e| e.starts_with(&needle)).count(),
            1,
            "case {name} must run exactly once"
        );
    }
}

#[tokio::test]
async fn abort_skips_the_rest_and_still_tears_down() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let teardown_log = Arc::clone(&log);
    let suite = TestSuite::new("fragile")
        .tear_down_case(move |_s: Session| {
            let log = Arc::clone(&teardown_log);
            async move {
                log.lock().push("tearDownCase".to_string());
                Ok(())
            }
        })
        .case(
            TestCase::new("doomed")
                .step(log_step(&log, "before"))
                .step(TestStep::new("explode", |_s| async {
                    Err(TestError::abort("device gone"))
                }))
                .step(log_step(&log, "after")),
        )
        .case(TestCase::new("later").step(log_step(&log, "later")));

    let (tasker, _pipeline, runner) = harness(vec![suite]);
    runner.start(vec![device("dev-a")]).await.unwrap();
    runner.join().await;

    let events = log.lock().clone();
    assert!(events.iter().any(|e| e.starts_with("before")));
    assert!(events.contains(&"tearDownCase".to_string()));
    assert!(!events.iter().any(|e| e.starts_with("after")));
    assert!(!events.iter().any(|e| e.starts_with("later")));

    let results = tasker.results();
    let arena = results.lock();
    let doomed = arena.find("doomed").unwrap();
    assert_eq!(arena.rolled_status(doomed), Status::NotCompleted);
    let slot = &arena.record(doomed).unwrap().slots["dev-a"];
    assert!(slot.errors.iter().any(|e| e.contains("device gone")));
    let later = arena.find("later").unwrap();
    assert_eq!(arena.rolled_status(later), Status::NoRun);
}
