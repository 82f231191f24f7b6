//! Execution contexts: one worker per device, walking the task forest.
//!
//! A worker pulls cases from the tasker and enters suite contexts lazily as
//! the chain of each case demands. Suite contexts keep draining their own
//! subtree before returning, so fixtures fire once per device per suite; the
//! worker loop is the only place that waits for global completion, which
//! keeps a single worker from deadlocking inside a nested suite whose
//! remaining cases sit in a sibling.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::time::Duration;

use crate::error::{TestError, format_error};
use crate::lock::{DeviceLock, Session};
use crate::pipeline::{Pipeline, TestEvent};
use crate::result::{mark_status, record_error};
use crate::status::Status;
use crate::task::{CaseNode, SuiteNode, TaskId, Tasker};

const IDLE_POLL: Duration = Duration::from_millis(100);

struct Ctx {
    tasker: Arc<Tasker>,
    pipeline: Arc<Pipeline>,
    lock: Arc<DeviceLock>,
    debug: bool,
}

impl Ctx {
    fn session(&self) -> Session {
        Session::new(Arc::clone(&self.lock))
    }

    fn device(&self) -> &str {
        self.lock.device_name()
    }
}

/// Runs the whole forest on one device. Returns when the forest is drained,
/// the remaining work is forbidden for this device, or the device aborts.
pub async fn device_worker(
    tasker: Arc<Tasker>,
    pipeline: Arc<Pipeline>,
    lock: Arc<DeviceLock>,
    debug: bool,
) {
    let ctx = Ctx {
        tasker,
        pipeline,
        lock,
        debug,
    };
    let device = ctx.device().to_string();
    // Suites whose set-up failed on this device; their cases are left to
    // other workers.
    let mut forbidden: Vec<TaskId> = Vec::new();

    tracing::debug!(%device, "worker started");
    loop {
        if let Err(err) = ctx.lock.gate().await {
            tracing::info!(%device, error = %err, "worker stopping");
            break;
        }
        match ctx.tasker.get(None, &forbidden) {
            Some(case) => {
                let Some(root) = ctx.tasker.suite(case.chain[0]) else {
                    continue;
                };
                match run_suite(&ctx, root, Vec::new(), Some(case), &mut forbidden).await {
                    Ok(()) => {}
                    Err(TestError::Abort(reason)) => {
                        tracing::info!(%device, %reason, "worker aborted");
                        break;
                    }
                    Err(err) => {
                        // Recorded where it happened; try the rest.
                        tracing::debug!(%device, error = %err, "suite context failed");
                    }
                }
            }
            None => {
                if ctx.tasker.excluded_remaining(None, &forbidden) {
                    tracing::info!(%device, "only forbidden work remains, worker exiting");
                    break;
                }
                if ctx.tasker.join(0) {
                    tracing::debug!(%device, "forest drained, worker exiting");
                    break;
                }
                ctx.tasker.wait_change(IDLE_POLL).await;
            }
        }
    }
}

/// Enters a suite on this device: set-up, drain the subtree, tear down.
///
/// `chain` holds the enclosing suites outermost-first; `first` is the case
/// whose arrival opened this context, consumed before the queue is asked
/// again.
fn run_suite<'a>(
    ctx: &'a Ctx,
    suite: Arc<SuiteNode>,
    chain: Vec<Arc<SuiteNode>>,
    first: Option<Arc<CaseNode>>,
    forbidden: &'a mut Vec<TaskId>,
) -> BoxFuture<'a, Result<(), TestError>> {
    Box::pin(async move {
        let device = ctx.device().to_string();
        let results = ctx.tasker.results();
        let mut chain = chain;
        chain.push(Arc::clone(&suite));

        tracing::debug!(%device, suite = %suite.name, "entering suite");
        if let Some(hook) = &suite.hooks.set_up_suite {
            if let Err(err) = hook(ctx.session()).await {
                record_error(
                    &results,
                    suite.record,
                    &device,
                    format_error(&err, ctx.debug),
                    err.status(),
                );
                // This device keeps away from the suite; the opening case
                // goes back for the others.
                forbidden.push(suite.id);
                if let Some(case) = first {
                    ctx.tasker.undone(&case);
                    ctx.tasker.put(case.id);
                }
                run_tear_down_suite(ctx, &suite, &device).await?;
                return Err(err);
            }
        }

        let mut pending = first;
        let mut result = Ok(());
        loop {
            let case = match pending.take() {
                Some(case) => Some(case),
                None => ctx.tasker.get(Some(suite.id), forbidden),
            };
            let Some(case) = case else {
                // The subtree may still hold cases another worker dequeued
                // and could yet hand back. Leaving now would re-run the suite
                // fixtures if one returns, so stay until the counters drain.
                if ctx.tasker.todo(suite.id) == 0 {
                    break;
                }
                if ctx.tasker.excluded_remaining(Some(suite.id), forbidden) {
                    break;
                }
                ctx.tasker.wait_change(IDLE_POLL).await;
                continue;
            };
            let Some(position) = case.chain.iter().position(|&t| t == suite.id) else {
                continue;
            };
            let next = case.chain[position + 1];
            let outcome = if next == case.id {
                run_case(ctx, &chain, Arc::clone(&case)).await
            } else {
                match ctx.tasker.suite(next) {
                    Some(sub) => run_suite(ctx, sub, chain.clone(), Some(case), forbidden).await,
                    None => continue,
                }
            };
            match outcome {
                Ok(()) => {}
                Err(TestError::Abort(_)) => {
                    result = outcome;
                    break;
                }
                Err(err) => {
                    // A sub-suite's fixture failed; it is recorded there and
                    // forbidden now rules it out.
                    tracing::debug!(%device, suite = %suite.name, error = %err, "child context failed");
                }
            }
        }

        match run_tear_down_suite(ctx, &suite, &device).await {
            Ok(()) => {}
            Err(err) if result.is_ok() => result = Err(err),
            Err(_) => {}
        }
        result
    })
}

/// The tear-down hook runs no matter how the suite went. Only an abort
/// escalates out of it.
async fn run_tear_down_suite(
    ctx: &Ctx,
    suite: &SuiteNode,
    device: &str,
) -> Result<(), TestError> {
    let Some(hook) = &suite.hooks.tear_down_suite else {
        return Ok(());
    };
    if let Err(err) = hook(ctx.session()).await {
        record_error(
            &ctx.tasker.results(),
            suite.record,
            device,
            format_error(&err, ctx.debug),
            err.status(),
        );
        if matches!(err, TestError::Abort(_)) {
            return Err(err);
        }
    }
    Ok(())
}

async fn run_case(
    ctx: &Ctx,
    chain: &[Arc<SuiteNode>],
    case: Arc<CaseNode>,
) -> Result<(), TestError> {
    // A pause or stop takes effect before the case starts, not mid-way in.
    // The case was already dequeued; on a refused gate it goes back so the
    // remaining workers can pick it up.
    if let Err(err) = ctx.lock.gate().await {
        ctx.tasker.put(case.id);
        return Err(err);
    }
    ctx.tasker.done(&case);

    let device = ctx.device().to_string();
    let results = ctx.tasker.results();
    let clock = Instant::now();
    {
        let mut arena = results.lock();
        if let Some(slot) = arena.slot_mut(case.record, &device) {
            slot.started = Some(Utc::now());
        }
    }
    tracing::info!(%device, case = %case.name, "case started");

    let event = TestEvent {
        record: case.record,
        name: case.name.clone(),
        device: ctx.lock.device_arc(),
    };
    let mut failure: Option<TestError> = None;
    if let Err(err) = ctx.pipeline.start_test(&event).await {
        failure = Some(err);
    }

    // Case set-up, outermost suite first. `completed` caps which tear-downs
    // run on the way out.
    let mut completed = 0;
    if failure.is_none() {
        for suite in chain {
            if let Some(hook) = &suite.hooks.set_up_case {
                if let Err(err) = hook(ctx.session()).await {
                    failure = Some(err);
                    break;
                }
            }
            completed += 1;
        }
    }

    if failure.is_none() {
        for step in &case.steps {
            if let Err(err) = ctx.lock.gate().await {
                failure = Some(err);
                break;
            }
            let step_event = TestEvent {
                record: step.record,
                name: step.name.clone(),
                device: ctx.lock.device_arc(),
            };
            if let Err(err) = ctx.pipeline.start_step(&step_event).await {
                failure = Some(err);
                break;
            }
            let step_clock = Instant::now();
            {
                let mut arena = results.lock();
                if let Some(slot) = arena.slot_mut(step.record, &device) {
                    slot.started = Some(Utc::now());
                }
            }
            let outcome = (step.run)(ctx.session()).await;
            let status = match &outcome {
                Ok(()) => Status::Passed,
                Err(err) => err.status(),
            };
            {
                let mut arena = results.lock();
                if let Some(slot) = arena.slot_mut(step.record, &device) {
                    slot.elapsed = Some(step_clock.elapsed());
                    slot.status = slot.status.combine(status);
                    if let Err(err) = &outcome {
                        slot.errors.push(format_error(err, ctx.debug));
                    }
                }
            }
            match outcome {
                Ok(()) => {}
                Err(TestError::FailThis(_)) => {
                    // The step failed on its own; the case carries on but
                    // cannot pass any more.
                    mark_status(&results, case.record, &device, Status::Failed);
                }
                Err(err) => {
                    failure = Some(err);
                }
            }
            if let Err(err) = ctx.pipeline.stop_step(&step_event).await {
                if failure.is_none() {
                    failure = Some(err);
                }
            }
            if failure.is_some() {
                break;
            }
        }
    }

    // Tear-downs for every set-up that completed, innermost first.
    for suite in chain[..completed].iter().rev() {
        if let Some(hook) = &suite.hooks.tear_down_case {
            if let Err(err) = hook(ctx.session()).await {
                record_error(
                    &results,
                    case.record,
                    &device,
                    format_error(&err, ctx.debug),
                    err.status(),
                );
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        }
    }

    let status = match &failure {
        Some(err) => err.status(),
        None => Status::Passed,
    };
    {
        let mut arena = results.lock();
        if let Some(slot) = arena.slot_mut(case.record, &device) {
            slot.elapsed = Some(clock.elapsed());
            slot.status = slot.status.combine(status);
            if let Some(err) = &failure {
                slot.errors.push(format_error(err, ctx.debug));
            }
        }
    }

    if let Err(err) = ctx.pipeline.stop_test(&event).await {
        record_error(
            &results,
            case.record,
            &device,
            format_error(&err, ctx.debug),
            err.status(),
        );
        if failure.is_none() {
            failure = Some(err);
        }
    }
    tracing::info!(%device, case = %case.name, %status, "case finished");

    match failure {
        Some(err @ TestError::Abort(_)) => Err(err),
        Some(TestError::Fail(_)) => {
            // A plain failure taints the enclosing suite on this device.
            if let Some(suite) = chain.last() {
                mark_status(&results, suite.record, &device, Status::Failed);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
