//! The tasker: the shared queue every device worker draws from.
//!
//! Building a tasker freezes a plan into an id-addressed forest and seeds the
//! result arena with one record per suite, case and step. Workers then pull
//! cases with [`Tasker::get`], report completion with [`Tasker::done`], and
//! block on [`Tasker::wait_change`] when nothing is currently eligible.
//!
//! Progress is tracked per suite as the number of direct children still
//! pending. A child suite reaching zero decrements its parent, so
//! [`Tasker::join`] can answer "is the whole forest drained" by looking at
//! the roots alone.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::plan::{HookFn, StepFn, TestCase, TestNode, TestSuite};
use crate::result::{RecordId, RecordKind, ResultArena, SharedResults};

pub type TaskId = u32;

#[derive(Clone, Default)]
pub struct SuiteHooks {
    pub set_up_suite: Option<HookFn>,
    pub tear_down_suite: Option<HookFn>,
    pub set_up_case: Option<HookFn>,
    pub tear_down_case: Option<HookFn>,
}

pub struct SuiteNode {
    pub id: TaskId,
    pub parent: Option<TaskId>,
    pub name: String,
    pub record: RecordId,
    pub hooks: SuiteHooks,
}

pub struct StepEntry {
    pub name: String,
    pub record: RecordId,
    pub run: StepFn,
}

pub struct CaseNode {
    pub id: TaskId,
    pub parent: TaskId,
    /// Enclosing suite ids outermost-first, with this case's own id last.
    pub chain: Vec<TaskId>,
    pub name: String,
    pub record: RecordId,
    pub steps: Vec<StepEntry>,
}

struct Inner {
    queue: VecDeque<TaskId>,
    /// Direct children still pending, per suite.
    todo: HashMap<TaskId, usize>,
    /// Cases whose completion has been counted.
    done: HashSet<TaskId>,
}

pub struct Tasker {
    suites: HashMap<TaskId, Arc<SuiteNode>>,
    cases: HashMap<TaskId, Arc<CaseNode>>,
    roots: Vec<TaskId>,
    results: SharedResults,
    inner: Mutex<Inner>,
    changed: Notify,
}

fn case_count(suite: &TestSuite) -> usize {
    suite
        .children
        .iter()
        .map(|child| match child {
            TestNode::Case(_) => 1,
            TestNode::Suite(sub) => case_count(sub),
        })
        .sum()
}

struct Builder<'a> {
    arena: &'a mut ResultArena,
    suites: HashMap<TaskId, Arc<SuiteNode>>,
    cases: HashMap<TaskId, Arc<CaseNode>>,
    todo: HashMap<TaskId, usize>,
    next_id: TaskId,
}

impl Builder<'_> {
    fn alloc(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn add_suite(
        &mut self,
        suite: &TestSuite,
        parent: Option<TaskId>,
        parent_record: Option<RecordId>,
        chain: &[TaskId],
        order: &mut Vec<TaskId>,
    ) -> TaskId {
        let id = self.alloc();
        let record = self.arena.add(RecordKind::Suite, &suite.name, parent_record);
        let mut own_chain = chain.to_vec();
        own_chain.push(id);

        let mut pending = 0;
        for child in &suite.children {
            match child {
                TestNode::Case(case) => {
                    pending += 1;
                    self.add_case(case, id, record, &own_chain, order);
                }
                TestNode::Suite(sub) => {
                    // Suites without any case underneath are dropped outright.
                    if case_count(sub) == 0 {
                        continue;
                    }
                    pending += 1;
                    self.add_suite(sub, Some(id), Some(record), &own_chain, order);
                }
            }
        }

        self.todo.insert(id, pending);
        self.suites.insert(
            id,
            Arc::new(SuiteNode {
                id,
                parent,
                name: suite.name.clone(),
                record,
                hooks: SuiteHooks {
                    set_up_suite: suite.set_up_suite.clone(),
                    tear_down_suite: suite.tear_down_suite.clone(),
                    set_up_case: suite.set_up_case.clone(),
                    tear_down_case: suite.tear_down_case.clone(),
                },
            }),
        );
        id
    }

    fn add_case(
        &mut self,
        case: &TestCase,
        parent: TaskId,
        parent_record: RecordId,
        chain: &[TaskId],
        order: &mut Vec<TaskId>,
    ) {
        let id = self.alloc();
        let record = self.arena.add(RecordKind::Case, &case.name, Some(parent_record));
        let mut steps = Vec::new();
        for step in &case.steps {
            let step_record = self.arena.add(RecordKind::Step, &step.name, Some(record));
            if let Some(rec) = self.arena.record_mut(step_record) {
                rec.func = step.func.clone();
                rec.args = step.args.clone();
            }
            steps.push(StepEntry {
                name: step.name.clone(),
                record: step_record,
                run: Arc::clone(&step.run),
            });
        }
        let mut full_chain = chain.to_vec();
        full_chain.push(id);
        self.cases.insert(
            id,
            Arc::new(CaseNode {
                id,
                parent,
                chain: full_chain,
                name: case.name.clone(),
                record,
                steps,
            }),
        );
        order.push(id);
    }
}

impl Tasker {
    pub fn build(plan: Vec<TestSuite>) -> Arc<Tasker> {
        let results: SharedResults = Arc::new(Mutex::new(ResultArena::new()));
        let mut roots = Vec::new();
        let mut per_root: Vec<Vec<TaskId>> = Vec::new();

        let (suites, cases, todo) = {
            let mut arena = results.lock();
            let mut builder = Builder {
                arena: &mut arena,
                suites: HashMap::new(),
                cases: HashMap::new(),
                todo: HashMap::new(),
                next_id: 0,
            };
            for suite in &plan {
                if case_count(suite) == 0 {
                    tracing::warn!(suite = %suite.name, "skipping suite with no cases");
                    continue;
                }
                let mut order = Vec::new();
                let id = builder.add_suite(suite, None, None, &[], &mut order);
                roots.push(id);
                per_root.push(order);
            }
            (builder.suites, builder.cases, builder.todo)
        };

        // Interleave the roots so several devices spread across them instead
        // of all piling onto the first suite.
        let mut queue = VecDeque::new();
        let mut index = 0;
        loop {
            let mut any = false;
            for order in &per_root {
                if let Some(&id) = order.get(index) {
                    queue.push_back(id);
                    any = true;
                }
            }
            if !any {
                break;
            }
            index += 1;
        }

        Arc::new(Tasker {
            suites,
            cases,
            roots,
            results,
            inner: Mutex::new(Inner {
                queue,
                todo,
                done: HashSet::new(),
            }),
            changed: Notify::new(),
        })
    }

    pub fn results(&self) -> SharedResults {
        Arc::clone(&self.results)
    }

    pub fn roots(&self) -> &[TaskId] {
        &self.roots
    }

    pub fn suite(&self, id: TaskId) -> Option<Arc<SuiteNode>> {
        self.suites.get(&id).cloned()
    }

    /// Cases still waiting in the queue, optionally restricted to one
    /// subtree.
    pub fn count(&self, from: Option<TaskId>) -> usize {
        let inner = self.inner.lock();
        match from {
            None => inner.queue.len(),
            Some(from) => inner
                .queue
                .iter()
                .filter(|id| {
                    self.cases
                        .get(id)
                        .is_some_and(|case| case.chain.contains(&from))
                })
                .count(),
        }
    }

    /// Takes the next eligible case. With `from` set, only cases under that
    /// task qualify; any case whose chain touches `exclude` is skipped.
    pub fn get(&self, from: Option<TaskId>, exclude: &[TaskId]) -> Option<Arc<CaseNode>> {
        let mut inner = self.inner.lock();
        let position = inner.queue.iter().position(|id| {
            match self.cases.get(id) {
                Some(case) => {
                    from.is_none_or(|f| case.chain.contains(&f))
                        && !case.chain.iter().any(|t| exclude.contains(t))
                }
                None => false,
            }
        })?;
        let id = inner.queue.remove(position)?;
        self.cases.get(&id).cloned()
    }

    /// Returns a case to the queue so another worker can take it.
    pub fn put(&self, id: TaskId) {
        if self.cases.contains_key(&id) {
            self.inner.lock().queue.push_front(id);
            self.changed.notify_waiters();
        }
    }

    /// Counts a case as finished and cascades the progress up its chain.
    /// Counting is once per case, no matter how many workers report it.
    pub fn done(&self, case: &CaseNode) {
        let mut inner = self.inner.lock();
        if !inner.done.insert(case.id) {
            return;
        }
        for &suite in case.chain[..case.chain.len() - 1].iter().rev() {
            let Some(count) = inner.todo.get_mut(&suite) else {
                break;
            };
            if *count == 0 {
                break;
            }
            *count -= 1;
            if *count != 0 {
                break;
            }
            // This suite just drained; its parent loses one pending child.
        }
        drop(inner);
        self.changed.notify_waiters();
    }

    /// Reverses [`Tasker::done`] for a case being put back. A case that was
    /// never counted leaves the counters untouched.
    pub fn undone(&self, case: &CaseNode) {
        let mut inner = self.inner.lock();
        if !inner.done.remove(&case.id) {
            return;
        }
        for &suite in case.chain[..case.chain.len() - 1].iter().rev() {
            let Some(count) = inner.todo.get_mut(&suite) else {
                break;
            };
            let was_zero = *count == 0;
            *count += 1;
            if !was_zero {
                break;
            }
        }
        drop(inner);
        self.changed.notify_waiters();
    }

    /// True when every root suite has at most `threshold` pending children.
    /// `join(0)` is full completion.
    pub fn join(&self, threshold: usize) -> bool {
        let inner = self.inner.lock();
        self.roots
            .iter()
            .all(|root| inner.todo.get(root).is_none_or(|&n| n <= threshold))
    }

    /// Direct children still pending under `id`. Unknown ids read as drained.
    pub fn todo(&self, id: TaskId) -> usize {
        self.inner.lock().todo.get(&id).copied().unwrap_or(0)
    }

    /// True when the only queued cases (under `from`, or anywhere) are ones
    /// `exclude` rules out. Such a worker can leave: the work left is not for
    /// it.
    pub fn excluded_remaining(&self, from: Option<TaskId>, exclude: &[TaskId]) -> bool {
        let inner = self.inner.lock();
        let mut any = false;
        let all = inner
            .queue
            .iter()
            .filter_map(|id| self.cases.get(id))
            .filter(|case| from.is_none_or(|f| case.chain.contains(&f)))
            .all(|case| {
                any = true;
                case.chain.iter().any(|t| exclude.contains(t))
            });
        any && all
    }

    /// Parks until the queue or the counters change, or `limit` elapses.
    pub async fn wait_change(&self, limit: Duration) {
        let _ = tokio::time::timeout(limit, self.changed.notified()).await;
    }

    /// Wakes every parked waiter without a state change.
    pub fn kick(&self) {
        self.changed.notify_waiters();
    }
}
