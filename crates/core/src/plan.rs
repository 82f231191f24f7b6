//! Declarative description of what to run.
//!
//! A test plan is a forest of suites; suites contain cases and sub-suites,
//! cases contain steps. Step and hook bodies are async closures taking a
//! [`Session`](crate::lock::Session), which hands out the device once the
//! worker's gate clears.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::StepResult;
use crate::lock::Session;

/// Boxed async step body.
pub type StepFn = Arc<dyn Fn(Session) -> BoxFuture<'static, StepResult> + Send + Sync>;

/// Fixture hooks share the step signature.
pub type HookFn = StepFn;

#[derive(Clone)]
pub struct TestStep {
    pub name: String,
    /// Function name recorded with the step, when it differs from `name`.
    pub func: Option<String>,
    /// Rendered arguments recorded with the step.
    pub args: Option<String>,
    pub run: StepFn,
}

impl TestStep {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = StepResult> + Send + 'static,
    {
        TestStep {
            name: name.into(),
            func: None,
            args: None,
            run: Arc::new(move |session| Box::pin(body(session))),
        }
    }

    pub fn with_func(mut self, func: impl Into<String>, args: impl Into<String>) -> Self {
        self.func = Some(func.into());
        self.args = Some(args.into());
        self
    }
}

#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub steps: Vec<TestStep>,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        TestCase {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }
}

#[derive(Clone)]
pub enum TestNode {
    Suite(TestSuite),
    Case(TestCase),
}

/// A suite groups cases and sub-suites and carries the fixture hooks that
/// bracket them. `set_up_suite` runs once per device before the first child,
/// `tear_down_suite` always runs on the way out. The case hooks bracket each
/// case, nesting outermost-first.
#[derive(Clone, Default)]
pub struct TestSuite {
    pub name: String,
    pub children: Vec<TestNode>,
    pub set_up_suite: Option<HookFn>,
    pub tear_down_suite: Option<HookFn>,
    pub set_up_case: Option<HookFn>,
    pub tear_down_case: Option<HookFn>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        TestSuite {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn case(mut self, case: TestCase) -> Self {
        self.children.push(TestNode::Case(case));
        self
    }

    pub fn suite(mut self, suite: TestSuite) -> Self {
        self.children.push(TestNode::Suite(suite));
        self
    }

    pub fn set_up_suite<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = StepResult> + Send + 'static,
    {
        self.set_up_suite = Some(Arc::new(move |session| Box::pin(body(session))));
        self
    }

    pub fn tear_down_suite<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = StepResult> + Send + 'static,
    {
        self.tear_down_suite = Some(Arc::new(move |session| Box::pin(body(session))));
        self
    }

    pub fn set_up_case<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = StepResult> + Send + 'static,
    {
        self.set_up_case = Some(Arc::new(move |session| Box::pin(body(session))));
        self
    }

    pub fn tear_down_case<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = StepResult> + Send + 'static,
    {
        self.tear_down_case = Some(Arc::new(move |session| Box::pin(body(session))));
        self
    }
}
