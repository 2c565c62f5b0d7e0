//! Ordered, fail-fast execution of asynchronous steps.
//!
//! A [`Pipeline`] owns a queue of steps and runs them one at a time against a
//! shared context. A step reports a [`StepOutcome`]; success moves on to the
//! next step, failure halts the pipeline and discards the rest of the queue.
//! There is no retry and no resume.
//!
//! Steps written in callback style receive a [`Continuation`] that must be
//! consumed exactly once. Dropping it without calling it fails the step.
//!
//! ```rust
//! use listform::pipeline::{step_async, Pipeline, PipelineState, StepOutcome};
//!
//! # tokio_test::block_on(async {
//! let mut log: Vec<String> = Vec::new();
//! let mut pipeline = Pipeline::new("example")
//!     .then(step_async("first", |log: &mut Vec<String>| {
//!         Box::pin(async move {
//!             log.push("first".to_string());
//!             StepOutcome::advance()
//!         })
//!     }))
//!     .then(step_async("second", |log: &mut Vec<String>| {
//!         Box::pin(async move {
//!             log.push("second".to_string());
//!             StepOutcome::advance()
//!         })
//!     }));
//!
//! assert_eq!(pipeline.run(&mut log).await, PipelineState::Completed);
//! assert_eq!(log, vec!["first", "second"]);
//! # });
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Result reported by one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepOutcome {
    pub success: bool,
    pub message: Option<String>,
    pub payload: Option<Value>,
}

impl StepOutcome {
    pub fn advance() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn advance_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// Lifecycle of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running,
    HaltedFailure,
    Completed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::HaltedFailure => "halted_failure",
            PipelineState::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::HaltedFailure | PipelineState::Completed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work in a pipeline.
#[async_trait]
pub trait Step<C>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut C) -> StepOutcome;
}

/// Extension methods for steps.
pub trait StepExt<C>: Step<C> + Sized + 'static {
    /// Fail the step if it does not finish within `limit`.
    fn with_timeout(self, limit: Duration) -> WithTimeout<C> {
        WithTimeout::new(Box::new(self), limit)
    }
}

impl<C: Send, S: Step<C> + 'static> StepExt<C> for S {}

/// Completion handle for callback-style steps.
///
/// Consuming methods take `self`, so a step can signal at most once.
#[derive(Debug)]
pub struct Continuation {
    tx: oneshot::Sender<StepOutcome>,
}

impl Continuation {
    pub fn advance(self) {
        self.finish(StepOutcome::advance());
    }

    pub fn advance_with(self, message: impl Into<String>) {
        self.finish(StepOutcome::advance_with(message));
    }

    pub fn fail(self, message: impl Into<String>) {
        self.finish(StepOutcome::fail(message));
    }

    pub fn finish(self, outcome: StepOutcome) {
        // The pipeline only drops the receiver once it stopped waiting.
        let _ = self.tx.send(outcome);
    }
}

/// Message recorded when a callback step drops its continuation.
pub const DROPPED_CONTINUATION: &str = "step dropped its continuation";

/// Step built from a closure that returns a boxed future.
pub struct AsyncFnStep<F> {
    name: String,
    f: F,
}

/// Build a step from an async closure over the context.
pub fn step_async<C, F>(name: impl Into<String>, f: F) -> AsyncFnStep<F>
where
    C: Send,
    F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StepOutcome> + Send + Sync,
{
    AsyncFnStep {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<C, F> Step<C> for AsyncFnStep<F>
where
    C: Send,
    F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StepOutcome> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut C) -> StepOutcome {
        (self.f)(ctx).await
    }
}

/// Step built from a closure that signals through a [`Continuation`].
pub struct CallbackStep<F> {
    name: String,
    f: F,
}

/// Build a callback-style step. The closure may hand the continuation to a
/// spawned task; the pipeline waits until it is consumed or dropped.
pub fn step_callback<C, F>(name: impl Into<String>, f: F) -> CallbackStep<F>
where
    C: Send,
    F: Fn(&mut C, Continuation) + Send + Sync,
{
    CallbackStep {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<C, F> Step<C> for CallbackStep<F>
where
    C: Send,
    F: Fn(&mut C, Continuation) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut C) -> StepOutcome {
        let (tx, rx) = oneshot::channel();
        (self.f)(ctx, Continuation { tx });
        rx.await
            .unwrap_or_else(|_| StepOutcome::fail(DROPPED_CONTINUATION))
    }
}

/// Fails the wrapped step when it overruns its time limit.
pub struct WithTimeout<C> {
    inner: Box<dyn Step<C>>,
    limit: Duration,
}

impl<C> WithTimeout<C> {
    pub fn new(inner: Box<dyn Step<C>>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<C: Send> Step<C> for WithTimeout<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &mut C) -> StepOutcome {
        match tokio::time::timeout(self.limit, self.inner.run(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => StepOutcome::fail(format!(
                "{} timed out after {} ms",
                self.inner.name(),
                self.limit.as_millis()
            )),
        }
    }
}

type Hook = Box<dyn FnMut(&StepOutcome) + Send>;

/// An ordered queue of steps sharing one context.
pub struct Pipeline<C> {
    name: String,
    steps: VecDeque<Box<dyn Step<C>>>,
    state: PipelineState,
    step_timeout: Option<Duration>,
    on_each_advance: Option<Hook>,
    on_failure: Option<Hook>,
    on_completion: Option<Hook>,
    completed: Vec<String>,
    last: Option<StepOutcome>,
}

impl<C: Send + 'static> Pipeline<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: VecDeque::new(),
            state: PipelineState::Idle,
            step_timeout: None,
            on_each_advance: None,
            on_failure: None,
            on_completion: None,
            completed: Vec::new(),
            last: None,
        }
    }

    /// Append a step.
    pub fn then(mut self, step: impl Step<C> + 'static) -> Self {
        self.push(Box::new(step));
        self
    }

    /// Append a boxed step.
    pub fn push(&mut self, step: Box<dyn Step<C>>) {
        self.steps.push_back(step);
    }

    /// Apply a time limit to every step. Off by default.
    pub fn with_step_timeout(mut self, limit: Option<Duration>) -> Self {
        self.step_timeout = limit;
        self
    }

    /// Called after every step, successful or not.
    pub fn on_each_advance(mut self, hook: impl FnMut(&StepOutcome) + Send + 'static) -> Self {
        self.on_each_advance = Some(Box::new(hook));
        self
    }

    /// Called once when a step fails.
    pub fn on_failure(mut self, hook: impl FnMut(&StepOutcome) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Called once when the last step succeeds.
    pub fn on_completion(mut self, hook: impl FnMut(&StepOutcome) + Send + 'static) -> Self {
        self.on_completion = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Steps still queued.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps that succeeded, in order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed
    }

    /// Outcome of the most recent step.
    pub fn last_outcome(&self) -> Option<&StepOutcome> {
        self.last.as_ref()
    }

    /// Run the queue to completion or first failure.
    ///
    /// A pipeline runs once; later calls return the terminal state.
    pub async fn run(&mut self, ctx: &mut C) -> PipelineState {
        if self.state != PipelineState::Idle {
            debug!(pipeline = %self.name, state = %self.state, "Pipeline already ran");
            return self.state;
        }

        self.state = PipelineState::Running;
        info!(pipeline = %self.name, steps = self.steps.len(), "Pipeline started");

        while let Some(step) = self.steps.pop_front() {
            let step: Box<dyn Step<C>> = match self.step_timeout {
                Some(limit) => Box::new(WithTimeout::new(step, limit)),
                None => step,
            };
            let step_name = step.name().to_string();
            debug!(pipeline = %self.name, step = %step_name, "Running step");

            let outcome = step.run(ctx).await;
            if let Some(hook) = self.on_each_advance.as_mut() {
                hook(&outcome);
            }

            if !outcome.success {
                let discarded = self.steps.len();
                self.steps.clear();
                self.state = PipelineState::HaltedFailure;
                warn!(
                    pipeline = %self.name,
                    step = %step_name,
                    discarded,
                    "Pipeline halted: {}",
                    outcome.message()
                );
                if let Some(hook) = self.on_failure.as_mut() {
                    hook(&outcome);
                }
                self.last = Some(outcome);
                return self.state;
            }

            self.completed.push(step_name);
            self.last = Some(outcome);
        }

        self.state = PipelineState::Completed;
        info!(pipeline = %self.name, steps = self.completed.len(), "Pipeline completed");
        let outcome = self.last.clone().unwrap_or_else(StepOutcome::advance);
        if let Some(hook) = self.on_completion.as_mut() {
            hook(&outcome);
        }
        self.state
    }
}
