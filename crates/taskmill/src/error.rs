//! Error taxonomy: failures captured by value from worker callables,
//! synchronous construction failures, and everything surfaced through the
//! result stream.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::api::ArgumentKind;

/// Boxed error type used to capture arbitrary callable failures by value.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// A failure captured from a worker callable, carried across the output
/// channel by value.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The callable returned an error.
    #[error("worker callable failed: {0}")]
    Failed(BoxedError),
    /// The callable panicked.
    #[error("worker callable panicked: {0}")]
    Panicked(String),
    /// Deferred worker construction failed.
    #[error("worker construction failed: {0}")]
    Init(BoxedError),
    /// The callable does not implement the configured calling convention.
    #[error("callable does not accept {0} payloads")]
    Unsupported(ArgumentKind),
    /// The callable returned only after the soft task timeout had expired.
    #[error("task overran the {0:?} soft timeout")]
    TimedOut(Duration),
}

impl TaskError {
    /// Capture an arbitrary error value as a task failure.
    pub fn failed(err: impl Into<BoxedError>) -> Self {
        TaskError::Failed(err.into())
    }

    pub(crate) fn init(err: impl Into<BoxedError>) -> Self {
        TaskError::Init(err.into())
    }
}

/// Invalid pool construction, reported synchronously by
/// [`Pool::new`](crate::Pool::new).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A per-worker spec length disagrees with the configured worker count.
    #[error("worker spec provides {provided} workers but the configuration asks for {requested}")]
    WorkerCountMismatch {
        /// Worker count from the configuration.
        requested: usize,
        /// Length of the per-worker spec.
        provided: usize,
    },
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures surfaced through the result stream.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A task failed; yielded under the `Ignore` and `Immediate` policies.
    #[error("task {index} failed: {source}")]
    Task {
        /// Submission index of the failing task.
        index: usize,
        /// The captured failure.
        source: TaskError,
    },
    /// Every failure collected under the `Deferred` policy, raised once the
    /// stream is otherwise drained.
    #[error(transparent)]
    Deferred(DeferredFailures),
    /// The pool has already been shut down.
    #[error("pool is closed")]
    Closed,
    /// Workers disappeared while results were still owed.
    #[error("output channel disconnected before all results were received")]
    Disconnected,
}

/// The composite failure raised by the `Deferred` policy.
#[derive(Debug)]
pub struct DeferredFailures {
    failures: Vec<(usize, TaskError)>,
}

impl DeferredFailures {
    pub(crate) fn new(mut failures: Vec<(usize, TaskError)>) -> Self {
        failures.sort_by_key(|(index, _)| *index);
        Self { failures }
    }

    /// Number of collected failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True when nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// The collected failures with their submission indices, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TaskError)> {
        self.failures.iter().map(|(index, err)| (*index, err))
    }

    /// Consume the composite, returning the collected failures.
    pub fn into_inner(self) -> Vec<(usize, TaskError)> {
        self.failures
    }
}

impl fmt::Display for DeferredFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.failures.len())?;
        if let Some((index, first)) = self.failures.first() {
            write!(f, "; first at index {index}: {first}")?;
        }
        Ok(())
    }
}

impl StdError for DeferredFailures {}
