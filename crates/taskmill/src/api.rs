//! Public configuration types for the worker pool.

use std::fmt;
use std::time::Duration;

/// How a payload is handed to the worker callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgumentKind {
    /// The payload is passed to the callable as one opaque value.
    #[default]
    Single,
    /// The payload is a tuple spread across the callable's parameters.
    Positional,
    /// The payload is a [`Kwargs`](crate::Kwargs) map of named arguments.
    Keyed,
}

impl fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgumentKind::Single => "single",
            ArgumentKind::Positional => "positional",
            ArgumentKind::Keyed => "keyed",
        };
        f.write_str(name)
    }
}

/// What the result stream does when a worker callable fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Failures are yielded in place as ordinary stream items.
    Ignore,
    /// The first failure aborts the invocation: queued tasks are discarded,
    /// workers are stopped, and the failure ends the stream.
    #[default]
    Immediate,
    /// Failures are collected silently and raised together, in submission
    /// order, once every remaining result has been drained.
    Deferred,
}

/// Configuration for a [`Pool`](crate::Pool).
///
/// Zero-valued numeric fields resolve to their defaults when the pool is
/// built.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker count. `0` resolves to the available parallelism. Overridden
    /// by the sequence length when the worker spec is per-worker.
    pub workers: usize,

    /// Calling convention used to invoke worker callables.
    pub argument_kind: ArgumentKind,

    /// Failure-handling discipline for the result stream.
    pub error_policy: ErrorPolicy,

    /// When true, in-flight tasks are capped by the chunked credit scheme.
    /// When false, the whole input is submitted before collection starts.
    pub bounded: bool,

    /// Tasks submitted (and results collected) per round. `0` resolves to
    /// the worker count.
    pub chunk_size: usize,

    /// Multiplier widening the initial submission burst for unordered
    /// streams, so workers stay busy past the straggler tail. `0` resolves
    /// to [`PoolConfig::DEFAULT_PREFILL_RATIO`].
    pub prefill_ratio: usize,

    /// Yield results as they complete instead of in submission order.
    pub unordered: bool,

    /// Soft per-task timeout.
    ///
    /// Deprecated knob: a running callable cannot be preempted, so the
    /// deadline is only checked once an invocation returns. Prefer callables
    /// that respect their own deadlines.
    pub task_timeout: Option<Duration>,

    /// Grace period when joining workers at shutdown; workers still running
    /// past it are abandoned with a logged warning. `None` waits for them.
    pub join_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            argument_kind: ArgumentKind::Single,
            error_policy: ErrorPolicy::Immediate,
            bounded: true,
            chunk_size: 0,
            prefill_ratio: 0,
            unordered: false,
            task_timeout: None,
            join_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Default initial-burst multiplier for unordered streams.
    pub const DEFAULT_PREFILL_RATIO: usize = 2;

    pub(crate) fn normalize(&mut self) {
        if self.workers == 0 {
            self.workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }
        if self.chunk_size == 0 {
            self.chunk_size = self.workers;
        }
        if self.prefill_ratio == 0 {
            self.prefill_ratio = Self::DEFAULT_PREFILL_RATIO;
        }
    }
}
