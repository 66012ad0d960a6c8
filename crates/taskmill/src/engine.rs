//! The dispatch/collection engine: pool construction, the chunked credit
//! scheme, failure-policy routing, ordered reassembly, and shutdown.

use std::cmp;
use std::collections::VecDeque;
use std::iter::Fuse;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::api::{ErrorPolicy, PoolConfig};
use crate::call::{CallResult, WorkerSpec};
use crate::envelope::Envelope;
use crate::error::{ConfigError, DeferredFailures, PoolError, TaskError};
use crate::reorder::ReorderBuffer;
use crate::worker::{WorkerMessage, WorkerRuntime};

/// Poll interval while waiting out the join grace period.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Receive timeout used when emptying the input channel during an abort.
const ABORT_DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// A fixed set of worker threads consuming tasks from a shared channel.
///
/// Workers start at construction and live until the pool is closed or
/// dropped. [`Pool::run`] borrows the pool for the lifetime of its
/// [`ResultStream`], so invocations cannot overlap; exhausting or dropping
/// the stream shuts the pool down.
pub struct Pool<In, Out> {
    cfg: PoolConfig,
    input_tx: Sender<WorkerMessage<In>>,
    input_rx: Receiver<WorkerMessage<In>>,
    output_rx: Receiver<Envelope<CallResult<Out>>>,
    handles: Vec<JoinHandle<()>>,
    closed: bool,
}

impl<In, Out> Pool<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Build a pool and start its workers.
    pub fn new(spec: WorkerSpec<In, Out>, config: PoolConfig) -> Result<Self, ConfigError> {
        let mut cfg = config;
        if let Some(provided) = spec.len() {
            if cfg.workers != 0 && cfg.workers != provided {
                return Err(ConfigError::WorkerCountMismatch {
                    requested: cfg.workers,
                    provided,
                });
            }
            cfg.workers = provided;
        }
        cfg.normalize();
        if cfg.task_timeout.is_some() {
            tracing::warn!(
                "task_timeout is best-effort only: a callable that blocks past the deadline cannot be preempted"
            );
        }

        let (input_tx, input_rx) = unbounded();
        let (output_tx, output_rx) = unbounded();

        let mut handles = Vec::with_capacity(cfg.workers);
        for (worker_idx, callable) in spec.into_callables(cfg.workers).into_iter().enumerate() {
            let runtime = WorkerRuntime {
                worker_idx,
                callable,
                input: input_rx.clone(),
                output: output_tx.clone(),
                argument_kind: cfg.argument_kind,
                task_timeout: cfg.task_timeout,
            };
            let handle = thread::Builder::new()
                .name(format!("taskmill-worker-{worker_idx}"))
                .spawn(move || runtime.run())?;
            handles.push(handle);
        }
        drop(output_tx);

        Ok(Self {
            cfg,
            input_tx,
            input_rx,
            output_rx,
            handles,
            closed: false,
        })
    }

    /// Dispatch `input` across the workers, returning the result stream.
    ///
    /// The stream yields one `Result` per pulled item; see [`ErrorPolicy`]
    /// for how task failures surface. Once the stream has run (or been
    /// dropped), the pool is shut down and further calls fail with
    /// [`PoolError::Closed`].
    pub fn run<I>(&mut self, input: I) -> Result<ResultStream<'_, In, Out, I::IntoIter>, PoolError>
    where
        I: IntoIterator<Item = In>,
    {
        if self.closed {
            return Err(PoolError::Closed);
        }
        let iter = input.into_iter();
        let expected_len = match iter.size_hint() {
            (lo, Some(hi)) if lo == hi => Some(lo),
            _ => None,
        };
        Ok(ResultStream {
            input: iter.fuse(),
            expected_len,
            yielded: 0,
            submitted: 0,
            received: 0,
            input_done: false,
            reorder: ReorderBuffer::new(),
            ready: VecDeque::new(),
            deferred: Vec::new(),
            phase: Phase::Submit { first: true },
            pool: self,
        })
    }
}

impl<In, Out> Pool<In, Out> {
    /// Resolved worker count.
    pub fn workers(&self) -> usize {
        self.cfg.workers
    }

    /// True once stop sentinels have been sent.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Ask workers to stop once the queued work is consumed.
    ///
    /// Idempotent: only the first call emits stop sentinels, one per worker.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for _ in 0..self.cfg.workers {
            let _ = self.input_tx.send(WorkerMessage::Stop);
        }
        tracing::debug!(workers = self.cfg.workers, "stop sentinels sent");
    }

    /// Discard queued tasks, stop workers, and join them. Runs when an
    /// invocation ends early: a policy abort or an abandoned stream.
    fn abort(&mut self) {
        if !self.closed {
            self.drain_input();
        }
        self.close();
        self.join_workers();
    }

    /// Empty the input channel so workers reach a stop sentinel without
    /// chewing through the backlog first.
    fn drain_input(&mut self) {
        let mut discarded = 0usize;
        while self.input_rx.recv_timeout(ABORT_DRAIN_TIMEOUT).is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "queued tasks discarded");
        }
    }

    /// Join workers, waiting at most the configured grace period overall.
    /// Threads cannot be force-killed, so stragglers are abandoned.
    fn join_workers(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let deadline = self.cfg.join_timeout.map(|grace| Instant::now() + grace);
        for handle in self.handles.drain(..) {
            match deadline {
                None => {
                    let _ = handle.join();
                }
                Some(deadline) => {
                    while !handle.is_finished() && Instant::now() < deadline {
                        thread::sleep(JOIN_POLL_INTERVAL);
                    }
                    if handle.is_finished() {
                        let _ = handle.join();
                    } else {
                        tracing::warn!(
                            worker = handle.thread().name().unwrap_or("<unnamed>"),
                            "worker did not stop within the join grace period; abandoning it"
                        );
                    }
                }
            }
        }
    }
}

impl<In, Out> Drop for Pool<In, Out> {
    fn drop(&mut self) {
        self.close();
        self.join_workers();
    }
}

#[derive(Clone, Copy)]
enum Phase {
    /// Submit the next burst, then schedule a collection round.
    Submit { first: bool },
    /// `left` blocking receives remain in this round.
    Collect { left: usize },
    /// Input exhausted and every result received: shut down and settle up.
    Settle,
    /// Nothing further; the stream is spent.
    Finished,
}

/// Lazy, length-aware stream of task results.
///
/// The stream drives the engine: submissions and receives happen as the
/// caller pulls. Exhausting it closes the pool; dropping it early aborts the
/// invocation, discarding queued tasks, and shuts the pool down.
pub struct ResultStream<'pool, In, Out, I> {
    pool: &'pool mut Pool<In, Out>,
    input: Fuse<I>,
    expected_len: Option<usize>,
    yielded: usize,
    submitted: usize,
    received: usize,
    input_done: bool,
    reorder: ReorderBuffer<CallResult<Out>>,
    ready: VecDeque<Result<Out, PoolError>>,
    deferred: Vec<(usize, TaskError)>,
    phase: Phase,
}

impl<In, Out, I> ResultStream<'_, In, Out, I>
where
    I: Iterator<Item = In>,
{
    /// Number of results this invocation corresponds to, when the input
    /// advertised an exact size.
    pub fn expected_len(&self) -> Option<usize> {
        self.expected_len
    }

    fn submit_burst(&mut self, first: bool) {
        let cfg = &self.pool.cfg;
        let burst = if !cfg.bounded {
            usize::MAX
        } else if first && cfg.unordered {
            cfg.chunk_size.saturating_mul(cfg.prefill_ratio)
        } else {
            cfg.chunk_size
        };
        let mut budget = burst;
        while budget > 0 && !self.input_done {
            match self.input.next() {
                Some(payload) => {
                    let envelope = Envelope {
                        index: self.submitted,
                        payload,
                    };
                    let _ = self.pool.input_tx.send(WorkerMessage::Task(envelope));
                    self.submitted += 1;
                    budget -= 1;
                }
                None => self.input_done = true,
            }
        }
        debug_assert!(self.expected_len.is_none_or(|len| self.submitted <= len));
    }

    /// One blocking receive, routed per the failure policy.
    fn receive_one(&mut self) {
        let envelope = match self.pool.output_rx.recv() {
            Ok(envelope) => envelope,
            Err(_) => {
                self.pool.abort();
                self.ready.push_back(Err(PoolError::Disconnected));
                self.phase = Phase::Finished;
                return;
            }
        };
        self.received += 1;
        debug_assert!(self.received <= self.submitted);
        match envelope.payload {
            Err(error) if self.pool.cfg.error_policy == ErrorPolicy::Immediate => {
                // Results already reassembled but not yet yielded are dropped
                // along with the queued backlog.
                self.pool.abort();
                self.ready.push_back(Err(PoolError::Task {
                    index: envelope.index,
                    source: error,
                }));
                self.phase = Phase::Finished;
            }
            outcome => {
                if self.pool.cfg.unordered {
                    self.emit(envelope.index, outcome);
                } else {
                    self.reorder.offer(envelope.index, outcome);
                    while let Some((index, ready)) = self.reorder.pop_ready() {
                        self.emit(index, ready);
                    }
                }
            }
        }
    }

    fn emit(&mut self, index: usize, outcome: CallResult<Out>) {
        match outcome {
            Ok(value) => self.ready.push_back(Ok(value)),
            Err(error) => match self.pool.cfg.error_policy {
                ErrorPolicy::Ignore => self.ready.push_back(Err(PoolError::Task {
                    index,
                    source: error,
                })),
                // Collected now, raised once the stream is drained.
                ErrorPolicy::Deferred => self.deferred.push((index, error)),
                // Immediate failures abort before reaching the reassembler.
                ErrorPolicy::Immediate => {}
            },
        }
    }

    fn settle(&mut self) {
        debug_assert!(self.reorder.is_empty());
        self.pool.close();
        self.pool.join_workers();
        if !self.deferred.is_empty() {
            let failures = DeferredFailures::new(std::mem::take(&mut self.deferred));
            self.ready.push_back(Err(PoolError::Deferred(failures)));
        }
        self.phase = Phase::Finished;
    }
}

impl<In, Out, I> Iterator for ResultStream<'_, In, Out, I>
where
    I: Iterator<Item = In>,
{
    type Item = Result<Out, PoolError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                self.yielded += 1;
                return Some(item);
            }
            match self.phase {
                Phase::Finished => return None,
                Phase::Submit { first } => {
                    if self.input_done && self.received == self.submitted {
                        self.phase = Phase::Settle;
                        continue;
                    }
                    self.submit_burst(first);
                    let take = cmp::min(self.pool.cfg.chunk_size, self.submitted - self.received);
                    self.phase = Phase::Collect { left: take };
                }
                Phase::Collect { left: 0 } => {
                    self.phase = Phase::Submit { first: false };
                }
                Phase::Collect { left } => {
                    self.phase = Phase::Collect { left: left - 1 };
                    self.receive_one();
                }
                Phase::Settle => self.settle(),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.expected_len {
            Some(len) => {
                let left = len.saturating_sub(self.yielded);
                match self.pool.cfg.error_policy {
                    ErrorPolicy::Ignore => (left, Some(left)),
                    // Short under Immediate, one composite extra under Deferred.
                    _ => (0, Some(left.saturating_add(1))),
                }
            }
            None => (0, None),
        }
    }
}

impl<In, Out, I> Drop for ResultStream<'_, In, Out, I> {
    fn drop(&mut self) {
        if !matches!(self.phase, Phase::Finished) {
            self.pool.abort();
        }
    }
}
