//! Per-worker receive/invoke/post loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::api::ArgumentKind;
use crate::call::{BoxedCallable, CallResult};
use crate::envelope::Envelope;
use crate::error::TaskError;

/// One message on the shared input channel.
pub(crate) enum WorkerMessage<In> {
    /// A task to execute.
    Task(Envelope<In>),
    /// Stop sentinel; each worker consumes exactly one before exiting.
    Stop,
}

pub(crate) struct WorkerRuntime<In, Out> {
    pub(crate) worker_idx: usize,
    pub(crate) callable: BoxedCallable<In, Out>,
    pub(crate) input: Receiver<WorkerMessage<In>>,
    pub(crate) output: Sender<Envelope<CallResult<Out>>>,
    pub(crate) argument_kind: ArgumentKind,
    pub(crate) task_timeout: Option<Duration>,
}

impl<In, Out> WorkerRuntime<In, Out> {
    pub(crate) fn run(mut self) {
        tracing::debug!(worker = self.worker_idx, "worker started");
        while let Ok(message) = self.input.recv() {
            let envelope = match message {
                WorkerMessage::Stop => break,
                WorkerMessage::Task(envelope) => envelope,
            };
            let outcome = self.invoke(envelope.payload);
            let posted = self.output.send(Envelope {
                index: envelope.index,
                payload: outcome,
            });
            if posted.is_err() {
                // Collector hung up; no point computing the backlog.
                break;
            }
        }
        tracing::debug!(worker = self.worker_idx, "worker stopped");
        // Channel endpoints are released here so shutdown never waits on us.
    }

    fn invoke(&mut self, payload: In) -> CallResult<Out> {
        let started = Instant::now();
        let callable = &mut self.callable;
        let kind = self.argument_kind;
        let caught = panic::catch_unwind(AssertUnwindSafe(|| match kind {
            ArgumentKind::Single => callable.call(payload),
            ArgumentKind::Positional => callable.call_positional(payload),
            ArgumentKind::Keyed => callable.call_keyed(payload),
        }));
        let outcome = match caught {
            Ok(outcome) => outcome,
            Err(panic_payload) => Err(TaskError::Panicked(panic_message(panic_payload.as_ref()))),
        };
        if let Some(limit) = self.task_timeout {
            if outcome.is_ok() && started.elapsed() > limit {
                return Err(TaskError::TimedOut(limit));
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
