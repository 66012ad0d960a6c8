#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Parallel task execution over a fixed set of worker threads.
//!
//! A [`Pool`] feeds an input iterator to its workers through a shared
//! channel and hands results back as a lazy, length-aware [`ResultStream`],
//! either in submission order or as they complete. Worker failures are
//! captured by value and routed per [`ErrorPolicy`]. Workers are plain
//! closures ([`from_fn`] and friends) or stateful [`Callable`]
//! implementations, optionally built lazily on the worker thread via
//! [`Deferred`].

pub mod api;
pub mod call;

mod engine;
mod envelope;
mod error;
mod reorder;
mod worker;

pub use api::{ArgumentKind, ErrorPolicy, PoolConfig};
pub use call::{
    CallResult, Callable, Deferred, Kwargs, WorkerSpec, from_fn, keyed, spread, try_from_fn,
};
pub use engine::{Pool, ResultStream};
pub use error::{BoxedError, ConfigError, DeferredFailures, PoolError, TaskError};
