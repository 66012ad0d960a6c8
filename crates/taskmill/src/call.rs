//! Worker callables: the calling-convention trait, closure adapters, the
//! named-argument payload map, deferred construction, and worker specs.

use std::collections::BTreeMap;

use crate::api::ArgumentKind;
use crate::error::{BoxedError, TaskError};

/// Outcome of a single callable invocation.
pub type CallResult<Out> = Result<Out, TaskError>;

pub(crate) type BoxedCallable<In, Out> = Box<dyn Callable<In, Out>>;

/// A worker callable.
///
/// Implement the method matching the [`ArgumentKind`] the pool is configured
/// with; the default bodies reject the other conventions with
/// [`TaskError::Unsupported`]. Stateful workers implement this directly and
/// keep their state in `self`; plain closures go through [`from_fn`] and
/// friends.
pub trait Callable<In, Out>: Send {
    /// Invoke with the payload passed as one value.
    fn call(&mut self, payload: In) -> CallResult<Out> {
        let _ = payload;
        Err(TaskError::Unsupported(ArgumentKind::Single))
    }

    /// Invoke with a tuple payload spread across the parameters.
    fn call_positional(&mut self, payload: In) -> CallResult<Out> {
        let _ = payload;
        Err(TaskError::Unsupported(ArgumentKind::Positional))
    }

    /// Invoke with a named-argument payload.
    fn call_keyed(&mut self, payload: In) -> CallResult<Out> {
        let _ = payload;
        Err(TaskError::Unsupported(ArgumentKind::Keyed))
    }
}

/// Adapter returned by [`from_fn`].
pub struct SingleFn<F>(F);

/// Wrap an infallible closure; the payload is passed whole.
pub fn from_fn<F>(f: F) -> SingleFn<F> {
    SingleFn(f)
}

impl<In, Out, F> Callable<In, Out> for SingleFn<F>
where
    F: FnMut(In) -> Out + Send,
{
    fn call(&mut self, payload: In) -> CallResult<Out> {
        Ok((self.0)(payload))
    }
}

/// Adapter returned by [`try_from_fn`].
pub struct TryFn<F>(F);

/// Wrap a fallible closure; the error is captured as the task failure.
pub fn try_from_fn<F>(f: F) -> TryFn<F> {
    TryFn(f)
}

impl<In, Out, E, F> Callable<In, Out> for TryFn<F>
where
    F: FnMut(In) -> Result<Out, E> + Send,
    E: Into<BoxedError>,
{
    fn call(&mut self, payload: In) -> CallResult<Out> {
        (self.0)(payload).map_err(TaskError::failed)
    }
}

/// Adapter returned by [`spread`].
pub struct SpreadFn<F>(F);

/// Wrap a closure whose parameters are filled from a tuple payload.
///
/// Supported for arities 1 through 8.
pub fn spread<F>(f: F) -> SpreadFn<F> {
    SpreadFn(f)
}

macro_rules! impl_spread {
    ($($arg:ident),+) => {
        impl<Out, Fun, $($arg),+> Callable<($($arg,)+), Out> for SpreadFn<Fun>
        where
            Fun: FnMut($($arg),+) -> Out + Send,
        {
            #[allow(non_snake_case)]
            fn call_positional(&mut self, payload: ($($arg,)+)) -> CallResult<Out> {
                let ($($arg,)+) = payload;
                Ok((self.0)($($arg),+))
            }
        }
    };
}

impl_spread!(A);
impl_spread!(A, B);
impl_spread!(A, B, C);
impl_spread!(A, B, C, D);
impl_spread!(A, B, C, D, E);
impl_spread!(A, B, C, D, E, F);
impl_spread!(A, B, C, D, E, F, G);
impl_spread!(A, B, C, D, E, F, G, H);

/// Ordered named-argument payload for the `Keyed` convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kwargs<V> {
    values: BTreeMap<String, V>,
}

impl<V> Kwargs<V> {
    /// Empty map.
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Insert a named argument, returning any previous value for the name.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        self.values.insert(name.into(), value)
    }

    /// Look up a named argument.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }

    /// Look up a named argument, failing the task when it is missing.
    pub fn require(&self, name: &str) -> CallResult<&V> {
        self.values
            .get(name)
            .ok_or_else(|| TaskError::failed(format!("missing named argument `{name}`")))
    }

    /// Number of named arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no arguments are present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V> Default for Kwargs<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(String, V)> for Kwargs<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<'a, V> FromIterator<(&'a str, V)> for Kwargs<V> {
    fn from_iter<I: IntoIterator<Item = (&'a str, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

/// Adapter returned by [`keyed`].
pub struct KeyedFn<F>(F);

/// Wrap a closure over a [`Kwargs`] payload. The closure is fallible because
/// named lookups are.
pub fn keyed<F>(f: F) -> KeyedFn<F> {
    KeyedFn(f)
}

impl<V, Out, F> Callable<Kwargs<V>, Out> for KeyedFn<F>
where
    F: FnMut(&Kwargs<V>) -> CallResult<Out> + Send,
{
    fn call_keyed(&mut self, payload: Kwargs<V>) -> CallResult<Out> {
        (self.0)(&payload)
    }
}

type BuildResult<In, Out> = Result<BoxedCallable<In, Out>, BoxedError>;

/// Defers worker construction until the first task, inside the worker.
///
/// The recorded factory runs on the worker thread, so heavyweight or
/// thread-bound worker state is built where it is used rather than where the
/// pool is assembled. A factory error fails the current task and the next
/// task retries construction.
pub struct Deferred<In, Out> {
    build: Box<dyn Fn() -> BuildResult<In, Out> + Send>,
    instance: Option<BoxedCallable<In, Out>>,
}

impl<In, Out> Deferred<In, Out> {
    /// Defer an infallible factory.
    pub fn new<C, F>(build: F) -> Self
    where
        C: Callable<In, Out> + 'static,
        F: Fn() -> C + Send + 'static,
    {
        Self {
            build: Box::new(move || Ok(Box::new(build()) as BoxedCallable<In, Out>)),
            instance: None,
        }
    }

    /// Defer a factory that can fail.
    pub fn try_new<C, E, F>(build: F) -> Self
    where
        C: Callable<In, Out> + 'static,
        E: Into<BoxedError>,
        F: Fn() -> Result<C, E> + Send + 'static,
    {
        Self {
            build: Box::new(move || match build() {
                Ok(worker) => Ok(Box::new(worker) as BoxedCallable<In, Out>),
                Err(err) => Err(err.into()),
            }),
            instance: None,
        }
    }

    fn instance(&mut self) -> CallResult<&mut BoxedCallable<In, Out>> {
        match &mut self.instance {
            Some(worker) => Ok(worker),
            slot @ None => {
                let built = (self.build)().map_err(TaskError::init)?;
                Ok(slot.insert(built))
            }
        }
    }
}

impl<In, Out> Callable<In, Out> for Deferred<In, Out> {
    fn call(&mut self, payload: In) -> CallResult<Out> {
        self.instance()?.call(payload)
    }

    fn call_positional(&mut self, payload: In) -> CallResult<Out> {
        self.instance()?.call_positional(payload)
    }

    fn call_keyed(&mut self, payload: In) -> CallResult<Out> {
        self.instance()?.call_keyed(payload)
    }
}

/// What each worker runs: one factory replicated across all workers, or an
/// ordered per-worker sequence of callables.
pub struct WorkerSpec<In, Out> {
    inner: SpecInner<In, Out>,
}

enum SpecInner<In, Out> {
    Replicated(Box<dyn Fn() -> BoxedCallable<In, Out> + Send>),
    PerWorker(Vec<BoxedCallable<In, Out>>),
}

impl<In, Out> WorkerSpec<In, Out> {
    /// Replicate one stateless callable factory across every worker.
    pub fn replicated<C, F>(make: F) -> Self
    where
        C: Callable<In, Out> + 'static,
        F: Fn() -> C + Send + 'static,
    {
        Self {
            inner: SpecInner::Replicated(Box::new(move || {
                Box::new(make()) as BoxedCallable<In, Out>
            })),
        }
    }

    /// One callable per worker; the pool adopts the sequence length as its
    /// worker count.
    pub fn per_worker<C, I>(workers: I) -> Self
    where
        C: Callable<In, Out> + 'static,
        I: IntoIterator<Item = C>,
    {
        Self {
            inner: SpecInner::PerWorker(
                workers
                    .into_iter()
                    .map(|worker| Box::new(worker) as BoxedCallable<In, Out>)
                    .collect(),
            ),
        }
    }

    pub(crate) fn len(&self) -> Option<usize> {
        match &self.inner {
            SpecInner::Replicated(_) => None,
            SpecInner::PerWorker(workers) => Some(workers.len()),
        }
    }

    pub(crate) fn into_callables(self, count: usize) -> Vec<BoxedCallable<In, Out>> {
        match self.inner {
            SpecInner::Replicated(make) => (0..count).map(|_| make()).collect(),
            SpecInner::PerWorker(workers) => workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn spread_fills_parameters_from_a_tuple() {
        let mut add = spread(|a: i32, b: i32, c: i32| a + b + c);
        assert_eq!(add.call_positional((1, 2, 3)).unwrap(), 6);
        assert!(matches!(
            add.call((1, 2, 3)),
            Err(TaskError::Unsupported(ArgumentKind::Single))
        ));
    }

    #[test]
    fn kwargs_require_reports_missing_names() {
        let kwargs: Kwargs<i32> = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(*kwargs.require("a").unwrap(), 1);
        assert_eq!(kwargs.get("missing"), None);
        assert!(matches!(
            kwargs.require("missing"),
            Err(TaskError::Failed(_))
        ));
    }

    #[test]
    fn deferred_builds_once_and_on_first_call_only() {
        let built = Arc::new(AtomicUsize::new(0));
        let built_in_factory = built.clone();
        let mut worker: Deferred<u32, u32> = Deferred::new(move || {
            built_in_factory.fetch_add(1, Ordering::SeqCst);
            from_fn(|x: u32| x + 1)
        });
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(worker.call(1).unwrap(), 2);
        assert_eq!(worker.call(5).unwrap(), 6);
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_retries_construction_after_a_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_factory = attempts.clone();
        let mut worker: Deferred<u32, u32> = Deferred::try_new(move || {
            if attempts_in_factory.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("transient setup failure".to_string())
            } else {
                Ok(from_fn(|x: u32| x * 2))
            }
        });
        assert!(matches!(worker.call(1), Err(TaskError::Init(_))));
        assert_eq!(worker.call(2).unwrap(), 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
