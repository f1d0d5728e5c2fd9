//! Utility functions and helper types.

use std::cell::RefCell;
use std::rc::Rc;

use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};

use crate::core::{Error, ErrorReporter, Produced, Processor};

/// Helper function to create a simple processor from a function
///
/// ```rust
/// use flowtube::core::Production;
/// use flowtube::util::processor_from_fn;
///
/// let words = processor_from_fn(|line: String| {
///     let words: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
///     Ok(Some(Production::values(words)))
/// });
/// # let _ = words;
/// ```
pub fn processor_from_fn<F, T, U>(f: F) -> FnProcessor<F, T, U>
where
    F: FnMut(T) -> Produced<U> + 'static,
    T: 'static,
    U: 'static,
{
    FnProcessor {
        f,
        _phantom: std::marker::PhantomData,
    }
}

/// A processor created from a function
pub struct FnProcessor<F, T, U> {
    pub f: F,
    _phantom: std::marker::PhantomData<fn(T) -> U>,
}

impl<F, T, U> Processor for FnProcessor<F, T, U>
where
    F: FnMut(T) -> Produced<U> + 'static,
    T: 'static,
    U: 'static,
{
    type Input = T;
    type Output = U;

    fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
        (self.f)(item)
    }
}

/// Spawns continuations on the current `tokio::task::LocalSet`.
///
/// Stages wait for pending output values by spawning a local task, so they
/// must run inside `LocalSet::run_until` or a task spawned on a `LocalSet`.
/// Outside a tokio runtime, or inside one that is not driving a `LocalSet`,
/// spawning fails with a shutdown error, which a stage reports as
/// [`Error::Spawn`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl LocalSpawn for TokioSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(SpawnError::shutdown());
        }
        // tokio panics instead of returning an error when no LocalSet is running.
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            tokio::task::spawn_local(future);
        }))
        .map_err(|_| SpawnError::shutdown())
    }
}

/// Reports faults through `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &Error, context: &str) {
        tracing::error!(%error, context, "flow fault");
    }
}

/// Keeps every report in memory.
///
/// Clones share the same list, so one clone can be handed to a stage and
/// another kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct CollectReporter {
    reports: Rc<RefCell<Vec<(Error, String)>>>,
}

impl CollectReporter {
    /// Create a new collecting reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the reports received so far
    pub fn reports(&self) -> Vec<(Error, String)> {
        self.reports.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.borrow().is_empty()
    }
}

impl ErrorReporter for CollectReporter {
    fn report(&self, error: &Error, context: &str) {
        tracing::debug!(%error, context, "fault collected");
        self.reports
            .borrow_mut()
            .push((error.clone(), context.to_string()));
    }
}
