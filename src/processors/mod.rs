//! Processor implementations for the flowtube library.
//!
//! This module provides concrete processors that transform items flowing
//! through a stage.

use std::future::Future;
use std::marker::PhantomData;

use crate::core::{Produced, Processor, Production, Result, StopReason};

/// A processor that maps items using a function.
pub struct MapProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> MapProcessor<F, T, U>
where
    F: FnMut(T) -> U,
{
    /// Create a new map processor
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, U> Processor for MapProcessor<F, T, U>
where
    F: FnMut(T) -> U + 'static,
    T: 'static,
    U: 'static,
{
    type Input = T;
    type Output = U;

    fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
        Ok(Some(Production::once((self.f)(item))))
    }
}

/// A processor that filters items using a predicate.
///
/// This processor only passes items that satisfy the predicate.
pub struct FilterProcessor<F, T> {
    predicate: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FilterProcessor<F, T>
where
    F: FnMut(&T) -> bool,
{
    /// Create a new filter processor
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Processor for FilterProcessor<F, T>
where
    F: FnMut(&T) -> bool + 'static,
    T: 'static,
{
    type Input = T;
    type Output = T;

    fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
        if (self.predicate)(&item) {
            Ok(Some(Production::once(item)))
        } else {
            Ok(None)
        }
    }
}

/// A processor that maps items through an asynchronous function.
///
/// Each result is produced as a pending value, so the stage holds back
/// everything after it until it resolves and order is preserved.
pub struct ThenProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> ThenProcessor<F, T, U> {
    /// Create a new async map processor
    pub fn new<Fut>(f: F) -> Self
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<U>>,
    {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut, T, U> Processor for ThenProcessor<F, T, U>
where
    F: FnMut(T) -> Fut + 'static,
    Fut: Future<Output = Result<U>> + 'static,
    T: 'static,
    U: 'static,
{
    type Input = T;
    type Output = U;

    fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
        Ok(Some(Production::pending((self.f)(item))))
    }
}

/// A processor that batches items.
///
/// Whatever is left over when upstream stops is flushed as a final, smaller
/// batch.
pub struct BatchProcessor<T> {
    batch_size: usize,
    batch: Vec<T>,
}

impl<T> BatchProcessor<T> {
    /// Create a new batch processor
    pub fn new(batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be at least 1");
        Self {
            batch_size,
            batch: Vec::with_capacity(batch_size),
        }
    }
}

impl<T: 'static> Processor for BatchProcessor<T> {
    type Input = T;
    type Output = Vec<T>;

    fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
        self.batch.push(item);

        if self.batch.len() >= self.batch_size {
            let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
            Ok(Some(Production::once(batch)))
        } else {
            Ok(None)
        }
    }

    fn stopped(&mut self, _reason: &StopReason) -> Produced<Self::Output> {
        if self.batch.is_empty() {
            Ok(None)
        } else {
            let batch = std::mem::take(&mut self.batch);
            Ok(Some(Production::once(batch)))
        }
    }
}

/// A processor that passes on only the first N items
pub struct TakeProcessor<T> {
    remaining: usize,
    _phantom: PhantomData<fn(T)>,
}

impl<T> TakeProcessor<T> {
    /// Create a new take processor
    pub fn new(count: usize) -> Self {
        Self {
            remaining: count,
            _phantom: PhantomData,
        }
    }
}

impl<T: 'static> Processor for TakeProcessor<T> {
    type Input = T;
    type Output = T;

    fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Ok(Some(Production::once(item)))
        } else {
            Ok(None)
        }
    }
}

/// A processor that passes items through unchanged
pub struct NoOpProcessor<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> NoOpProcessor<T> {
    /// Create a new no-op processor
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for NoOpProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Processor for NoOpProcessor<T> {
    type Input = T;
    type Output = T;

    fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
        Ok(Some(Production::once(item)))
    }
}
