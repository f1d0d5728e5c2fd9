//! Values produced by a processor.
//!
//! A processor callback hands back a [`Production`]: a lazy, pull-based
//! sequence of [`Output`] values. Each value is either available right away or
//! still pending, in which case the stage waits for it before delivering
//! anything produced after it.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::core::error::Result;

/// A single produced value.
pub enum Output<T> {
    /// A value that can be delivered now
    Immediate(T),
    /// A value that becomes available once the future resolves
    Pending(LocalBoxFuture<'static, Result<T>>),
}

impl<T> Output<T> {
    /// Wrap a future as a pending output
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + 'static,
    {
        Output::Pending(future.boxed_local())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Output::Pending(_))
    }
}

impl<T: fmt::Debug> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
            Output::Pending(_) => write!(f, "Pending(..)"),
        }
    }
}

impl<T> From<T> for Output<T> {
    fn from(value: T) -> Self {
        Output::Immediate(value)
    }
}

/// A lazy, finite sequence of outputs returned from a processor callback.
pub struct Production<T> {
    iter: Box<dyn Iterator<Item = Output<T>>>,
}

impl<T: 'static> Production<T> {
    /// Create a production from any iterator of outputs
    pub fn new<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Output<T>>,
        I::IntoIter: 'static,
    {
        Self {
            iter: Box::new(iter.into_iter()),
        }
    }

    /// A production that yields nothing
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// A production of a single immediate value
    pub fn once(value: T) -> Self {
        Self::new(std::iter::once(Output::Immediate(value)))
    }

    /// A production of a single pending value
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + 'static,
    {
        Self::new(std::iter::once(Output::pending(future)))
    }

    /// A production of immediate values
    pub fn values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        Self::new(values.into_iter().map(Output::Immediate))
    }
}

impl<T> Iterator for Production<T> {
    type Item = Output<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

impl<T: 'static> From<Vec<T>> for Production<T> {
    fn from(values: Vec<T>) -> Self {
        Production::values(values)
    }
}

/// Collecting is eager: the source iterator is run to the end up front, since
/// it may borrow. Use [`Production::new`] to keep an owned iterator lazy.
impl<T: 'static> FromIterator<Output<T>> for Production<T> {
    fn from_iter<I: IntoIterator<Item = Output<T>>>(iter: I) -> Self {
        Production::new(iter.into_iter().collect::<Vec<_>>())
    }
}

/// The production currently being drained by a stage.
///
/// Values that were pending and have since resolved are put back at the front
/// so they are delivered before anything pulled from the rest.
pub(crate) struct PendingOutput<T> {
    resolved: VecDeque<T>,
    rest: Production<T>,
}

impl<T> PendingOutput<T> {
    pub(crate) fn new(rest: Production<T>) -> Self {
        Self {
            resolved: VecDeque::new(),
            rest,
        }
    }

    /// Put a value back in front of everything not yet pulled.
    pub(crate) fn push_front(&mut self, value: T) {
        self.resolved.push_front(value);
    }

    pub(crate) fn pull(&mut self) -> Option<Output<T>> {
        match self.resolved.pop_front() {
            Some(value) => Some(Output::Immediate(value)),
            None => self.rest.next(),
        }
    }
}
