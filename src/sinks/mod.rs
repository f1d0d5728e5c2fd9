//! Sink implementations for the flowtube library.
//!
//! This module provides concrete consumers that terminate a pipeline.

use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::debug;

use crate::core::{Consumer, Flow, Kind, PauseToken, Producer, Result, StopReason};

/// A sink that prints items to stdout.
pub struct PrintSink<T> {
    /// The prefix to print before each item
    prefix: Option<String>,
    _phantom: PhantomData<fn(T)>,
}

impl<T> PrintSink<T> {
    /// Create a new print sink
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            prefix: None,
            _phantom: PhantomData,
        })
    }

    /// Create a new print sink with a prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            prefix: Some(prefix.into()),
            _phantom: PhantomData,
        })
    }
}

impl<T: Display + 'static> Consumer<T> for PrintSink<T> {
    fn flowing_from(self: Rc<Self>, _producer: Option<Rc<dyn Producer<T>>>) -> Result<Flow> {
        Ok(Flow::end())
    }

    fn receive(&self, item: T) {
        match &self.prefix {
            Some(prefix) => println!("{}: {}", prefix, item),
            None => println!("{}", item),
        }
    }

    fn flow_stopped(&self, reason: StopReason) {
        debug!(%reason, "print sink stopped");
    }
}

struct CollectInner<T: 'static> {
    items: RefCell<Vec<T>>,
    producer: RefCell<Option<Rc<dyn Producer<T>>>>,
    stop_reason: RefCell<Option<StopReason>>,
    stops: Cell<usize>,
    kind: Option<Kind>,
}

impl<T: 'static> Consumer<T> for CollectInner<T> {
    fn input_kind(&self) -> Option<Kind> {
        self.kind.clone()
    }

    fn flowing_from(self: Rc<Self>, producer: Option<Rc<dyn Producer<T>>>) -> Result<Flow> {
        *self.producer.borrow_mut() = producer;
        Ok(Flow::end())
    }

    fn receive(&self, item: T) {
        self.items.borrow_mut().push(item);
    }

    fn flow_stopped(&self, reason: StopReason) {
        debug!(%reason, "collect sink stopped");
        self.stops.set(self.stops.get() + 1);
        *self.stop_reason.borrow_mut() = Some(reason);
    }
}

/// A sink that collects items into a vector.
///
/// Clones share the same storage: hand [`consumer`](CollectSink::consumer) to a
/// producer and keep the sink to inspect what arrived. The sink can also pause
/// and stop whatever producer is flowing into it.
pub struct CollectSink<T: 'static> {
    inner: Rc<CollectInner<T>>,
}

impl<T: 'static> CollectSink<T> {
    /// Create a new collect sink
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a collect sink that only accepts items of `kind`
    pub fn with_kind(kind: Kind) -> Self {
        Self::build(Some(kind))
    }

    fn build(kind: Option<Kind>) -> Self {
        Self {
            inner: Rc::new(CollectInner {
                items: RefCell::new(Vec::new()),
                producer: RefCell::new(None),
                stop_reason: RefCell::new(None),
                stops: Cell::new(0),
                kind,
            }),
        }
    }

    /// The consumer side of this sink, for handing to [`Producer::flow_to`]
    pub fn consumer(&self) -> Rc<dyn Consumer<T>> {
        self.inner.clone()
    }

    /// Take the collected items, leaving the sink empty
    pub fn take_items(&self) -> Vec<T> {
        std::mem::take(&mut *self.inner.items.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Why the flow into this sink stopped, if it has
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.stop_reason.borrow().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop_reason.borrow().is_some()
    }

    /// How many times `flow_stopped` was called
    pub fn stop_count(&self) -> usize {
        self.inner.stops.get()
    }

    /// The producer currently flowing into this sink
    pub fn producer(&self) -> Option<Rc<dyn Producer<T>>> {
        self.inner.producer.borrow().clone()
    }

    /// Pause the attached producer. Returns `None` if nothing is attached.
    pub fn pause(&self) -> Option<PauseToken> {
        let producer = self.producer()?;
        Some(producer.pause_flow())
    }

    /// Ask the attached producer to stop
    pub fn stop(&self) {
        if let Some(producer) = self.producer() {
            producer.stop_flow();
        }
    }
}

impl<T: Clone + 'static> CollectSink<T> {
    /// Get a copy of the collected items
    pub fn items(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }
}

impl<T: 'static> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A sink that calls a function for every item
pub struct FnSink<F, T> {
    f: RefCell<F>,
    stop_reason: RefCell<Option<StopReason>>,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FnSink<F, T>
where
    F: FnMut(T) + 'static,
    T: 'static,
{
    /// Create a new function sink
    pub fn new(f: F) -> Rc<Self> {
        Rc::new(Self {
            f: RefCell::new(f),
            stop_reason: RefCell::new(None),
            _phantom: PhantomData,
        })
    }

    /// Why the flow into this sink stopped, if it has
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason.borrow().clone()
    }
}

impl<F, T> Consumer<T> for FnSink<F, T>
where
    F: FnMut(T) + 'static,
    T: 'static,
{
    fn flowing_from(self: Rc<Self>, _producer: Option<Rc<dyn Producer<T>>>) -> Result<Flow> {
        Ok(Flow::end())
    }

    fn receive(&self, item: T) {
        (self.f.borrow_mut())(item);
    }

    fn flow_stopped(&self, reason: StopReason) {
        *self.stop_reason.borrow_mut() = Some(reason);
    }
}
