//! Source implementations for the flowtube library.
//!
//! This module provides concrete producers that feed items into a pipeline.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::task::{LocalSpawn, LocalSpawnExt};
use futures_core::Stream;
use tokio::sync::Notify;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::kind::check_compatible;
use crate::core::{Consumer, Error, Flow, Kind, PauseToken, Pauser, Producer, Result, StopReason};
use crate::util::TokioSpawner;

/// A producer that delivers the items of an iterator.
///
/// Items are delivered synchronously from [`flow_to`](Producer::flow_to) and
/// from the resume of the last outstanding pause, for as long as the consumer
/// does not pause. When the iterator runs out the consumer is told the flow
/// has [`Finished`](StopReason::Finished).
pub struct IteratorSource<I: Iterator>
where
    I::Item: 'static,
{
    items: RefCell<I>,
    consumer: RefCell<Option<Rc<dyn Consumer<I::Item>>>>,
    pauser: Pauser,
    kind: Option<Kind>,
    delivering: Cell<bool>,
    done: Cell<bool>,
    delivered: Cell<usize>,
}

impl<I> IteratorSource<I>
where
    I: Iterator + 'static,
    I::Item: 'static,
{
    /// Create a new iterator source
    pub fn new(items: impl IntoIterator<IntoIter = I>) -> Rc<Self> {
        Self::build(items.into_iter(), None)
    }

    /// Create an iterator source that declares the kind of its items
    pub fn with_kind(items: impl IntoIterator<IntoIter = I>, kind: Kind) -> Rc<Self> {
        Self::build(items.into_iter(), Some(kind))
    }

    fn build(items: I, kind: Option<Kind>) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            let pauser = Pauser::new(
                || {},
                move || {
                    if let Some(source) = this.upgrade() {
                        source.deliver();
                    }
                },
            );
            Self {
                items: RefCell::new(items),
                consumer: RefCell::new(None),
                pauser,
                kind,
                delivering: Cell::new(false),
                done: Cell::new(false),
                delivered: Cell::new(0),
            }
        })
    }

    pub fn is_paused(&self) -> bool {
        self.pauser.is_paused()
    }

    /// Whether the source has finished or been stopped
    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Number of items handed to a consumer so far
    pub fn delivered(&self) -> usize {
        self.delivered.get()
    }

    fn deliver(&self) {
        if self.delivering.replace(true) {
            return;
        }

        while !self.done.get() && !self.pauser.is_paused() {
            let Some(consumer) = self.consumer.borrow().clone() else {
                break;
            };
            let next = self.items.borrow_mut().next();
            match next {
                Some(item) => {
                    self.delivered.set(self.delivered.get() + 1);
                    consumer.receive(item);
                }
                None => {
                    self.done.set(true);
                    trace!(delivered = self.delivered.get(), "iterator source exhausted");
                    self.consumer.replace(None);
                    consumer.flow_stopped(StopReason::Finished);
                }
            }
        }

        self.delivering.set(false);
    }
}

impl<I> Producer<I::Item> for IteratorSource<I>
where
    I: Iterator + 'static,
    I::Item: 'static,
{
    fn output_kind(&self) -> Option<Kind> {
        self.kind.clone()
    }

    fn flow_to(self: Rc<Self>, consumer: Option<Rc<dyn Consumer<I::Item>>>) -> Result<Flow> {
        if let Some(consumer) = &consumer {
            check_compatible(self.kind.as_ref(), consumer.input_kind().as_ref())?;
        }

        let previous = self.consumer.replace(None);
        if let Some(previous) = previous {
            previous.flowing_from(None)?;
        }

        let Some(consumer) = consumer else {
            return Ok(Flow::end());
        };
        *self.consumer.borrow_mut() = Some(consumer.clone());

        let producer: Rc<dyn Producer<I::Item>> = self.clone();
        let flow = match consumer.flowing_from(Some(producer)) {
            Ok(flow) => flow,
            Err(error) => {
                self.consumer.replace(None);
                return Err(error);
            }
        };

        self.deliver();
        Ok(flow)
    }

    fn pause_flow(&self) -> PauseToken {
        self.pauser.pause()
    }

    fn stop_flow(&self) {
        if self.done.replace(true) {
            return;
        }
        debug!(delivered = self.delivered.get(), "iterator source stopped");
        let consumer = self.consumer.replace(None);
        if let Some(consumer) = consumer {
            consumer.flow_stopped(StopReason::Stopped);
        }
    }
}

impl<I: Iterator> fmt::Debug for IteratorSource<I>
where
    I::Item: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IteratorSource")
            .field("paused", &self.pauser.is_paused())
            .field("done", &self.done.get())
            .field("delivered", &self.delivered.get())
            .finish()
    }
}

/// A producer that drives an asynchronous [`Stream`].
///
/// The stream is polled on a local task that is spawned the first time a
/// consumer attaches. The task waits while the source is paused or has no
/// consumer, and ends when the stream ends, when [`stop_flow`](Producer::stop_flow)
/// is called, or when the source is dropped.
pub struct StreamSource<S: Stream>
where
    S::Item: 'static,
{
    stream: RefCell<Option<S>>,
    consumer: RefCell<Option<Rc<dyn Consumer<S::Item>>>>,
    pauser: Pauser,
    resumed: Rc<Notify>,
    cancel: CancellationToken,
    spawner: Rc<dyn LocalSpawn>,
    kind: Option<Kind>,
    done: Cell<bool>,
    this: Weak<Self>,
}

impl<S> StreamSource<S>
where
    S: Stream + Unpin + 'static,
    S::Item: 'static,
{
    /// Create a stream source that polls on the current `tokio::task::LocalSet`
    pub fn new(stream: S) -> Rc<Self> {
        Self::with_spawner(stream, TokioSpawner)
    }

    /// Create a stream source that polls on `spawner`
    pub fn with_spawner<L: LocalSpawn + 'static>(stream: S, spawner: L) -> Rc<Self> {
        Self::build(stream, Rc::new(spawner), None)
    }

    /// Create a stream source that declares the kind of its items
    pub fn with_kind(stream: S, kind: Kind) -> Rc<Self> {
        Self::build(stream, Rc::new(TokioSpawner), Some(kind))
    }

    fn build(stream: S, spawner: Rc<dyn LocalSpawn>, kind: Option<Kind>) -> Rc<Self> {
        let resumed = Rc::new(Notify::new());
        let notify = resumed.clone();
        Rc::new_cyclic(|this: &Weak<Self>| Self {
            stream: RefCell::new(Some(stream)),
            consumer: RefCell::new(None),
            pauser: Pauser::new(|| {}, move || notify.notify_one()),
            resumed,
            cancel: CancellationToken::new(),
            spawner,
            kind,
            done: Cell::new(false),
            this: this.clone(),
        })
    }

    pub fn is_paused(&self) -> bool {
        self.pauser.is_paused()
    }

    /// Whether the source has finished or been stopped
    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    fn is_flowing(&self) -> bool {
        !self.done.get() && !self.pauser.is_paused() && self.consumer.borrow().is_some()
    }

    fn finish(&self, reason: StopReason) {
        if self.done.replace(true) {
            return;
        }
        self.cancel.cancel();
        debug!(%reason, "stream source finished");
        let consumer = self.consumer.replace(None);
        if let Some(consumer) = consumer {
            consumer.flow_stopped(reason);
        }
    }

    fn start(&self) {
        let Some(stream) = self.stream.borrow_mut().take() else {
            return;
        };
        let task = drive(
            self.this.clone(),
            stream,
            self.resumed.clone(),
            self.cancel.clone(),
        );
        if let Err(error) = self.spawner.spawn_local(task) {
            self.finish(StopReason::Failed(Error::from(error)));
        }
    }
}

/// Wait until `source` may deliver. Returns `None` if it went away or was
/// cancelled in the meantime.
async fn flowing<S>(
    source: &Weak<StreamSource<S>>,
    resumed: &Notify,
    cancel: &CancellationToken,
) -> Option<Rc<StreamSource<S>>>
where
    S: Stream + Unpin + 'static,
    S::Item: 'static,
{
    loop {
        {
            let source = source.upgrade()?;
            if source.done.get() {
                return None;
            }
            if source.is_flowing() {
                return Some(source);
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = resumed.notified() => {}
        }
    }
}

async fn drive<S>(
    source: Weak<StreamSource<S>>,
    mut stream: S,
    resumed: Rc<Notify>,
    cancel: CancellationToken,
) where
    S: Stream + Unpin + 'static,
    S::Item: 'static,
{
    loop {
        if flowing(&source, &resumed, &cancel).await.is_none() {
            return;
        }
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        // The consumer may have paused while the item was on its way.
        let Some(current) = flowing(&source, &resumed, &cancel).await else {
            return;
        };
        match next {
            Some(item) => {
                let consumer = current.consumer.borrow().clone();
                if let Some(consumer) = consumer {
                    consumer.receive(item);
                }
            }
            None => {
                current.finish(StopReason::Finished);
                return;
            }
        }
    }
}

impl<S> Producer<S::Item> for StreamSource<S>
where
    S: Stream + Unpin + 'static,
    S::Item: 'static,
{
    fn output_kind(&self) -> Option<Kind> {
        self.kind.clone()
    }

    fn flow_to(self: Rc<Self>, consumer: Option<Rc<dyn Consumer<S::Item>>>) -> Result<Flow> {
        if let Some(consumer) = &consumer {
            check_compatible(self.kind.as_ref(), consumer.input_kind().as_ref())?;
        }

        let previous = self.consumer.replace(None);
        if let Some(previous) = previous {
            previous.flowing_from(None)?;
        }

        let Some(consumer) = consumer else {
            return Ok(Flow::end());
        };
        *self.consumer.borrow_mut() = Some(consumer.clone());

        let producer: Rc<dyn Producer<S::Item>> = self.clone();
        let flow = match consumer.flowing_from(Some(producer)) {
            Ok(flow) => flow,
            Err(error) => {
                self.consumer.replace(None);
                return Err(error);
            }
        };

        self.start();
        self.resumed.notify_one();
        Ok(flow)
    }

    fn pause_flow(&self) -> PauseToken {
        self.pauser.pause()
    }

    fn stop_flow(&self) {
        self.finish(StopReason::Stopped);
    }
}

impl<S: Stream> Drop for StreamSource<S>
where
    S::Item: 'static,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<S: Stream> fmt::Debug for StreamSource<S>
where
    S::Item: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("paused", &self.pauser.is_paused())
            .field("done", &self.done.get())
            .finish()
    }
}
