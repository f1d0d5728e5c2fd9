//! Core traits for the producer/consumer flow-control system.
//!
//! This module defines the three roles of a pipeline: a [`Producer`] pushes
//! items into the [`Consumer`] it flows to, the consumer pushes pause and stop
//! requests back, and a [`Processor`] is the single-purpose transform that a
//! [`Stage`](crate::stage::Stage) turns into a connected consumer/producer pair.
//!
//! Everything here runs on one thread. Producers and consumers are shared
//! through `Rc` and take `&self`; implementations keep their mutable state in
//! `Cell`/`RefCell`.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::core::error::{Result, StopReason};
use crate::core::kind::Kind;
use crate::core::output::Production;
use crate::core::pause::PauseToken;

/// A producer pushes items to the consumer it is attached to.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use flowtube::core::{Consumer, Flow, PauseToken, Producer, Result};
///
/// /// A producer that never produces anything.
/// struct Silent {
///     consumer: RefCell<Option<Rc<dyn Consumer<u32>>>>,
/// }
///
/// impl Producer<u32> for Silent {
///     fn flow_to(self: Rc<Self>, consumer: Option<Rc<dyn Consumer<u32>>>) -> Result<Flow> {
///         *self.consumer.borrow_mut() = consumer.clone();
///         match consumer {
///             Some(consumer) => consumer.flowing_from(Some(self)),
///             None => Ok(Flow::end()),
///         }
///     }
///
///     fn pause_flow(&self) -> PauseToken {
///         PauseToken::noop()
///     }
///
///     fn stop_flow(&self) {}
/// }
/// ```
pub trait Producer<T: 'static> {
    /// The kind of items this producer emits, if declared
    fn output_kind(&self) -> Option<Kind> {
        None
    }

    /// Start delivering items to `consumer`, detaching any previous consumer.
    ///
    /// Passing `None` detaches without attaching anything new. Returns whatever
    /// the consumer's [`Consumer::flowing_from`] returned, so attachment can be
    /// chained through several stages.
    fn flow_to(self: Rc<Self>, consumer: Option<Rc<dyn Consumer<T>>>) -> Result<Flow>;

    /// Ask this producer to stop delivering items until the token is resumed.
    fn pause_flow(&self) -> PauseToken;

    /// Ask this producer to stop delivering items permanently.
    fn stop_flow(&self);
}

/// A consumer receives items from the producer that flows to it.
pub trait Consumer<T: 'static> {
    /// The kind of items this consumer accepts, if declared
    fn input_kind(&self) -> Option<Kind> {
        None
    }

    /// Called by a producer when it starts (or, with `None`, stops) flowing here.
    ///
    /// A consumer that also produces returns a [`Flow`] for its own producer
    /// side; a terminal consumer returns [`Flow::end`].
    fn flowing_from(self: Rc<Self>, producer: Option<Rc<dyn Producer<T>>>) -> Result<Flow>;

    /// Receive a single item.
    fn receive(&self, item: T);

    /// The producer has stopped permanently. No more items will arrive.
    fn flow_stopped(&self, reason: StopReason);
}

/// What a processor callback hands back: nothing, or a production to drain.
pub type Produced<T> = Result<Option<Production<T>>>;

/// A single-purpose transform stage.
///
/// A processor never deals with flow control itself. Wrapping it in a
/// [`Stage`](crate::stage::Stage) takes care of pausing, buffering and stop
/// propagation. Returning `Err` from a callback faults the stage permanently.
///
/// # Examples
///
/// ```rust
/// use flowtube::core::{Produced, Processor, Production};
///
/// struct DoubleProcessor;
///
/// impl Processor for DoubleProcessor {
///     type Input = i32;
///     type Output = i32;
///
///     fn received(&mut self, item: Self::Input) -> Produced<Self::Output> {
///         Ok(Some(Production::once(item * 2)))
///     }
/// }
/// ```
pub trait Processor: 'static {
    /// The type of items this processor accepts
    type Input: 'static;
    /// The type of items this processor produces
    type Output: 'static;

    /// The declared kind of accepted items
    fn input_kind(&self) -> Option<Kind> {
        None
    }

    /// The declared kind of produced items
    fn output_kind(&self) -> Option<Kind> {
        None
    }

    /// Called once, when an upstream producer first attaches.
    fn started(&mut self) -> Produced<Self::Output> {
        Ok(None)
    }

    /// Called for every item received from upstream.
    fn received(&mut self, item: Self::Input) -> Produced<Self::Output>;

    /// Called when upstream has stopped, allowing final output generation.
    fn stopped(&mut self, _reason: &StopReason) -> Produced<Self::Output> {
        Ok(None)
    }
}

/// The result of attaching a producer to a consumer.
///
/// When the consumer is itself the input side of a stage, the flow carries that
/// stage's producer side (or, if that is already attached further down, the
/// last producer of the chain) so the caller can keep connecting stages.
pub struct Flow {
    tail: Option<Box<dyn Any>>,
}

impl Flow {
    /// A flow that ends at a terminal consumer
    pub fn end() -> Self {
        Self { tail: None }
    }

    /// A flow that continues from `producer`
    pub fn from_producer<T: 'static>(producer: Rc<dyn Producer<T>>) -> Self {
        Self {
            tail: Some(Box::new(producer)),
        }
    }

    /// Whether the flow ends at a terminal consumer
    pub fn is_end(&self) -> bool {
        self.tail.is_none()
    }

    /// Recover the producer the flow continues from.
    ///
    /// Returns `None` when the flow has ended or the producer emits some other
    /// item type than `T`.
    pub fn producer<T: 'static>(self) -> Option<Rc<dyn Producer<T>>> {
        let tail = self.tail?;
        tail.downcast::<Rc<dyn Producer<T>>>().ok().map(|p| *p)
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            write!(f, "Flow(end)")
        } else {
            write!(f, "Flow(..)")
        }
    }
}

/// Where a stage reports faults it contains.
///
/// Faults never escape a stage as errors; the stage reports them here and
/// turns them into a [`StopReason::Failed`] for its peers.
pub trait ErrorReporter {
    /// Report `error`, with a short description of where it happened
    fn report(&self, error: &crate::core::Error, context: &str);
}
