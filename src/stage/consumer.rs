use std::fmt;
use std::rc::Rc;

use crate::core::{Consumer, Flow, Kind, Processor, Producer, Result, StopReason};
use crate::stage::coordinator::Coordinator;

/// The consumer side of a [`Stage`](crate::stage::Stage).
///
/// Hands every received item to the stage's processor.
pub struct StageConsumer<P: Processor> {
    coordinator: Rc<Coordinator<P>>,
}

impl<P: Processor> StageConsumer<P> {
    pub(crate) fn new(coordinator: Rc<Coordinator<P>>) -> Self {
        Self { coordinator }
    }
}

impl<P: Processor> Consumer<P::Input> for StageConsumer<P> {
    fn input_kind(&self) -> Option<Kind> {
        self.coordinator.input_kind()
    }

    fn flowing_from(self: Rc<Self>, producer: Option<Rc<dyn Producer<P::Input>>>) -> Result<Flow> {
        self.coordinator.flowing_from(producer)
    }

    fn receive(&self, item: P::Input) {
        self.coordinator.receive(item);
    }

    fn flow_stopped(&self, reason: StopReason) {
        self.coordinator.flow_stopped(reason);
    }
}

impl<P: Processor> fmt::Debug for StageConsumer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<consumer for {}>", self.coordinator.name())
    }
}
