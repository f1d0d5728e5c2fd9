use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::core::kind::check_compatible;
use crate::core::{Consumer, Flow, Kind, PauseToken, Processor, Producer, Result};
use crate::stage::coordinator::Coordinator;

/// The producer side of a [`Stage`](crate::stage::Stage).
///
/// Delivers whatever the stage's processor produces to the attached consumer.
pub struct StageProducer<P: Processor> {
    coordinator: Rc<Coordinator<P>>,
}

impl<P: Processor> StageProducer<P> {
    pub(crate) fn new(coordinator: Rc<Coordinator<P>>) -> Self {
        Self { coordinator }
    }

    /// Whether the stage is currently holding back output
    pub fn is_paused(&self) -> bool {
        self.coordinator.is_paused()
    }
}

impl<P: Processor> Producer<P::Output> for StageProducer<P> {
    fn output_kind(&self) -> Option<Kind> {
        self.coordinator.output_kind()
    }

    fn flow_to(self: Rc<Self>, consumer: Option<Rc<dyn Consumer<P::Output>>>) -> Result<Flow> {
        if let Some(consumer) = &consumer {
            check_compatible(self.output_kind().as_ref(), consumer.input_kind().as_ref())?;
        }

        if let Some(previous) = self.coordinator.replace_downstream(None) {
            debug!(stage = %self.coordinator.name(), "detaching downstream");
            previous.flowing_from(None)?;
        }

        let Some(consumer) = consumer else {
            return Ok(Flow::end());
        };
        self.coordinator.replace_downstream(Some(consumer.clone()));

        let producer: Rc<dyn Producer<P::Output>> = self.clone();
        let flow = match consumer.flowing_from(Some(producer)) {
            Ok(flow) => flow,
            Err(error) => {
                self.coordinator.replace_downstream(None);
                return Err(error);
            }
        };

        self.coordinator.downstream_attached();
        Ok(flow)
    }

    fn pause_flow(&self) -> PauseToken {
        self.coordinator.pause()
    }

    fn stop_flow(&self) {
        self.coordinator.stop_flow();
    }
}

impl<P: Processor> fmt::Debug for StageProducer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<producer for {}>", self.coordinator.name())
    }
}
