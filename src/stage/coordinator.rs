//! Shared state of a stage and the drain loop.
//!
//! Both halves of a stage hold the same [`Coordinator`]. All state lives in one
//! `RefCell` and is never borrowed across a call into a processor, a peer or a
//! pause token, since any of those may call straight back into the stage.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt};
use tracing::{debug, trace, warn};

use crate::core::kind::check_compatible;
use crate::core::output::PendingOutput;
use crate::core::{
    Consumer, Error, ErrorReporter, Flow, Output, PauseToken, Pauser, Produced, Processor,
    Producer, Production, Result, StopReason,
};
use crate::metrics;
use crate::stage::producer::StageProducer;
use crate::stage::{AsyncFaultPolicy, StageConfig};

/// Which processor callback is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Callback {
    Started,
    Received,
    Stopped,
}

impl Callback {
    fn describe(self) -> &'static str {
        match self {
            Callback::Started => "started",
            Callback::Received => "received",
            Callback::Stopped => "stopped",
        }
    }
}

struct State<I: 'static, O: 'static> {
    /// Producer flowing into the consumer half
    upstream: Option<Rc<dyn Producer<I>>>,
    /// Consumer the producer half flows to
    downstream: Option<Rc<dyn Consumer<O>>>,
    /// Output currently being delivered
    pending: Option<PendingOutput<O>>,
    paused: bool,
    /// Held against upstream because the producer half is paused
    upstream_pause: Option<PauseToken>,
    /// Held against the producer half because output exists but no consumer does
    no_drain_pause: Option<PauseToken>,
    /// Held against the producer half while a pending value resolves
    awaiting: Option<PauseToken>,
    stop_reason: Option<StopReason>,
    stopped_called: bool,
    started: bool,
    stop_requested: bool,
    draining: bool,
    /// No further callbacks will run
    terminated: bool,
    stop_delivered: bool,
}

impl<I: 'static, O: 'static> Default for State<I, O> {
    fn default() -> Self {
        Self {
            upstream: None,
            downstream: None,
            pending: None,
            paused: false,
            upstream_pause: None,
            no_drain_pause: None,
            awaiting: None,
            stop_reason: None,
            stopped_called: false,
            started: false,
            stop_requested: false,
            draining: false,
            terminated: false,
            stop_delivered: false,
        }
    }
}

pub(crate) struct Coordinator<P: Processor> {
    processor: RefCell<P>,
    state: RefCell<State<P::Input, P::Output>>,
    pauser: Pauser,
    producer_half: RefCell<Weak<StageProducer<P>>>,
    name: String,
    config: StageConfig,
    spawner: Rc<dyn LocalSpawn>,
    reporter: Rc<dyn ErrorReporter>,
    this: Weak<Coordinator<P>>,
}

impl<P: Processor> Coordinator<P> {
    pub(crate) fn new(
        processor: P,
        name: String,
        config: StageConfig,
        spawner: Rc<dyn LocalSpawn>,
        reporter: Rc<dyn ErrorReporter>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let on_pause = this.clone();
            let on_resume = this.clone();
            let pauser = Pauser::new(
                move || {
                    if let Some(coordinator) = on_pause.upgrade() {
                        coordinator.on_first_pause();
                    }
                },
                move || {
                    if let Some(coordinator) = on_resume.upgrade() {
                        coordinator.on_last_resume();
                    }
                },
            );
            Self {
                processor: RefCell::new(processor),
                state: RefCell::new(State::default()),
                pauser,
                producer_half: RefCell::new(Weak::new()),
                name,
                config,
                spawner,
                reporter,
                this: this.clone(),
            }
        })
    }

    pub(crate) fn set_producer_half(&self, producer: &Rc<StageProducer<P>>) {
        *self.producer_half.borrow_mut() = Rc::downgrade(producer);
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn input_kind(&self) -> Option<crate::core::Kind> {
        self.processor.borrow().input_kind()
    }

    pub(crate) fn output_kind(&self) -> Option<crate::core::Kind> {
        self.processor.borrow().output_kind()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    // ---- producer half -------------------------------------------------

    pub(crate) fn pause(&self) -> PauseToken {
        self.pauser.pause()
    }

    fn on_first_pause(&self) {
        let upstream = {
            let mut state = self.state.borrow_mut();
            state.paused = true;
            if state.upstream_pause.is_some() {
                None
            } else {
                state.upstream.clone()
            }
        };
        debug!(stage = %self.name, "paused");
        metrics::pause_started(&self.name);

        if let Some(upstream) = upstream {
            let token = upstream.pause_flow();
            self.state.borrow_mut().upstream_pause = Some(token);
        }
    }

    fn on_last_resume(&self) {
        self.state.borrow_mut().paused = false;
        debug!(stage = %self.name, "resumed");

        self.drain();

        let token = {
            let mut state = self.state.borrow_mut();
            if state.paused {
                return;
            }
            state.upstream_pause.take()
        };
        if let Some(mut token) = token {
            token.resume();
        }
    }

    /// Record a new downstream consumer, returning the one it replaces.
    pub(crate) fn replace_downstream(
        &self,
        consumer: Option<Rc<dyn Consumer<P::Output>>>,
    ) -> Option<Rc<dyn Consumer<P::Output>>> {
        std::mem::replace(&mut self.state.borrow_mut().downstream, consumer)
    }

    /// A consumer has accepted the producer half.
    pub(crate) fn downstream_attached(&self) {
        debug!(stage = %self.name, "downstream attached");
        let token = self.state.borrow_mut().no_drain_pause.take();
        if let Some(mut token) = token {
            token.resume();
        }
        self.drain();
        self.finish_if_drained();
    }

    pub(crate) fn stop_flow(&self) {
        let upstream = {
            let mut state = self.state.borrow_mut();
            if state.stop_requested {
                return;
            }
            state.stop_requested = true;
            state.upstream.clone()
        };
        match upstream {
            Some(upstream) => {
                debug!(stage = %self.name, "stopping upstream");
                upstream.stop_flow();
            }
            None => debug!(stage = %self.name, "stop requested before upstream attached"),
        }
    }

    // ---- consumer half -------------------------------------------------

    pub(crate) fn flowing_from(&self, producer: Option<Rc<dyn Producer<P::Input>>>) -> Result<Flow> {
        if let Some(producer) = &producer {
            check_compatible(producer.output_kind().as_ref(), self.input_kind().as_ref())?;
        }
        debug!(stage = %self.name, attached = producer.is_some(), "upstream changed");

        let swap = {
            let mut state = self.state.borrow_mut();
            let unchanged = match (&state.upstream, &producer) {
                (Some(current), Some(incoming)) => same_producer(current, incoming),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                None
            } else {
                state.upstream = producer.clone();
                let carry = state.upstream_pause.is_some() || state.paused;
                Some((state.upstream_pause.take(), carry))
            }
        };

        // Keep upstream paused across the swap if we were paused. The new pause
        // goes in before the old one is released so the stage never looks
        // resumed in between.
        if let Some((previous_pause, carry)) = swap {
            if carry {
                let token = match &producer {
                    Some(producer) => producer.pause_flow(),
                    None => PauseToken::noop(),
                };
                self.state.borrow_mut().upstream_pause = Some(token);
            }
            if let Some(mut previous) = previous_pause {
                previous.resume();
            }
        }

        if let Some(producer) = &producer {
            let (stop, start) = {
                let mut state = self.state.borrow_mut();
                let start = !state.started;
                state.started = true;
                (state.stop_requested, start)
            };
            if stop {
                producer.stop_flow();
            }
            if start {
                self.deliver_from(Callback::Started, |processor| processor.started());
            }
        }

        let downstream = self.state.borrow().downstream.clone();
        let producer_half = self.producer_half.borrow().upgrade();
        match (producer_half, downstream) {
            (Some(half), Some(downstream)) => downstream.flowing_from(Some(half)),
            (Some(half), None) => Ok(Flow::from_producer::<P::Output>(half)),
            (None, _) => Ok(Flow::end()),
        }
    }

    pub(crate) fn receive(&self, item: P::Input) {
        {
            let state = self.state.borrow();
            if state.terminated || state.stop_reason.is_some() {
                warn!(stage = %self.name, "item received after flow stopped, ignoring");
                return;
            }
        }
        trace!(stage = %self.name, "item received");
        self.deliver_from(Callback::Received, move |processor| processor.received(item));
    }

    pub(crate) fn flow_stopped(&self, reason: StopReason) {
        let draining = {
            let mut state = self.state.borrow_mut();
            if state.terminated {
                debug!(stage = %self.name, %reason, "upstream stopped after stage terminated");
                return;
            }
            if state.stop_reason.is_some() {
                warn!(stage = %self.name, "flow stopped twice, ignoring");
                return;
            }
            state.stop_reason = Some(reason.clone());
            state.pending.is_some()
        };
        debug!(stage = %self.name, %reason, "upstream stopped");

        // Output still in flight goes out before anything `stopped` produces.
        if !draining {
            self.run_stopped();
            self.drain();
        }
    }

    // ---- production and draining --------------------------------------

    fn deliver_from<F>(&self, callback: Callback, run: F)
    where
        F: FnOnce(&mut P) -> Produced<P::Output>,
    {
        if self.state.borrow().terminated {
            return;
        }
        self.produce(callback, run);
        self.drain();
    }

    fn run_stopped(&self) {
        let reason = {
            let mut state = self.state.borrow_mut();
            state.stopped_called = true;
            state.stop_reason.clone()
        };
        if let Some(reason) = reason {
            self.produce(Callback::Stopped, move |processor| processor.stopped(&reason));
        }
    }

    /// Run a processor callback and install whatever it produced.
    fn produce<F>(&self, callback: Callback, run: F)
    where
        F: FnOnce(&mut P) -> Produced<P::Output>,
    {
        assert!(
            self.state.borrow().pending.is_none(),
            "stage `{}` produced new output from `{}` before its previous output was delivered",
            self.name,
            callback.describe(),
        );

        let result = {
            let mut processor = self.processor.borrow_mut();
            run(&mut processor)
        };

        let production = match result {
            Ok(Some(production)) => production,
            // A stop has to reach downstream even when `stopped` has nothing to say.
            Ok(None) if callback == Callback::Stopped => Production::empty(),
            Ok(None) => return,
            Err(error) => {
                self.fault(error, callback.describe());
                return;
            }
        };

        let needs_consumer = {
            let mut state = self.state.borrow_mut();
            state.pending = Some(PendingOutput::new(production));
            state.downstream.is_none()
        };
        if needs_consumer {
            self.pause_until_consumer();
        }
    }

    fn pause_until_consumer(&self) {
        if self.state.borrow().no_drain_pause.is_some() {
            return;
        }
        debug!(stage = %self.name, "output produced with no consumer attached, buffering");
        let token = self.pause();
        self.state.borrow_mut().no_drain_pause = Some(token);
    }

    /// Deliver pending output downstream until it runs out or the stage pauses.
    pub(crate) fn drain(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.draining || state.pending.is_none() {
                return;
            }
            state.draining = true;
        }

        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                if state.paused {
                    break;
                }
                match state.pending.as_mut() {
                    Some(pending) => pending.pull(),
                    None => break,
                }
            };

            match next {
                Some(Output::Immediate(value)) => self.deliver(value),
                Some(Output::Pending(future)) => self.wait_for(future),
                None => {
                    if !self.exhausted() {
                        break;
                    }
                }
            }
        }

        self.state.borrow_mut().draining = false;
    }

    fn deliver(&self, value: P::Output) {
        let downstream = self.state.borrow().downstream.clone();
        match downstream {
            Some(consumer) => {
                trace!(stage = %self.name, "delivering item");
                metrics::item_delivered(&self.name);
                consumer.receive(value);
            }
            None => {
                // Detached mid-drain: keep the value for the next consumer.
                if let Some(pending) = self.state.borrow_mut().pending.as_mut() {
                    pending.push_front(value);
                }
                self.pause_until_consumer();
            }
        }
    }

    /// The pending production ran out. Returns true if draining should go on
    /// with the output of `stopped`.
    fn exhausted(&self) -> bool {
        let (stopping, run_stopped) = {
            let mut state = self.state.borrow_mut();
            state.pending = None;
            (state.stop_reason.is_some(), !state.stopped_called)
        };
        if !stopping {
            return false;
        }
        if run_stopped {
            self.run_stopped();
            return self.state.borrow().pending.is_some();
        }
        self.state.borrow_mut().terminated = true;
        self.finish_if_drained();
        false
    }

    /// Tell downstream the flow stopped, once everything before it is delivered.
    fn finish_if_drained(&self) {
        let (downstream, reason) = {
            let mut state = self.state.borrow_mut();
            if !state.terminated || state.stop_delivered || state.pending.is_some() {
                return;
            }
            let Some(downstream) = state.downstream.clone() else {
                return;
            };
            state.stop_delivered = true;
            (downstream, state.stop_reason.clone().unwrap_or(StopReason::Finished))
        };
        debug!(stage = %self.name, %reason, "stopping downstream");
        downstream.flow_stopped(reason);
        self.release_peers();
    }

    /// The stop has gone out: let go of peers and held tokens so that a
    /// finished pipeline is freed once its handles are dropped.
    fn release_peers(&self) {
        let released = {
            let mut state = self.state.borrow_mut();
            (
                state.upstream.take(),
                state.downstream.take(),
                state.pending.take(),
                state.upstream_pause.take(),
                state.no_drain_pause.take(),
                state.awaiting.take(),
            )
        };
        trace!(stage = %self.name, "released peers");
        drop(released);
    }

    fn wait_for(&self, future: LocalBoxFuture<'static, Result<P::Output>>) {
        let token = self.pause();
        {
            let mut state = self.state.borrow_mut();
            assert!(
                state.awaiting.is_none(),
                "stage `{}` pulled a second pending value while one was unresolved",
                self.name,
            );
            state.awaiting = Some(token);
        }
        trace!(stage = %self.name, "waiting for pending value");

        let this = self.this.clone();
        let spawned = self.spawner.spawn_local(async move {
            let result = future.await;
            if let Some(coordinator) = this.upgrade() {
                coordinator.resolved(result);
            }
        });
        if let Err(error) = spawned {
            self.resolved(Err(Error::from(error)));
        }
    }

    fn resolved(&self, result: Result<P::Output>) {
        let token = self.state.borrow_mut().awaiting.take();
        match result {
            Ok(value) => {
                trace!(stage = %self.name, "pending value resolved");
                if let Some(pending) = self.state.borrow_mut().pending.as_mut() {
                    pending.push_front(value);
                }
            }
            Err(error) => self.async_fault(error),
        }
        if let Some(mut token) = token {
            token.resume();
        }
    }

    fn async_fault(&self, error: Error) {
        let error = match error {
            error @ (Error::AsyncValue(_) | Error::Spawn(_)) => error,
            other => Error::async_value(other),
        };
        if self.state.borrow().terminated {
            debug!(stage = %self.name, %error, "pending value failed after flow stopped");
            return;
        }
        match self.config.async_fault_policy {
            AsyncFaultPolicy::Report => {
                self.reporter
                    .report(&error, &format!("pending value failed in stage `{}`", self.name));
            }
            AsyncFaultPolicy::Stop => self.fault(error, "pending value"),
        }
    }

    /// A callback failed: stop upstream, stop downstream, and never produce again.
    fn fault(&self, error: Error, context: &str) {
        let (upstream, downstream) = {
            let mut state = self.state.borrow_mut();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.pending = None;
            state.stopped_called = true;
            state.stop_reason = Some(StopReason::Failed(error.clone()));
            let upstream = if state.stop_requested {
                None
            } else {
                state.stop_requested = true;
                state.upstream.clone()
            };
            let downstream = state.downstream.clone();
            if downstream.is_some() {
                state.stop_delivered = true;
            }
            (upstream, downstream)
        };

        self.reporter
            .report(&error, &format!("`{}` failed in stage `{}`", context, self.name));
        metrics::fault(&self.name);

        if let Some(upstream) = upstream {
            upstream.stop_flow();
        }
        if let Some(downstream) = downstream {
            downstream.flow_stopped(StopReason::Failed(error));
            self.release_peers();
        }
    }
}

fn same_producer<T: 'static>(a: &Rc<dyn Producer<T>>, b: &Rc<dyn Producer<T>>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
