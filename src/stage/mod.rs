//! Stages: processors wired into a pipeline with flow control.
//!
//! A [`Stage`] wraps one [`Processor`] and splits it into a consumer side,
//! which upstream producers flow into, and a producer side, which flows into
//! downstream consumers. The stage owns all of the flow-control bookkeeping:
//! pausing upstream when downstream pauses, holding on to produced values
//! while no consumer is attached, waiting for pending values in order, and
//! propagating stops and faults in both directions.

mod consumer;
mod coordinator;
mod producer;

use std::rc::Rc;

use futures::task::LocalSpawn;

use crate::core::{Consumer, ErrorReporter, Processor, Producer};
use crate::util::{TokioSpawner, TracingReporter};

pub use consumer::StageConsumer;
pub use producer::StageProducer;

use coordinator::Coordinator;

/// What a stage does when a pending output value resolves to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AsyncFaultPolicy {
    /// Report the error, drop the value and keep delivering
    #[default]
    Report,
    /// Report the error and stop the flow, as if the processor callback failed
    Stop,
}

/// Configuration for a stage
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StageConfig {
    /// Name used in logs, reports and metrics. Defaults to the processor's type name.
    pub name: Option<String>,
    /// How failed pending values are handled
    pub async_fault_policy: AsyncFaultPolicy,
}

/// Builder that turns a processor into a connected producer/consumer pair.
///
/// # Examples
///
/// ```rust
/// use flowtube::prelude::*;
///
/// let (producer, consumer) = Stage::new(MapProcessor::new(|x: i32| x * 2))
///     .name("double")
///     .build();
///
/// let sink = CollectSink::new();
/// producer.flow_to(Some(sink.consumer())).unwrap();
///
/// let source = IteratorSource::new(vec![1, 2, 3]);
/// source.flow_to(Some(consumer)).unwrap();
///
/// assert_eq!(sink.items(), vec![2, 4, 6]);
/// ```
pub struct Stage<P> {
    processor: P,
    config: StageConfig,
    spawner: Rc<dyn LocalSpawn>,
    reporter: Rc<dyn ErrorReporter>,
}

impl<P: Processor> Stage<P> {
    /// Create a new stage around `processor`.
    ///
    /// Pending output values are awaited on [`TokioSpawner`] unless another
    /// [`spawner`](Stage::spawner) is set, so a stage whose processor produces
    /// them has to run inside a `tokio::task::LocalSet`. Without one every
    /// pending value fails with [`Error::Spawn`](crate::core::Error::Spawn).
    pub fn new(processor: P) -> Self {
        Self::with_config(processor, StageConfig::default())
    }

    /// Create a new stage with an explicit configuration
    pub fn with_config(processor: P, config: StageConfig) -> Self {
        Self {
            processor,
            config,
            spawner: Rc::new(TokioSpawner),
            reporter: Rc::new(TracingReporter),
        }
    }

    /// Set the stage name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Set how failed pending values are handled
    pub fn async_fault_policy(mut self, policy: AsyncFaultPolicy) -> Self {
        self.config.async_fault_policy = policy;
        self
    }

    /// Set the executor that waits for pending output values.
    ///
    /// Defaults to [`TokioSpawner`], which needs a `tokio::task::LocalSet`.
    pub fn spawner<S: LocalSpawn + 'static>(mut self, spawner: S) -> Self {
        self.spawner = Rc::new(spawner);
        self
    }

    /// Set where faults are reported. Defaults to [`TracingReporter`].
    pub fn reporter<R: ErrorReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Rc::new(reporter);
        self
    }

    /// Build the stage, returning its producer and consumer sides.
    pub fn build(self) -> (Rc<dyn Producer<P::Output>>, Rc<dyn Consumer<P::Input>>) {
        let (producer, consumer) = self.build_halves();
        (producer, consumer)
    }

    /// Build the stage, returning the concrete producer and consumer sides.
    pub fn build_halves(self) -> (Rc<StageProducer<P>>, Rc<StageConsumer<P>>) {
        let name = self
            .config
            .name
            .clone()
            .unwrap_or_else(|| std::any::type_name::<P>().to_string());
        let coordinator = Coordinator::new(
            self.processor,
            name,
            self.config,
            self.spawner,
            self.reporter,
        );
        let producer = Rc::new(StageProducer::new(coordinator.clone()));
        coordinator.set_producer_half(&producer);
        let consumer = Rc::new(StageConsumer::new(coordinator));
        (producer, consumer)
    }
}

/// Wrap a processor with the default configuration.
///
/// Shorthand for `Stage::new(processor).build()`.
pub fn wrap<P: Processor>(processor: P) -> (Rc<dyn Producer<P::Output>>, Rc<dyn Consumer<P::Input>>) {
    Stage::new(processor).build()
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::{Rc, Weak};
    use std::task::Poll;

    use futures::executor::LocalPool;

    use super::{wrap, AsyncFaultPolicy, Stage};
    use crate::core::{
        Consumer, Error, Flow, Kind, Output, PauseToken, Pauser, Produced, Processor, Producer,
        Production, Result, StopReason,
    };
    use crate::sinks::CollectSink;
    use crate::sources::IteratorSource;
    use crate::util::{processor_from_fn, CollectReporter};

    /// A producer that buffers while paused and counts what was asked of it.
    struct Upstream<T: 'static> {
        consumer: RefCell<Option<Rc<dyn Consumer<T>>>>,
        buffered: RefCell<VecDeque<T>>,
        pauser: Pauser,
        pauses: Rc<Cell<usize>>,
        resumes: Rc<Cell<usize>>,
        stops: Cell<usize>,
        flushing: Cell<bool>,
        kind: Option<Kind>,
    }

    impl<T: 'static> Upstream<T> {
        fn new() -> Rc<Self> {
            Self::build(None)
        }

        fn with_kind(kind: Kind) -> Rc<Self> {
            Self::build(Some(kind))
        }

        fn build(kind: Option<Kind>) -> Rc<Self> {
            Rc::new_cyclic(|this: &Weak<Self>| {
                let pauses = Rc::new(Cell::new(0));
                let resumes = Rc::new(Cell::new(0));
                let on_pause = pauses.clone();
                let on_resume = resumes.clone();
                let this = this.clone();
                Self {
                    consumer: RefCell::new(None),
                    buffered: RefCell::new(VecDeque::new()),
                    pauser: Pauser::new(
                        move || on_pause.set(on_pause.get() + 1),
                        move || {
                            on_resume.set(on_resume.get() + 1);
                            if let Some(upstream) = this.upgrade() {
                                upstream.flush();
                            }
                        },
                    ),
                    pauses,
                    resumes,
                    stops: Cell::new(0),
                    flushing: Cell::new(false),
                    kind,
                }
            })
        }

        fn push(&self, item: T) {
            self.buffered.borrow_mut().push_back(item);
            self.flush();
        }

        /// Deliver straight away, ignoring pauses.
        fn force(&self, item: T) {
            let consumer = self.consumer.borrow().clone();
            if let Some(consumer) = consumer {
                consumer.receive(item);
            }
        }

        fn finish(&self) {
            let consumer = self.consumer.borrow().clone();
            if let Some(consumer) = consumer {
                consumer.flow_stopped(StopReason::Finished);
            }
        }

        fn buffered(&self) -> usize {
            self.buffered.borrow().len()
        }

        fn flush(&self) {
            if self.flushing.replace(true) {
                return;
            }
            while !self.pauser.is_paused() {
                let Some(consumer) = self.consumer.borrow().clone() else {
                    break;
                };
                let Some(item) = self.buffered.borrow_mut().pop_front() else {
                    break;
                };
                consumer.receive(item);
            }
            self.flushing.set(false);
        }
    }

    impl<T: 'static> Producer<T> for Upstream<T> {
        fn output_kind(&self) -> Option<Kind> {
            self.kind.clone()
        }

        fn flow_to(self: Rc<Self>, consumer: Option<Rc<dyn Consumer<T>>>) -> Result<Flow> {
            let Some(consumer) = consumer else {
                *self.consumer.borrow_mut() = None;
                return Ok(Flow::end());
            };
            let flow = consumer.clone().flowing_from(Some(self.clone()))?;
            *self.consumer.borrow_mut() = Some(consumer);
            self.flush();
            Ok(flow)
        }

        fn pause_flow(&self) -> PauseToken {
            self.pauser.pause()
        }

        fn stop_flow(&self) {
            self.stops.set(self.stops.get() + 1);
        }
    }

    #[derive(Default)]
    struct Doubler {
        starts: Rc<Cell<usize>>,
        fail_on: Option<i32>,
        tail: Option<i32>,
        input: Option<Kind>,
        output: Option<Kind>,
    }

    impl Processor for Doubler {
        type Input = i32;
        type Output = i32;

        fn input_kind(&self) -> Option<Kind> {
            self.input.clone()
        }

        fn output_kind(&self) -> Option<Kind> {
            self.output.clone()
        }

        fn started(&mut self) -> Produced<i32> {
            self.starts.set(self.starts.get() + 1);
            Ok(None)
        }

        fn received(&mut self, item: i32) -> Produced<i32> {
            if Some(item) == self.fail_on {
                return Err(Error::custom(format!("cannot double {}", item)));
            }
            Ok(Some(Production::once(item * 2)))
        }

        fn stopped(&mut self, _reason: &StopReason) -> Produced<i32> {
            Ok(self.tail.map(Production::once))
        }
    }

    /// Resolves on the executor turn after it is first polled.
    async fn next_turn() {
        let mut yielded = false;
        futures::future::poll_fn(|cx| {
            if yielded {
                Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }

    /// Emits each item late, followed by the item plus 100 right away.
    struct Delayed;

    impl Processor for Delayed {
        type Input = i32;
        type Output = i32;

        fn received(&mut self, item: i32) -> Produced<i32> {
            let late = Output::pending(async move {
                next_turn().await;
                Ok::<_, Error>(item)
            });
            Ok(Some(Production::new(vec![late, Output::Immediate(item + 100)])))
        }

        fn stopped(&mut self, _reason: &StopReason) -> Produced<i32> {
            Ok(Some(Production::once(999)))
        }
    }

    /// Each item resolves later; 2 resolves to an error.
    struct Flaky;

    impl Processor for Flaky {
        type Input = i32;
        type Output = i32;

        fn received(&mut self, item: i32) -> Produced<i32> {
            Ok(Some(Production::pending(async move {
                next_turn().await;
                if item == 2 {
                    Err(Error::custom("lost item 2"))
                } else {
                    Ok(item)
                }
            })))
        }
    }

    fn connect<P>(stage: Stage<P>) -> (Rc<Upstream<i32>>, CollectSink<i32>)
    where
        P: Processor<Input = i32, Output = i32>,
    {
        let (producer, consumer) = stage.build();
        let sink = CollectSink::new();
        producer.flow_to(Some(sink.consumer())).unwrap();
        let upstream = Upstream::new();
        upstream.clone().flow_to(Some(consumer)).unwrap();
        (upstream, sink)
    }

    #[test]
    fn test_immediate_values_flow_without_pauses() {
        let (upstream, sink) = connect(Stage::new(Doubler::default()));

        upstream.push(1);
        upstream.push(2);
        upstream.push(3);
        assert_eq!(sink.items(), vec![2, 4, 6]);
        assert_eq!(upstream.pauses.get(), 0);
        assert_eq!(upstream.resumes.get(), 0);

        upstream.finish();
        assert_eq!(sink.stop_count(), 1);
        assert!(matches!(sink.stop_reason(), Some(StopReason::Finished)));
    }

    #[test]
    fn test_started_runs_once() {
        let starts = Rc::new(Cell::new(0));
        let (producer, consumer) = wrap(Doubler {
            starts: starts.clone(),
            ..Default::default()
        });
        let sink = CollectSink::new();
        producer.flow_to(Some(sink.consumer())).unwrap();
        assert_eq!(starts.get(), 0);

        let first = Upstream::new();
        first.clone().flow_to(Some(consumer.clone())).unwrap();
        consumer.clone().flowing_from(None).unwrap();
        let second = Upstream::new();
        second.clone().flow_to(Some(consumer)).unwrap();

        assert_eq!(starts.get(), 1);
        second.push(5);
        assert_eq!(sink.items(), vec![10]);
    }

    #[test]
    fn test_output_waits_for_consumer() {
        let (producer, consumer) = wrap(Doubler::default());
        let upstream = Upstream::new();
        upstream.clone().flow_to(Some(consumer)).unwrap();

        upstream.push(1);
        upstream.push(2);
        upstream.push(3);
        assert_eq!(upstream.pauses.get(), 1);
        assert_eq!(upstream.buffered(), 2);

        let sink = CollectSink::new();
        producer.flow_to(Some(sink.consumer())).unwrap();

        assert_eq!(sink.items(), vec![2, 4, 6]);
        assert_eq!(upstream.pauses.get(), 1);
        assert_eq!(upstream.resumes.get(), 1);
    }

    #[test]
    fn test_pauses_coalesce() {
        let (producer, consumer) = wrap(Doubler::default());
        let sink = CollectSink::new();
        producer.clone().flow_to(Some(sink.consumer())).unwrap();
        let upstream = Upstream::new();
        upstream.clone().flow_to(Some(consumer)).unwrap();

        let mut first = producer.pause_flow();
        let mut second = producer.pause_flow();
        assert_eq!(upstream.pauses.get(), 1);

        upstream.push(1);
        first.resume();
        first.resume();
        assert_eq!(upstream.resumes.get(), 0);
        assert!(sink.is_empty());

        second.resume();
        assert_eq!(upstream.pauses.get(), 1);
        assert_eq!(upstream.resumes.get(), 1);
        assert_eq!(sink.items(), vec![2]);
    }

    #[test]
    fn test_kind_mismatch_leaves_attachment_unchanged() {
        let text = Kind::new("text");
        let (producer, consumer) = wrap(Doubler {
            input: Some(text.clone()),
            output: Some(text.clone()),
            ..Default::default()
        });

        let sink = CollectSink::new();
        producer.clone().flow_to(Some(sink.consumer())).unwrap();
        let bytes_sink = CollectSink::with_kind(Kind::new("bytes"));
        let error = producer.flow_to(Some(bytes_sink.consumer())).unwrap_err();
        assert!(error.is_type_mismatch());
        assert!(sink.producer().is_some());
        assert!(bytes_sink.producer().is_none());

        let bytes = Upstream::with_kind(Kind::new("bytes"));
        let error = bytes.clone().flow_to(Some(consumer.clone())).unwrap_err();
        assert!(error.is_type_mismatch());

        let lines = Upstream::with_kind(text.refine("lines"));
        lines.clone().flow_to(Some(consumer)).unwrap();
        lines.push(21);
        assert_eq!(sink.items(), vec![42]);
    }

    #[test]
    fn test_fault_is_contained() {
        let reporter = CollectReporter::new();
        let stage = Stage::new(Doubler {
            fail_on: Some(2),
            ..Default::default()
        })
        .name("doubler")
        .reporter(reporter.clone());
        let (upstream, sink) = connect(stage);

        upstream.push(1);
        upstream.push(2);
        upstream.push(3);

        assert_eq!(sink.items(), vec![2]);
        assert_eq!(sink.stop_count(), 1);
        assert!(matches!(
            sink.stop_reason(),
            Some(StopReason::Failed(Error::Custom(_)))
        ));
        assert_eq!(upstream.stops.get(), 1);
        assert_eq!(reporter.len(), 1);
        assert!(reporter.reports()[0].1.contains("doubler"));

        upstream.force(4);
        upstream.finish();
        assert_eq!(sink.items(), vec![2]);
        assert_eq!(sink.stop_count(), 1);
        assert_eq!(upstream.stops.get(), 1);
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_stop_requested_before_upstream_attaches() {
        let (producer, consumer) = wrap(Doubler::default());
        producer.stop_flow();
        producer.stop_flow();

        let upstream = Upstream::new();
        upstream.clone().flow_to(Some(consumer)).unwrap();
        assert_eq!(upstream.stops.get(), 1);

        producer.stop_flow();
        assert_eq!(upstream.stops.get(), 1);
    }

    #[test]
    fn test_stopped_output_precedes_stop() {
        let (upstream, sink) = connect(Stage::new(Doubler {
            tail: Some(99),
            ..Default::default()
        }));

        upstream.push(1);
        upstream.finish();

        assert_eq!(sink.items(), vec![2, 99]);
        assert_eq!(sink.stop_count(), 1);
        assert!(matches!(sink.stop_reason(), Some(StopReason::Finished)));
    }

    #[test]
    fn test_stop_waits_for_consumer() {
        let (producer, consumer) = wrap(Doubler {
            tail: Some(7),
            ..Default::default()
        });
        let upstream = Upstream::new();
        upstream.clone().flow_to(Some(consumer)).unwrap();
        upstream.finish();

        let sink = CollectSink::new();
        producer.flow_to(Some(sink.consumer())).unwrap();
        assert_eq!(sink.items(), vec![7]);
        assert_eq!(sink.stop_count(), 1);
        assert!(matches!(sink.stop_reason(), Some(StopReason::Finished)));
    }

    #[test]
    fn test_stop_while_pending_drains_first() {
        let mut pool = LocalPool::new();
        let (upstream, sink) = connect(Stage::new(Delayed).spawner(pool.spawner()));

        upstream.push(1);
        upstream.finish();
        assert!(sink.is_empty());
        assert!(!sink.is_stopped());

        pool.run_until_stalled();
        assert_eq!(sink.items(), vec![1, 101, 999]);
        assert_eq!(sink.stop_count(), 1);
        assert!(matches!(sink.stop_reason(), Some(StopReason::Finished)));
    }

    #[test]
    fn test_async_fault_reported_and_skipped() {
        let mut pool = LocalPool::new();
        let reporter = CollectReporter::new();
        let stage = Stage::new(Flaky)
            .spawner(pool.spawner())
            .reporter(reporter.clone());
        let (upstream, sink) = connect(stage);

        upstream.push(1);
        upstream.push(2);
        upstream.push(3);
        pool.run_until_stalled();

        assert_eq!(sink.items(), vec![1, 3]);
        assert!(!sink.is_stopped());
        assert_eq!(upstream.stops.get(), 0);
        assert_eq!(reporter.len(), 1);
        assert!(matches!(reporter.reports()[0].0, Error::AsyncValue(_)));
    }

    #[test]
    fn test_async_fault_stops_flow() {
        let mut pool = LocalPool::new();
        let reporter = CollectReporter::new();
        let stage = Stage::new(Flaky)
            .async_fault_policy(AsyncFaultPolicy::Stop)
            .spawner(pool.spawner())
            .reporter(reporter.clone());
        let (upstream, sink) = connect(stage);

        upstream.push(1);
        upstream.push(2);
        upstream.push(3);
        pool.run_until_stalled();

        assert_eq!(sink.items(), vec![1]);
        assert_eq!(sink.stop_count(), 1);
        let reason = sink.stop_reason().unwrap();
        assert!(matches!(reason.error(), Some(Error::AsyncValue(_))));
        assert_eq!(upstream.stops.get(), 1);
        assert_eq!(reporter.len(), 1);
    }

    /// Records items and detaches from its producer after the first one.
    #[derive(Default)]
    struct DetachOnFirst {
        producer: RefCell<Option<Rc<dyn Producer<i32>>>>,
        items: RefCell<Vec<i32>>,
    }

    impl Consumer<i32> for DetachOnFirst {
        fn flowing_from(self: Rc<Self>, producer: Option<Rc<dyn Producer<i32>>>) -> Result<Flow> {
            *self.producer.borrow_mut() = producer;
            Ok(Flow::end())
        }

        fn receive(&self, item: i32) {
            self.items.borrow_mut().push(item);
            let producer = self.producer.borrow_mut().take();
            if let Some(producer) = producer {
                producer.flow_to(None).unwrap();
            }
        }

        fn flow_stopped(&self, _reason: StopReason) {}
    }

    #[test]
    fn test_detach_while_draining_keeps_values() {
        let (producer, consumer) = wrap(processor_from_fn(|x: i32| {
            Ok(Some(Production::values(vec![x, x + 1, x + 2])))
        }));
        let detacher = Rc::new(DetachOnFirst::default());
        producer.clone().flow_to(Some(detacher.clone())).unwrap();
        let upstream = Upstream::new();
        upstream.clone().flow_to(Some(consumer)).unwrap();

        upstream.push(1);
        assert_eq!(*detacher.items.borrow(), vec![1]);
        assert_eq!(upstream.pauses.get(), 1);

        let sink = CollectSink::new();
        producer.flow_to(Some(sink.consumer())).unwrap();
        assert_eq!(sink.items(), vec![2, 3]);
        assert_eq!(upstream.resumes.get(), 1);
    }

    /// Records items and holds a pause on its producer from the first one on.
    #[derive(Default)]
    struct HoldAfterFirst {
        producer: RefCell<Option<Rc<dyn Producer<i32>>>>,
        items: RefCell<Vec<i32>>,
        hold: RefCell<Option<PauseToken>>,
    }

    impl HoldAfterFirst {
        fn release(&self) {
            let token = self.hold.borrow_mut().take();
            if let Some(mut token) = token {
                token.resume();
            }
        }
    }

    impl Consumer<i32> for HoldAfterFirst {
        fn flowing_from(self: Rc<Self>, producer: Option<Rc<dyn Producer<i32>>>) -> Result<Flow> {
            *self.producer.borrow_mut() = producer;
            Ok(Flow::end())
        }

        fn receive(&self, item: i32) {
            let first = {
                let mut items = self.items.borrow_mut();
                items.push(item);
                items.len() == 1
            };
            if first {
                let producer = self.producer.borrow().clone();
                if let Some(producer) = producer {
                    let token = producer.pause_flow();
                    *self.hold.borrow_mut() = Some(token);
                }
            }
        }

        fn flow_stopped(&self, _reason: StopReason) {}
    }

    #[test]
    fn test_pause_carries_across_producer_swaps() {
        let (producer, consumer) = wrap(Doubler::default());
        let sink = CollectSink::new();
        producer.flow_to(Some(sink.consumer())).unwrap();
        let first = Upstream::new();
        first.clone().flow_to(Some(consumer.clone())).unwrap();

        let mut token = sink.pause().unwrap();
        assert_eq!(first.pauses.get(), 1);

        // Attaching the same producer again changes nothing.
        first.clone().flow_to(Some(consumer.clone())).unwrap();
        assert_eq!(first.pauses.get(), 1);
        assert_eq!(first.resumes.get(), 0);

        consumer.clone().flowing_from(None).unwrap();
        assert_eq!(first.resumes.get(), 1);

        let second = Upstream::new();
        second.clone().flow_to(Some(consumer)).unwrap();
        assert_eq!(second.pauses.get(), 1);
        second.push(4);
        assert!(sink.is_empty());

        token.resume();
        assert_eq!(second.resumes.get(), 1);
        assert_eq!(sink.items(), vec![8]);
        assert_eq!(first.pauses.get(), 1);
        assert_eq!(first.resumes.get(), 1);
    }

    #[test]
    fn test_swap_upstream_of_paused_chain() {
        let (front, front_in) = wrap(processor_from_fn(|x: i32| {
            Ok(Some(Production::values(vec![x, x + 100])))
        }));
        let (back, back_in) = wrap(processor_from_fn(|y: i32| {
            Ok(Some(Production::values(vec![y, y + 1000])))
        }));
        let sink = Rc::new(HoldAfterFirst::default());
        back.flow_to(Some(sink.clone())).unwrap();
        front.flow_to(Some(back_in)).unwrap();

        let first = Upstream::new();
        first.clone().flow_to(Some(front_in.clone())).unwrap();
        first.push(1);
        assert_eq!(*sink.items.borrow(), vec![1]);
        assert_eq!(first.pauses.get(), 1);

        let second = Upstream::new();
        second.clone().flow_to(Some(front_in)).unwrap();
        assert_eq!(*sink.items.borrow(), vec![1]);
        assert_eq!(first.resumes.get(), 1);
        assert_eq!(second.pauses.get(), 1);

        sink.release();
        assert_eq!(*sink.items.borrow(), vec![1, 1001, 101, 1101]);
        assert_eq!(second.resumes.get(), 1);
    }

    #[test]
    fn test_finished_pipeline_is_freed() {
        let (producer, consumer) = wrap(Doubler::default());
        let sink = CollectSink::new();
        producer.clone().flow_to(Some(sink.consumer())).unwrap();
        let source = IteratorSource::new(vec![1, 2, 3]);
        source.clone().flow_to(Some(consumer.clone())).unwrap();
        assert_eq!(sink.items(), vec![2, 4, 6]);
        assert!(matches!(sink.stop_reason(), Some(StopReason::Finished)));

        let stage = Rc::downgrade(&producer);
        let source_ref = Rc::downgrade(&source);
        drop((producer, consumer, source, sink));
        assert!(stage.upgrade().is_none());
        assert!(source_ref.upgrade().is_none());
    }

    #[test]
    fn test_failed_stage_lets_go_of_upstream() {
        let stage = Stage::new(Doubler {
            fail_on: Some(1),
            ..Default::default()
        })
        .reporter(CollectReporter::new());
        let (upstream, sink) = connect(stage);

        upstream.push(1);
        assert!(sink.is_stopped());
        assert!(sink.producer().is_some());

        let upstream_ref = Rc::downgrade(&upstream);
        drop(upstream);
        assert!(upstream_ref.upgrade().is_none());
    }

    #[test]
    #[should_panic(expected = "before its previous output was delivered")]
    fn test_receive_while_output_buffered_panics() {
        let (_producer, consumer) = wrap(Doubler::default());
        let upstream = Upstream::new();
        upstream.clone().flow_to(Some(consumer)).unwrap();

        upstream.push(1);
        upstream.force(2);
    }
}
