//! # Cooperative flow control for single-threaded pipelines
//!
//! This crate connects producers and consumers into pipelines where every
//! item is pushed, and backpressure travels the other way as pause and stop
//! requests.
//!
//! ## Core Concepts
//!
//! - **Producer**: Pushes items to the consumer it flows to, and can be paused or stopped
//! - **Consumer**: Receives items and learns when its producer stops
//! - **Processor**: A single-purpose transform with no flow-control logic of its own
//! - **Stage**: Wraps a processor into a consumer/producer pair that handles
//!   pausing, buffering, pending values and stop propagation
//!
//! ## Example
//!
//! ```rust
//! use flowtube::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let (doubled, input) = Stage::new(MapProcessor::new(|x: i64| x * 2))
//!         .name("double")
//!         .build();
//!
//!     let sink = CollectSink::new();
//!     doubled.flow_to(Some(sink.consumer()))?;
//!     IteratorSource::new(1..101).flow_to(Some(input))?;
//!
//!     assert_eq!(sink.len(), 100);
//!     assert!(matches!(sink.stop_reason(), Some(StopReason::Finished)));
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod processors;
pub mod sinks;
pub mod sources;
pub mod stage;
pub mod util;

pub(crate) mod metrics;

// Re-export commonly used items
pub mod prelude {
    pub use crate::core::{
        Consumer, Error, ErrorReporter, Flow, Kind, Output, PauseToken, Pauser, Produced,
        Processor, Producer, Production, Result, StopReason,
    };
    pub use crate::processors::*;
    pub use crate::sinks::*;
    pub use crate::sources::*;
    pub use crate::stage::{wrap, AsyncFaultPolicy, Stage, StageConfig};
    pub use crate::util::{processor_from_fn, CollectReporter, TokioSpawner, TracingReporter};
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
