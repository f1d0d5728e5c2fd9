//! Core traits and types for the flowtube library.
//!
//! This module contains the fundamental traits, error types and flow-control
//! primitives that define the flowtube processing model.

pub mod error;
pub mod kind;
pub mod output;
pub mod pause;
pub mod traits;

// Re-export core items
pub use error::{Error, IntoError, Result, StopReason};
pub use kind::Kind;
pub use output::{Output, Production};
pub use pause::{PauseToken, Pauser};
pub use traits::{Consumer, ErrorReporter, Flow, Processor, Produced, Producer};
