//! Counters recorded by stages when the `metrics` feature is enabled.
//!
//! Without the feature every function here compiles to nothing.

#[cfg(feature = "metrics")]
pub(crate) fn item_delivered(stage: &str) {
    ::metrics::counter!("flowtube_items_delivered_total", "stage" => stage.to_owned()).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn pause_started(stage: &str) {
    ::metrics::counter!("flowtube_pauses_total", "stage" => stage.to_owned()).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn fault(stage: &str) {
    ::metrics::counter!("flowtube_faults_total", "stage" => stage.to_owned()).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn item_delivered(_stage: &str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn pause_started(_stage: &str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn fault(_stage: &str) {}
