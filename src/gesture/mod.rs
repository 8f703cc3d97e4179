//! Gesture module: from finger counts to dispatched commands
//!
//! - Stabilizer: majority vote over the last few frames
//! - Dispatcher: cooldown gate with per-session state
//! - Pipeline: the frame loop tying both to the dispatch queue

mod dispatcher;
mod pipeline;
mod stabilizer;

pub use pipeline::{GesturePipeline, PipelineSettings, SessionControl};
