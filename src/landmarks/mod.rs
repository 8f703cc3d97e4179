//! Landmark module for pose-estimator input
//!
//! Decodes per-frame hand landmarks and turns one hand into a finger
//! count. The estimator itself runs outside this process.

mod frame;
mod hand;
mod listener;

pub use frame::Frame;
pub use hand::count_fingers;
pub use listener::{FrameEvent, LandmarkListener};

#[cfg(test)]
pub(crate) use frame::DetectedHand;
#[cfg(test)]
pub(crate) use hand::tests::hand as test_hand;
