//! Landmark frames as delivered by the pose estimator
//!
//! One JSON object per line:
//! `{"hands":[{"score":0.93,"landmarks":[{"x":..,"y":..,"z":..}, ...]}]}`

use serde::Deserialize;

use super::hand::{HandLandmarks, Landmark};

/// Errors raised while decoding a frame line
#[derive(Debug, thiserror::Error)]
pub enum LandmarkError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("hand {hand} has {found} landmarks, expected 21")]
    WrongPointCount { hand: usize, found: usize },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    hands: Vec<RawHand>,
}

#[derive(Debug, Deserialize)]
struct RawHand {
    #[serde(default)]
    score: Option<f32>,
    landmarks: Vec<Landmark>,
}

/// A hand as detected in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedHand {
    /// Detector confidence, if the estimator reports one
    pub score: Option<f32>,
    pub landmarks: HandLandmarks,
}

/// All hands detected in one camera frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub hands: Vec<DetectedHand>,
}

impl Frame {
    /// Decode one line of estimator output
    pub fn parse(line: &str) -> Result<Self, LandmarkError> {
        let raw: RawFrame = serde_json::from_str(line)?;

        let hands = raw
            .hands
            .into_iter()
            .enumerate()
            .map(|(i, hand)| {
                HandLandmarks::from_points(&hand.landmarks)
                    .map(|landmarks| DetectedHand {
                        score: hand.score,
                        landmarks,
                    })
                    .ok_or(LandmarkError::WrongPointCount {
                        hand: i,
                        found: hand.landmarks.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { hands })
    }

    /// The hand that decides the count: the last one at or above `min_score`
    ///
    /// Hands without a score are trusted.
    pub fn primary_hand(&self, min_score: f32) -> Option<&HandLandmarks> {
        self.hands
            .iter()
            .filter(|h| h.score.map_or(true, |s| s >= min_score))
            .last()
            .map(|h| &h.landmarks)
    }
}
