//! Hand landmark definitions and finger counting
//!
//! Landmarks follow the 21-point hand model used by common pose
//! estimators: wrist at 0, then four points per finger from the base
//! joint out to the tip. Coordinates are normalized to the image, with
//! y growing downwards.

use serde::{Deserialize, Serialize};

/// Number of landmarks in one hand
pub const LANDMARK_COUNT: usize = 21;

/// Landmark indices for the joints the classifier looks at
pub mod index {
    /// Thumb interphalangeal joint
    pub const THUMB_IP: usize = 3;
    /// Thumb tip
    pub const THUMB_TIP: usize = 4;

    /// (tip, pip) pairs for index, middle, ring and little fingers
    pub const FINGER_TIP_PIP: [(usize, usize); 4] = [(8, 6), (12, 10), (16, 14), (20, 18)];
}

/// A single normalized keypoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    #[cfg(test)]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// The 21 landmarks of one detected hand
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    points: [Landmark; LANDMARK_COUNT],
}

impl HandLandmarks {
    /// Build from exactly 21 points
    pub fn from_points(points: &[Landmark]) -> Option<Self> {
        let points: [Landmark; LANDMARK_COUNT] = points.try_into().ok()?;
        Some(Self { points })
    }

    /// Access a landmark by index
    pub fn point(&self, idx: usize) -> Landmark {
        self.points[idx]
    }

    /// Mirror horizontally (x -> 1 - x)
    pub fn mirrored(&self) -> Self {
        let mut points = self.points;
        for p in points.iter_mut() {
            p.x = 1.0 - p.x;
        }
        Self { points }
    }

    /// Whether the thumb is extended
    ///
    /// Compares the tip against the joint below it on the x axis. On a
    /// mirrored frame an open thumb of the raised hand sits further right
    /// than its joint.
    pub fn thumb_extended(&self) -> bool {
        self.point(index::THUMB_TIP).x > self.point(index::THUMB_IP).x
    }

    /// Extension of index, middle, ring and little fingers, in that order
    pub fn fingers_extended(&self) -> [bool; 4] {
        index::FINGER_TIP_PIP.map(|(tip, pip)| self.point(tip).y < self.point(pip).y)
    }

    /// Number of extended fingers, 0..=5
    pub fn finger_count(&self) -> u8 {
        let thumb = u8::from(self.thumb_extended());
        let others = self
            .fingers_extended()
            .iter()
            .filter(|&&up| up)
            .count() as u8;
        thumb + others
    }
}

/// Count extended fingers; no hand counts as zero
pub fn count_fingers(hand: Option<&HandLandmarks>) -> u8 {
    hand.map_or(0, HandLandmarks::finger_count)
}
