//! Rolling majority vote over recent finger counts

use std::collections::VecDeque;

/// Fixed-size window of raw counts whose mode is the stable count
#[derive(Debug, Clone)]
pub struct Stabilizer {
    window: VecDeque<u8>,
    capacity: usize,
}

impl Stabilizer {
    /// Create a stabilizer over the last `capacity` counts (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a raw count and return the stabilized one
    pub fn push(&mut self, count: u8) -> u8 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(count);
        self.stable()
    }

    /// Mode of the window; ties go to the value seen most recently
    pub fn stable(&self) -> u8 {
        // Counts are 0..=5 but tolerate anything a u8 can hold
        let mut tally = [0usize; 256];
        for &c in &self.window {
            tally[c as usize] += 1;
        }

        let mut best: Option<(usize, u8)> = None;
        // Walk newest to oldest so the first value reaching a score keeps it
        for &c in self.window.iter().rev() {
            let n = tally[c as usize];
            if best.map_or(true, |(top, _)| n > top) {
                best = Some((n, c));
            }
        }

        best.map_or(0, |(_, c)| c)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn clear(&mut self) {
        self.window.clear();
    }
}
