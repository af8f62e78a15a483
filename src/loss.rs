use std::collections::VecDeque;

/// Number of losses which may be accepted without retransmission in any `window` consecutive
/// attempts, given a reliability percentage. A reliability of 0 tolerates any amount of loss.
pub fn loss_distance_max(reliability: u8, window: u32) -> u32 {
    debug_assert!(reliability <= 100);

    if reliability == 0 {
        return u32::MAX;
    }

    let tolerated = 100 - u64::from(reliability);

    (u64::from(window) * tolerated / 100) as u32
}

/// Sliding record of the last `window` attempts, tracking how many of them were written off.
#[derive(Debug)]
pub struct LossBudget {
    // true for an accepted loss, false for a delivery
    history: VecDeque<bool>,
    window: usize,
    // Number of true entries in history
    accepted: u32,
    max: u32,
}

impl LossBudget {
    pub fn new(window: u32, max: u32) -> Self {
        debug_assert!(window > 0);

        Self {
            history: VecDeque::new(),
            window: window as usize,
            accepted: 0,
            max,
        }
    }

    fn push(&mut self, lost: bool) {
        if self.history.len() >= self.window {
            if let Some(true) = self.history.pop_front() {
                self.accepted -= 1;
            }
        }

        self.history.push_back(lost);

        if lost {
            self.accepted += 1;
        }
    }

    /// Returns true and counts the loss if one more accepted loss keeps the trailing window
    /// within budget. Returns false (and records nothing) otherwise.
    pub fn admit_loss(&mut self) -> bool {
        if self.max == u32::MAX {
            self.push(true);
            return true;
        }

        // The oldest entry leaves the window when this attempt is recorded
        let evicted = self.history.len() >= self.window && self.history.front() == Some(&true);
        let accepted_after_evict = self.accepted - evicted as u32;

        if accepted_after_evict < self.max {
            self.push(true);
            true
        } else {
            false
        }
    }

    pub fn record_delivered(&mut self) {
        self.push(false);
    }

    pub fn loss_distance(&self) -> u32 {
        self.accepted
    }

    pub fn loss_distance_max(&self) -> u32 {
        self.max
    }

    pub fn reset(&mut self, max: u32) {
        self.history.clear();
        self.accepted = 0;
        self.max = max;
    }
}
