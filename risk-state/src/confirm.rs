use serde::{Deserialize, Serialize};

/// Consecutive raw hits of one indicator for one instrument.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Confirmation {
    pub consecutive_hits: u32,
    pub last_raw: bool,
}

impl Confirmation {
    /// Record a raw observation and return whether the indicator is now confirmed.
    ///
    /// Any false observation resets the count. The count saturates at `threshold`.
    pub fn observe(&mut self, raw: bool, threshold: u32) -> bool {
        self.last_raw = raw;
        self.consecutive_hits = if raw {
            self.consecutive_hits.saturating_add(1).min(threshold)
        } else {
            0
        };
        self.is_confirmed(threshold)
    }

    pub fn is_confirmed(&self, threshold: u32) -> bool {
        self.last_raw && self.consecutive_hits >= threshold
    }
}
