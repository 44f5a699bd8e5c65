//! Per-item cooldown table.
//!
//! An item that was just admitted stays suppressed for a fixed number of ticks
//! so a product resting in view is counted once per window rather than once per
//! frame. A key with no entry is not cooling down. The table lives inside the
//! ledger lock so the admit decision and the cart increment are one step.

use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct CooldownTable {
    duration: u32,
    remaining: HashMap<String, u32>,
}

impl CooldownTable {
    /// `duration` is clamped to at least one tick.
    pub fn new(duration: u32) -> Self {
        Self {
            duration: duration.max(1),
            remaining: HashMap::new(),
        }
    }

    /// Start a cooldown for `key` unless one is active. Returns true when the
    /// caller may admit the item.
    pub fn try_admit(&mut self, key: &str) -> bool {
        if self.is_cooling(key) {
            return false;
        }
        self.remaining.insert(key.to_string(), self.duration);
        true
    }

    /// Decay every entry by one tick, dropping those that reach zero.
    pub fn tick(&mut self) {
        self.remaining.retain(|_, left| {
            *left = left.saturating_sub(1);
            *left > 0
        });
    }

    pub fn is_cooling(&self, key: &str) -> bool {
        self.remaining.get(key).is_some_and(|left| *left > 0)
    }

    pub fn remaining(&self, key: &str) -> u32 {
        self.remaining.get(key).copied().unwrap_or(0)
    }

    pub fn active(&self) -> usize {
        self.remaining.len()
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_admit_inside_window_is_refused() {
        let mut table = CooldownTable::new(3);
        assert!(table.try_admit("apple"));
        assert!(!table.try_admit("apple"));
        assert!(table.try_admit("banana"));
        assert_eq!(table.remaining("apple"), 3);
    }

    #[test]
    fn entries_expire_after_duration_ticks() {
        let mut table = CooldownTable::new(3);
        assert!(table.try_admit("apple"));
        table.tick();
        table.tick();
        assert!(!table.try_admit("apple"));
        table.tick();
        assert_eq!(table.active(), 0);
        assert_eq!(table.remaining("apple"), 0);
        assert!(table.try_admit("apple"));
    }

    #[test]
    fn at_most_one_admission_per_window() {
        let duration = 10;
        let mut table = CooldownTable::new(duration);
        let mut admitted_at = Vec::new();
        for tick in 0..35u32 {
            if table.try_admit("cup") {
                admitted_at.push(tick);
            }
            table.tick();
        }
        assert_eq!(admitted_at, vec![0, 10, 20, 30]);
        for pair in admitted_at.windows(2) {
            assert!(pair[1] - pair[0] >= duration);
        }
    }
}
