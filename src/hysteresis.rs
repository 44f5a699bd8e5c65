//! Presence/absence hysteresis.
//!
//! Decides when a run of detections is a real item in front of the sensor and
//! when the counter area has gone empty. Admission into the cart is allowed only
//! from `ConfirmedPresent`. The absence threshold is larger than the presence
//! threshold, so leaving "present" takes longer than entering it.
//!
//! Owned by the detection thread alone; no locking.

/// Counters never grow past this value during long idle or dwell periods.
pub const STREAK_CEILING: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresencePhase {
    Empty,
    BuildingPresence,
    ConfirmedPresent,
    BuildingAbsence,
}

/// Result of feeding one tick into the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub phase: PresencePhase,
    /// True on the tick that closed an admitted cycle.
    pub cycle_closed: bool,
}

impl PresenceUpdate {
    pub fn admission_allowed(&self) -> bool {
        self.phase == PresencePhase::ConfirmedPresent
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceThresholds {
    pub presence_frames: u32,
    pub absence_frames: u32,
}

impl Default for PresenceThresholds {
    fn default() -> Self {
        Self {
            presence_frames: 2,
            absence_frames: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PresenceTracker {
    thresholds: PresenceThresholds,
    presence_streak: u32,
    absence_streak: u32,
    admission_opened_this_cycle: bool,
    phase: PresencePhase,
    cycles_closed: u64,
}

impl PresenceTracker {
    pub fn new(thresholds: PresenceThresholds) -> Self {
        Self {
            thresholds: PresenceThresholds {
                presence_frames: thresholds.presence_frames.clamp(1, STREAK_CEILING),
                absence_frames: thresholds.absence_frames.clamp(1, STREAK_CEILING),
            },
            presence_streak: 0,
            absence_streak: 0,
            admission_opened_this_cycle: false,
            phase: PresencePhase::Empty,
            cycles_closed: 0,
        }
    }

    /// Feed one tick. `valid_detections` counts catalog-matched detections only.
    pub fn observe(&mut self, valid_detections: usize) -> PresenceUpdate {
        if valid_detections > 0 {
            self.presence_streak = (self.presence_streak + 1).min(STREAK_CEILING);
            self.absence_streak = 0;
            self.phase = if self.presence_streak >= self.thresholds.presence_frames {
                PresencePhase::ConfirmedPresent
            } else {
                PresencePhase::BuildingPresence
            };
            return PresenceUpdate {
                phase: self.phase,
                cycle_closed: false,
            };
        }

        self.absence_streak = (self.absence_streak + 1).min(STREAK_CEILING);
        self.presence_streak = 0;

        if self.admission_opened_this_cycle
            && self.absence_streak >= self.thresholds.absence_frames
        {
            self.reset_cycle();
            return PresenceUpdate {
                phase: self.phase,
                cycle_closed: true,
            };
        }

        self.phase = if self.admission_opened_this_cycle {
            PresencePhase::BuildingAbsence
        } else {
            PresencePhase::Empty
        };
        PresenceUpdate {
            phase: self.phase,
            cycle_closed: false,
        }
    }

    /// Record that at least one item was admitted in the current cycle.
    pub fn mark_admitted(&mut self) {
        self.admission_opened_this_cycle = true;
    }

    fn reset_cycle(&mut self) {
        self.presence_streak = 0;
        self.absence_streak = 0;
        self.admission_opened_this_cycle = false;
        self.phase = PresencePhase::Empty;
        self.cycles_closed += 1;
    }

    pub fn phase(&self) -> PresencePhase {
        self.phase
    }

    pub fn presence_streak(&self) -> u32 {
        self.presence_streak
    }

    pub fn absence_streak(&self) -> u32 {
        self.absence_streak
    }

    pub fn cycle_open(&self) -> bool {
        self.admission_opened_this_cycle
    }

    pub fn cycles_closed(&self) -> u64 {
        self.cycles_closed
    }

    pub fn thresholds(&self) -> PresenceThresholds {
        self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(PresenceThresholds::default())
    }

    #[test]
    fn presence_needs_consecutive_ticks() {
        let mut t = tracker();
        assert_eq!(t.observe(1).phase, PresencePhase::BuildingPresence);
        assert_eq!(t.observe(0).phase, PresencePhase::Empty);
        assert_eq!(t.observe(1).phase, PresencePhase::BuildingPresence);
        let update = t.observe(2);
        assert_eq!(update.phase, PresencePhase::ConfirmedPresent);
        assert!(update.admission_allowed());
        assert!(t.observe(1).admission_allowed());
    }

    #[test]
    fn cycle_closes_only_after_admission_and_full_absence_run() {
        let mut t = tracker();
        t.observe(1);
        t.observe(1);
        t.mark_admitted();

        for _ in 0..7 {
            let update = t.observe(0);
            assert_eq!(update.phase, PresencePhase::BuildingAbsence);
            assert!(!update.cycle_closed);
        }
        let update = t.observe(0);
        assert!(update.cycle_closed);
        assert_eq!(update.phase, PresencePhase::Empty);
        assert!(!t.cycle_open());
        assert_eq!(t.absence_streak(), 0);
        assert_eq!(t.cycles_closed(), 1);
    }

    #[test]
    fn interrupted_absence_does_not_close_cycle() {
        let mut t = tracker();
        t.observe(1);
        t.observe(1);
        t.mark_admitted();
        for _ in 0..7 {
            t.observe(0);
        }
        t.observe(1);
        for _ in 0..7 {
            assert!(!t.observe(0).cycle_closed);
        }
        assert!(t.cycle_open());
    }

    #[test]
    fn idle_without_admission_never_closes_and_stays_clamped() {
        let mut t = tracker();
        for _ in 0..(STREAK_CEILING + 50) {
            let update = t.observe(0);
            assert!(!update.cycle_closed);
            assert_eq!(update.phase, PresencePhase::Empty);
        }
        assert_eq!(t.absence_streak(), STREAK_CEILING);
        assert_eq!(t.cycles_closed(), 0);
    }

    #[test]
    fn zero_thresholds_are_raised_to_one() {
        let mut t = PresenceTracker::new(PresenceThresholds {
            presence_frames: 0,
            absence_frames: 0,
        });
        assert!(t.observe(1).admission_allowed());
        t.mark_admitted();
        assert!(t.observe(0).cycle_closed);
    }
}
