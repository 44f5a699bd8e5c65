//! One detection tick: sample, filter to the catalog, gate on presence, admit.
//!
//! The pipeline owns the sampler and the presence tracker; the cart and the
//! cooldown table live in the shared `Ledger`. Skipped ticks leave every piece
//! of state untouched, cooldowns included.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::detect::SharedBackend;
use crate::hysteresis::{PresencePhase, PresenceThresholds, PresenceTracker};
use crate::ingest::FrameSource;
use crate::ledger::Ledger;
use crate::sampler::{FrameSampler, SampleOutcome, SkipReason};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    /// Detector ran on this frame.
    Fresh,
    /// Previous detection set reused.
    Reused,
    Skipped,
}

/// What happened on one tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub kind: TickKind,
    pub skip_reason: Option<SkipReason>,
    /// Catalog-matched labels seen this tick, deduplicated.
    pub valid_labels: Vec<String>,
    pub phase: PresencePhase,
    pub cycle_closed: bool,
    pub admitted: Vec<String>,
    pub frame_sequence: Option<u64>,
}

pub struct DetectionPipeline {
    ledger: Arc<Ledger>,
    detector: SharedBackend,
    sampler: FrameSampler,
    tracker: PresenceTracker,
}

impl DetectionPipeline {
    pub fn new(
        ledger: Arc<Ledger>,
        detector: SharedBackend,
        detection_interval: u32,
        thresholds: PresenceThresholds,
    ) -> Self {
        Self {
            ledger,
            detector,
            sampler: FrameSampler::new(detection_interval),
            tracker: PresenceTracker::new(thresholds),
        }
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    pub fn tick(&mut self, source: &mut dyn FrameSource) -> TickReport {
        // A backend that panicked mid-detect leaves the lock poisoned; the
        // backend itself is still usable for the next frame.
        let mut detector = match self.detector.lock() {
            Ok(detector) => detector,
            Err(poisoned) => {
                log::warn!("detector lock poisoned by an earlier panic; recovering");
                self.detector.clear_poison();
                poisoned.into_inner()
            }
        };
        let outcome = self.sampler.sample(source, &mut *detector);
        drop(detector);

        let sampled = match outcome {
            SampleOutcome::Sampled(sampled) => sampled,
            SampleOutcome::Skipped(reason) => {
                log::debug!("tick skipped: {:?}", reason);
                return TickReport {
                    kind: TickKind::Skipped,
                    skip_reason: Some(reason),
                    valid_labels: Vec::new(),
                    phase: self.tracker.phase(),
                    cycle_closed: false,
                    admitted: Vec::new(),
                    frame_sequence: None,
                };
            }
        };

        let catalog = self.ledger.catalog();
        let mut valid = BTreeSet::new();
        for detection in &sampled.detections {
            if catalog.contains(&detection.label) {
                valid.insert(detection.label.clone());
            } else {
                log::debug!("ignoring non-catalog label '{}'", detection.label);
            }
        }
        let valid_labels: Vec<String> = valid.into_iter().collect();

        let update = self.tracker.observe(valid_labels.len());
        if update.cycle_closed {
            log::info!("counter area clear; detection cycle closed");
        }

        let admitted = if update.admission_allowed() {
            self.ledger.admit_detected(&valid_labels)
        } else {
            Vec::new()
        };
        if !admitted.is_empty() {
            self.tracker.mark_admitted();
        }
        self.ledger.tick_cooldowns();

        TickReport {
            kind: if sampled.fresh {
                TickKind::Fresh
            } else {
                TickKind::Reused
            },
            skip_reason: None,
            valid_labels,
            phase: update.phase,
            cycle_closed: update.cycle_closed,
            admitted,
            frame_sequence: Some(sampled.frame.sequence),
        }
    }
}
