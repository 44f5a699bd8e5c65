//! Frame sampler.
//!
//! Pulls one frame per tick and runs the detector on every Nth frame only.
//! Between detection passes the previous detection set is reused so the
//! display overlay keeps up with the sensor rate. Read and detector failures
//! turn into `SampleOutcome::Skipped`; nothing here touches the cart.

use crate::detect::{Detection, DetectorBackend};
use crate::frame::Frame;
use crate::ingest::FrameSource;

/// Why a tick produced no sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    SensorFault(String),
    DetectorFault(String),
}

/// A frame paired with the detection set that applies to it.
#[derive(Debug)]
pub struct SampledTick {
    pub frame: Frame,
    pub detections: Vec<Detection>,
    /// True when `detections` came from a detector pass on this frame.
    pub fresh: bool,
}

#[derive(Debug)]
pub enum SampleOutcome {
    Sampled(SampledTick),
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub fresh: u64,
    pub reused: u64,
    pub skipped: u64,
}

pub struct FrameSampler {
    interval: u32,
    since_detection: u32,
    last_detections: Vec<Detection>,
    stats: SamplerStats,
}

impl FrameSampler {
    /// `interval` is clamped to at least 1 (detect every frame).
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            since_detection: 0,
            last_detections: Vec::new(),
            stats: SamplerStats::default(),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Detections from the most recent successful detector pass.
    pub fn last_detections(&self) -> &[Detection] {
        &self.last_detections
    }

    pub fn sample(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
    ) -> SampleOutcome {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.skipped += 1;
                return SampleOutcome::Skipped(SkipReason::SensorFault(e.to_string()));
            }
        };

        self.since_detection += 1;
        if self.since_detection < self.interval {
            self.stats.reused += 1;
            return SampleOutcome::Sampled(SampledTick {
                frame,
                detections: self.last_detections.clone(),
                fresh: false,
            });
        }
        self.since_detection = 0;

        match detector.detect(&frame) {
            Ok(detections) => {
                self.stats.fresh += 1;
                self.last_detections = detections.clone();
                SampleOutcome::Sampled(SampledTick {
                    frame,
                    detections,
                    fresh: true,
                })
            }
            Err(e) => {
                self.stats.skipped += 1;
                SampleOutcome::Skipped(SkipReason::DetectorFault(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedBackend;
    use crate::ingest::{SyntheticConfig, SyntheticSource};

    fn connected_source(fail_every: Option<u64>) -> SyntheticSource {
        let mut source = SyntheticSource::new(SyntheticConfig {
            fail_every,
            ..SyntheticConfig::default()
        });
        source.connect().expect("connect");
        source
    }

    fn labels(outcome: &SampleOutcome) -> Option<(Vec<String>, bool)> {
        match outcome {
            SampleOutcome::Sampled(tick) => Some((
                tick.detections.iter().map(|d| d.label.clone()).collect(),
                tick.fresh,
            )),
            SampleOutcome::Skipped(_) => None,
        }
    }

    #[test]
    fn detects_every_third_frame_and_reuses_between() {
        let mut source = connected_source(None);
        let mut detector = ScriptedBackend::from_labels(&[&["apple"], &["banana"]]);
        let mut sampler = FrameSampler::new(3);

        let outcomes: Vec<_> = (0..6)
            .map(|_| labels(&sampler.sample(&mut source, &mut detector)).unwrap())
            .collect();

        assert_eq!(outcomes[0], (vec![], false));
        assert_eq!(outcomes[1], (vec![], false));
        assert_eq!(outcomes[2], (vec!["apple".to_string()], true));
        assert_eq!(outcomes[3], (vec!["apple".to_string()], false));
        assert_eq!(outcomes[4], (vec!["apple".to_string()], false));
        assert_eq!(outcomes[5], (vec!["banana".to_string()], true));
        assert_eq!(detector.calls(), 2);
        assert_eq!(
            sampler.stats(),
            SamplerStats {
                fresh: 2,
                reused: 4,
                skipped: 0
            }
        );
    }

    #[test]
    fn sensor_failure_skips_without_advancing_cadence() {
        let mut source = connected_source(Some(2));
        let mut detector = ScriptedBackend::from_labels(&[&["pen"]]);
        let mut sampler = FrameSampler::new(2);

        assert!(labels(&sampler.sample(&mut source, &mut detector)).is_some());
        match sampler.sample(&mut source, &mut detector) {
            SampleOutcome::Skipped(SkipReason::SensorFault(_)) => {}
            other => panic!("expected sensor skip, got {:?}", other),
        }
        let (dets, fresh) = labels(&sampler.sample(&mut source, &mut detector)).unwrap();
        assert!(fresh);
        assert_eq!(dets, vec!["pen".to_string()]);
    }

    #[test]
    fn detector_failure_is_a_skip_and_keeps_previous_set() {
        let mut source = connected_source(None);
        let mut detector = ScriptedBackend::parse("cup;!").unwrap();
        let mut sampler = FrameSampler::new(1);

        assert!(labels(&sampler.sample(&mut source, &mut detector)).is_some());
        match sampler.sample(&mut source, &mut detector) {
            SampleOutcome::Skipped(SkipReason::DetectorFault(reason)) => {
                assert!(reason.contains("scripted failure"))
            }
            other => panic!("expected detector skip, got {:?}", other),
        }
        assert_eq!(sampler.last_detections()[0].label, "cup");
        assert_eq!(sampler.stats().skipped, 1);
    }
}
