use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// One scripted detector call.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptStep {
    Labels(Vec<String>),
    Fail(String),
}

/// Replays a fixed per-call script of labels.
///
/// Used by tests and `stub://` demo runs in place of a real model. Once the
/// script runs out the backend reports nothing, unless it was built looping.
pub struct ScriptedBackend {
    script: Vec<ScriptStep>,
    pending: VecDeque<ScriptStep>,
    looping: bool,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            pending: script.iter().cloned().collect(),
            script,
            looping: false,
            calls: 0,
        }
    }

    /// Build from label sets, one per detector call.
    pub fn from_labels(calls: &[&[&str]]) -> Self {
        Self::new(
            calls
                .iter()
                .map(|labels| ScriptStep::Labels(labels.iter().map(|l| l.to_string()).collect()))
                .collect(),
        )
    }

    /// Parse `apple,banana;;apple;!` style scripts.
    ///
    /// `;` separates calls, `,` separates labels within a call, an empty call
    /// detects nothing and `!` makes the call fail.
    pub fn parse(script: &str) -> Result<Self> {
        if script.trim().is_empty() {
            return Err(anyhow!("detector script must not be empty"));
        }
        let steps = script
            .split(';')
            .map(|step| {
                let step = step.trim();
                if step == "!" {
                    ScriptStep::Fail("scripted failure".to_string())
                } else {
                    ScriptStep::Labels(
                        step.split(',')
                            .map(|label| label.trim())
                            .filter(|label| !label.is_empty())
                            .map(|label| label.to_string())
                            .collect(),
                    )
                }
            })
            .collect();
        Ok(Self::new(steps))
    }

    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn next_step(&mut self) -> Option<ScriptStep> {
        if self.pending.is_empty() && self.looping {
            self.pending = self.script.iter().cloned().collect();
        }
        self.pending.pop_front()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.next_step() {
            Some(ScriptStep::Labels(labels)) => {
                Ok(labels.into_iter().map(Detection::labelled).collect())
            }
            Some(ScriptStep::Fail(reason)) => Err(anyhow!(reason)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, 1)
    }

    fn labels(dets: Vec<Detection>) -> Vec<String> {
        dets.into_iter().map(|d| d.label).collect()
    }

    #[test]
    fn parse_handles_empty_calls_and_failures() {
        let mut backend = ScriptedBackend::parse("apple, banana;;!;Apple").unwrap();
        assert_eq!(labels(backend.detect(&frame()).unwrap()), vec!["apple", "banana"]);
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert!(backend.detect(&frame()).is_err());
        assert_eq!(labels(backend.detect(&frame()).unwrap()), vec!["apple"]);
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert_eq!(backend.calls(), 5);
    }

    #[test]
    fn looping_script_restarts() {
        let mut backend = ScriptedBackend::from_labels(&[&["pen"], &[]]).looping();
        assert_eq!(labels(backend.detect(&frame()).unwrap()), vec!["pen"]);
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert_eq!(labels(backend.detect(&frame()).unwrap()), vec!["pen"]);
    }

    #[test]
    fn empty_script_is_rejected() {
        assert!(ScriptedBackend::parse("  ").is_err());
    }
}
