//! Synthetic frame source (`stub://`).
//!
//! Produces deterministic frames for demos and tests. It can be told to fail
//! every Nth read to exercise the sampler's transient-fault path.

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source URL (e.g., "stub://counter").
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Fail every Nth read (1-based). `None` never fails.
    pub fail_every: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://counter".to_string(),
            width: 64,
            height: 48,
            fail_every: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    connected: bool,
    reads: u64,
    frame_count: u64,
    failures: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            connected: false,
            reads: 0,
            frame_count: 0,
            failures: 0,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!(
                "synthetic source {} not connected; call connect() first",
                self.config.url
            ));
        }
        self.reads += 1;
        if let Some(every) = self.config.fail_every {
            if every > 0 && self.reads % every == 0 {
                self.failures += 1;
                return Err(anyhow!("synthetic read failure #{}", self.failures));
            }
        }
        self.frame_count += 1;
        Ok(Frame::new(
            self.generate_pixels(),
            self.config.width,
            self.config.height,
            self.frame_count,
        ))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            read_failures: self.failures,
            source: self.config.url.clone(),
        }
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("SyntheticSource: released {}", self.config.url);
        }
        self.connected = false;
    }
}
