//! Frame ingestion sources.
//!
//! Sources hand `Frame`s to the sampler one at a time. The sampler owns the
//! source for the lifetime of a detection worker; `release()` is called before
//! the worker exits so a restarted worker can reopen the same device.
//!
//! A read failure is reported as `Err` from `next_frame` and the sampler turns
//! it into a skipped tick. Sources never panic on a bad frame.

pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Readable frame source (camera, stream, synthetic feed).
pub trait FrameSource: Send {
    /// Open the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// False once the device is gone and reads will keep failing until the
    /// source is connected again.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;

    /// Release the device. Must be idempotent.
    fn release(&mut self) {}
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub source: String,
}

/// Open a source by URL.
///
/// Only `stub://` synthetic feeds are built in; device-backed sources plug in
/// through `FrameSource` directly.
pub fn open_source(url: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        let config = SyntheticConfig {
            url: url.to_string(),
            width,
            height,
            ..SyntheticConfig::default()
        };
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    Err(anyhow!(
        "unsupported frame source '{}': only stub:// sources are built in",
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_source_accepts_stub_urls_only() -> Result<()> {
        let mut source = open_source("stub://counter", 8, 6)?;
        source.connect()?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width, frame.height), (8, 6));

        assert!(open_source("rtsp://10.0.0.4/stream", 8, 6).is_err());
        Ok(())
    }
}
