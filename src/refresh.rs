//! Periodic cart reader for the operator display.
//!
//! Reads a consistent snapshot and the counters on a fixed interval and hands
//! them to a callback. Never writes to the ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::ledger::{CartSnapshot, Counters, Ledger};

pub struct RefreshTimer {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RefreshTimer {
    pub fn spawn<F>(ledger: Arc<Ledger>, interval: Duration, mut on_refresh: F) -> Result<Self>
    where
        F: FnMut(&CartSnapshot, &Counters) + Send + 'static,
    {
        if interval.is_zero() {
            return Err(anyhow!("refresh interval must be greater than zero"));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = Arc::clone(&shutdown);
        let join = std::thread::Builder::new()
            .name("till-refresh".to_string())
            .spawn(move || {
                while !shutdown_thread.load(Ordering::SeqCst) {
                    let snapshot = ledger.snapshot();
                    let counters = ledger.counters();
                    on_refresh(&snapshot, &counters);
                    std::thread::sleep(interval);
                }
            })?;
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("refresh thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
