//! Background detection worker.
//!
//! Owns the frame source and runs `DetectionPipeline::tick` in a loop until
//! stopped. A tick failure is logged and the loop carries on; the thread only
//! exits on `stop()`. A panic in the detector backend or the tick observer is
//! caught and counted as a skipped tick. A source that reports itself
//! unhealthy after a read failure is reconnected in place. The source is
//! released before the thread returns so a restart can reopen the same device.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::SharedBackend;
use crate::hysteresis::PresenceThresholds;
use crate::ingest::FrameSource;
use crate::ledger::Ledger;
use crate::pipeline::{DetectionPipeline, TickKind, TickReport};
use crate::sampler::SkipReason;

/// Called on the worker thread after every tick.
pub type TickObserver = Arc<dyn Fn(&TickReport) + Send + Sync>;

#[derive(Clone, Copy, Debug)]
pub struct WorkerSettings {
    pub detection_interval: u32,
    pub thresholds: PresenceThresholds,
    /// Pause between ticks.
    pub loop_yield: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            detection_interval: 3,
            thresholds: PresenceThresholds::default(),
            loop_yield: Duration::from_millis(10),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub ticks: u64,
    pub fresh: u64,
    pub reused: u64,
    pub skipped: u64,
    pub admissions: u64,
    pub cycles_closed: u64,
    /// Ticks cut short by a panic in the detector or the observer.
    pub panics: u64,
    /// Source reconnects after it reported itself unhealthy.
    pub reconnects: u64,
    /// Ticks per second over the last full second.
    pub fps: f64,
}

struct Running {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

pub struct DetectionWorker {
    ledger: Arc<Ledger>,
    detector: SharedBackend,
    settings: WorkerSettings,
    observer: Option<TickObserver>,
    stats: Arc<Mutex<WorkerStats>>,
    running: Option<Running>,
}

impl DetectionWorker {
    pub fn new(ledger: Arc<Ledger>, detector: SharedBackend, settings: WorkerSettings) -> Self {
        Self {
            ledger,
            detector,
            settings,
            observer: None,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
            running: None,
        }
    }

    pub fn with_observer(mut self, observer: TickObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Connect `source` and start ticking on a new thread.
    pub fn start(&mut self, mut source: Box<dyn FrameSource>) -> Result<()> {
        if self.running.is_some() {
            return Err(anyhow!("detection worker already running"));
        }
        source.connect()?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let mut pipeline = DetectionPipeline::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.detector),
            self.settings.detection_interval,
            self.settings.thresholds,
        );
        let observer = self.observer.clone();
        let stats = Arc::clone(&self.stats);
        let loop_yield = self.settings.loop_yield;

        let join = std::thread::Builder::new()
            .name("till-detect".to_string())
            .spawn(move || {
                let source_name = source.stats().source;
                log::info!("detection worker started on {}", source_name);
                let mut window_start = Instant::now();
                let mut window_ticks = 0u64;

                while !stop_thread.load(Ordering::SeqCst) {
                    let ticked =
                        panic::catch_unwind(AssertUnwindSafe(|| pipeline.tick(source.as_mut())));
                    window_ticks += 1;
                    let report = match ticked {
                        Ok(report) => report,
                        Err(payload) => {
                            log::error!(
                                "detection tick panicked on {}: {}",
                                source_name,
                                panic_message(payload.as_ref())
                            );
                            if let Ok(mut stats) = stats.lock() {
                                stats.ticks += 1;
                                stats.skipped += 1;
                                stats.panics += 1;
                            }
                            pause(loop_yield);
                            continue;
                        }
                    };

                    if let Ok(mut stats) = stats.lock() {
                        stats.ticks += 1;
                        match report.kind {
                            TickKind::Fresh => stats.fresh += 1,
                            TickKind::Reused => stats.reused += 1,
                            TickKind::Skipped => stats.skipped += 1,
                        }
                        stats.admissions += report.admitted.len() as u64;
                        if report.cycle_closed {
                            stats.cycles_closed += 1;
                        }
                        let elapsed = window_start.elapsed();
                        if elapsed >= Duration::from_secs(1) {
                            stats.fps = window_ticks as f64 / elapsed.as_secs_f64();
                            window_start = Instant::now();
                            window_ticks = 0;
                        }
                    }
                    if let Some(reason) = &report.skip_reason {
                        log::warn!("tick skipped on {}: {:?}", source_name, reason);
                        if matches!(reason, SkipReason::SensorFault(_)) && !source.is_healthy() {
                            log::error!("{} is unhealthy; reconnecting", source_name);
                            match source.connect() {
                                Ok(()) => {
                                    if let Ok(mut stats) = stats.lock() {
                                        stats.reconnects += 1;
                                    }
                                }
                                Err(e) => log::error!("reconnect to {} failed: {}", source_name, e),
                            }
                        }
                    }
                    if let Some(observer) = &observer {
                        if let Err(payload) =
                            panic::catch_unwind(AssertUnwindSafe(|| observer(&report)))
                        {
                            log::error!(
                                "tick observer panicked: {}",
                                panic_message(payload.as_ref())
                            );
                            if let Ok(mut stats) = stats.lock() {
                                stats.panics += 1;
                            }
                        }
                    }
                    pause(loop_yield);
                }

                source.release();
                log::info!("detection worker stopped; {} released", source_name);
            })?;

        self.running = Some(Running { stop, join });
        Ok(())
    }

    /// Signal the loop and wait for the thread to release its source.
    pub fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.stop.store(true, Ordering::SeqCst);
        running
            .join
            .join()
            .map_err(|_| anyhow!("detection worker thread panicked"))
    }

    /// Stop the current source and start again on `source`.
    pub fn restart(&mut self, source: Box<dyn FrameSource>) -> Result<()> {
        self.stop()?;
        self.start(source)
    }
}

fn pause(loop_yield: Duration) {
    if !loop_yield.is_zero() {
        std::thread::sleep(loop_yield);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogEntry};
    use crate::detect::{Detection, DetectorBackend, ScriptedBackend};
    use crate::frame::Frame;
    use crate::ingest::{SourceStats, SyntheticConfig, SyntheticSource};

    fn worker(script: &str) -> (DetectionWorker, Arc<Ledger>) {
        worker_with(Arc::new(Mutex::new(ScriptedBackend::parse(script).unwrap())))
    }

    fn worker_with(detector: SharedBackend) -> (DetectionWorker, Arc<Ledger>) {
        let catalog = Catalog::new(vec![CatalogEntry::new("apple", "Apel", 12000, 50)]).unwrap();
        let ledger = Arc::new(Ledger::new(Arc::new(catalog), 600));
        let settings = WorkerSettings {
            detection_interval: 1,
            loop_yield: Duration::from_millis(1),
            ..WorkerSettings::default()
        };
        (
            DetectionWorker::new(Arc::clone(&ledger), detector, settings),
            ledger,
        )
    }

    fn source() -> Box<dyn FrameSource> {
        Box::new(SyntheticSource::new(SyntheticConfig::default()))
    }

    type Events = Arc<Mutex<Vec<String>>>;

    /// Logs connect/release calls; drops the device after `drop_after` reads.
    struct RecordingSource {
        name: &'static str,
        events: Events,
        connected: bool,
        reads: u64,
        drop_after: Option<u64>,
    }

    impl RecordingSource {
        fn boxed(name: &'static str, events: &Events) -> Box<dyn FrameSource> {
            Box::new(Self {
                name,
                events: Arc::clone(events),
                connected: false,
                reads: 0,
                drop_after: None,
            })
        }
    }

    impl FrameSource for RecordingSource {
        fn connect(&mut self) -> Result<()> {
            self.connected = true;
            self.events.lock().unwrap().push(format!("connect {}", self.name));
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            if !self.connected {
                return Err(anyhow!("{} not connected", self.name));
            }
            self.reads += 1;
            if self.drop_after == Some(self.reads) {
                self.connected = false;
                return Err(anyhow!("{} unplugged", self.name));
            }
            Ok(Frame::new(vec![0; 12], 2, 2, self.reads))
        }

        fn is_healthy(&self) -> bool {
            self.connected
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                source: self.name.to_string(),
                ..SourceStats::default()
            }
        }

        fn release(&mut self) {
            self.connected = false;
            self.events.lock().unwrap().push(format!("release {}", self.name));
        }
    }

    struct PanicOnce {
        calls: u32,
    }

    impl DetectorBackend for PanicOnce {
        fn name(&self) -> &'static str {
            "panic-once"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("model crashed");
            }
            Ok(vec![Detection::labelled("apple")])
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn worker_admits_and_stops() {
        let (mut worker, ledger) = worker("apple;apple;apple");
        worker.start(source()).unwrap();
        assert!(worker.is_running());
        assert!(wait_for(|| ledger.snapshot().quantity("apple") == 1));
        worker.stop().unwrap();
        assert!(!worker.is_running());
        assert!(worker.stats().ticks >= 3);
        assert_eq!(worker.stats().admissions, 1);
    }

    #[test]
    fn double_start_is_rejected_and_restart_works() {
        let (mut worker, _ledger) = worker("apple");
        worker.start(source()).unwrap();
        assert!(worker.start(source()).is_err());
        worker.restart(source()).unwrap();
        assert!(worker.is_running());
        worker.stop().unwrap();
        worker.stop().unwrap();
    }

    #[test]
    fn sensor_faults_do_not_kill_the_loop() {
        let (worker, _ledger) = worker("apple");
        let seen = Arc::new(Mutex::new(0u64));
        let seen_cb = Arc::clone(&seen);
        let mut worker = worker.with_observer(Arc::new(move |_report: &TickReport| {
            *seen_cb.lock().unwrap() += 1;
        }));
        let flaky = Box::new(SyntheticSource::new(SyntheticConfig {
            fail_every: Some(2),
            ..SyntheticConfig::default()
        }));
        worker.start(flaky).unwrap();
        assert!(wait_for(|| worker.stats().skipped >= 3));
        worker.stop().unwrap();
        assert!(*seen.lock().unwrap() >= 6);
    }

    #[test]
    fn restart_releases_the_old_source_before_connecting_the_new_one() {
        let (mut worker, _ledger) = worker("apple");
        let events: Events = Arc::default();
        worker.start(RecordingSource::boxed("a", &events)).unwrap();
        worker.restart(RecordingSource::boxed("b", &events)).unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["connect a", "release a", "connect b"]);

        worker.stop().unwrap();
        assert_eq!(events.lock().unwrap().last().map(String::as_str), Some("release b"));
        assert_eq!(events.lock().unwrap().len(), 4);
    }

    #[test]
    fn unhealthy_source_is_reconnected() {
        let (mut worker, ledger) = worker("apple;apple;apple;apple");
        let events: Events = Arc::default();
        let source = Box::new(RecordingSource {
            name: "cam",
            events: Arc::clone(&events),
            connected: false,
            reads: 0,
            drop_after: Some(1),
        });
        worker.start(source).unwrap();
        assert!(wait_for(|| ledger.snapshot().quantity("apple") == 1));
        worker.stop().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.iter().filter(|e| *e == "connect cam").count(), 2);
        let stats = worker.stats();
        assert_eq!(stats.reconnects, 1);
        assert!(stats.skipped >= 1);
    }

    #[test]
    fn backend_panic_is_contained_and_detection_resumes() {
        let (mut worker, ledger) = worker_with(Arc::new(Mutex::new(PanicOnce { calls: 0 })));
        worker.start(source()).unwrap();
        assert!(wait_for(|| ledger.snapshot().quantity("apple") == 1));
        assert!(worker.is_running());
        worker.stop().unwrap();

        let stats = worker.stats();
        assert_eq!(stats.panics, 1);
        assert!(stats.skipped >= 1);
        assert_eq!(stats.admissions, 1);
    }

    #[test]
    fn observer_panic_does_not_stop_the_loop() {
        let (worker, _ledger) = worker("apple");
        let calls = Arc::new(Mutex::new(0u64));
        let calls_cb = Arc::clone(&calls);
        let mut worker = worker.with_observer(Arc::new(move |_report: &TickReport| {
            let mut calls = calls_cb.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                drop(calls);
                panic!("display gone");
            }
        }));
        worker.start(source()).unwrap();
        assert!(wait_for(|| *calls.lock().unwrap() >= 5));
        worker.stop().unwrap();
        assert_eq!(worker.stats().panics, 1);
    }
}
