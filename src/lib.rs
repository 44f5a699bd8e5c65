//! Vision Till
//!
//! A self-service checkout that adds items to the cart when the camera sees
//! them. Detections are gated twice before they touch the cart: a presence
//! hysteresis confirms something is really on the counter, and a per-item
//! cooldown keeps one item from being counted on every frame it stays in view.
//!
//! # Flow
//!
//! 1. `ingest` hands frames to the `sampler`, which runs the detector on every
//!    Nth frame and reuses the last result in between.
//! 2. `pipeline` filters detections to the catalog, feeds `hysteresis`, and
//!    admits items into the `ledger` through its `cooldown` table.
//! 3. `finalizer` turns the cart into a durable transaction: snapshot,
//!    payment artifact, COMPLETED record, stock decrement, then best-effort
//!    `sync` to the monitoring backend.
//!
//! # Module Structure
//!
//! - `catalog`, `stock`: item prices and persisted stock levels
//! - `ledger`: the shared cart, cooldowns and counters
//! - `storage`: append-only transaction log (SQLite)
//! - `worker`, `refresh`: background detection loop and display refresh

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod detect;
pub mod error;
pub mod finalizer;
pub mod frame;
pub mod hysteresis;
pub mod ingest;
pub mod ledger;
pub mod pipeline;
pub mod refresh;
pub mod sampler;
pub mod stock;
pub mod storage;
pub mod sync;
pub mod transaction;
pub mod worker;

pub use catalog::{Catalog, CatalogEntry};
pub use config::TillConfig;
pub use detect::{BackendRegistry, Detection, DetectorBackend, ScriptedBackend, SharedBackend, StubBackend};
pub use error::{TillError, TillResult};
pub use finalizer::{CheckoutState, FinalizeReceipt, Finalizer};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SyntheticConfig, SyntheticSource};
pub use ledger::{CartSnapshot, Counters, Ledger, RecentSale};
pub use pipeline::{DetectionPipeline, TickKind, TickReport};
pub use storage::{InMemoryTransactionLog, SqliteTransactionLog, StatusTotals, TransactionLog};
pub use sync::{BackendSync, DisabledSync, HttpBackendSync};
pub use transaction::{PaymentArtifact, PaymentMethod, TransactionRecord, TransactionStatus};
pub use worker::{DetectionWorker, WorkerSettings, WorkerStats};

/// Unique shared-cache in-memory SQLite URI, for tests that reopen one database.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:vision_till_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Detector registry with the built-in backends.
///
/// `scripted` is only registered when a script is configured; it loops so a
/// demo run keeps producing detections.
pub fn build_registry(script: Option<&str>) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    if let Some(script) = script {
        registry.register(ScriptedBackend::parse(script)?.looping());
    }
    Ok(registry)
}

/// The assembled till: catalog, cart, checkout and detector.
pub struct Till {
    pub catalog: Arc<Catalog>,
    pub ledger: Arc<Ledger>,
    pub finalizer: Arc<Finalizer>,
    pub detector: SharedBackend,
}

impl Till {
    /// Build a till from config. `offline` forces the disabled sync adapter.
    pub fn open(cfg: &TillConfig, offline: bool) -> Result<Self> {
        let entries = cfg
            .catalog
            .clone()
            .unwrap_or_else(Catalog::builtin_entries);
        let catalog = Arc::new(Catalog::new(entries)?.with_stock_file(&cfg.stock_path)?);
        let ledger = Arc::new(Ledger::new(Arc::clone(&catalog), cfg.cooldown_ticks));

        let log = SqliteTransactionLog::open(&cfg.db_path)?;
        let sync: Arc<dyn BackendSync> = if offline || !cfg.backend.enabled {
            log::info!("backend sync disabled");
            Arc::new(DisabledSync)
        } else {
            Arc::new(HttpBackendSync::new(
                &cfg.backend.url,
                cfg.backend.timeout,
                cfg.cashier_id,
                Arc::clone(&catalog),
            )?)
        };
        let finalizer = Arc::new(Finalizer::new(Arc::clone(&ledger), Box::new(log), sync));

        let registry = build_registry(cfg.detector.script.as_deref())?;
        let detector = registry.select(&cfg.detector.backend)?;

        log::info!(
            "till ready: {} catalog items, db={}, detector={}",
            catalog.len(),
            cfg.db_path,
            cfg.detector.backend
        );
        Ok(Self {
            catalog,
            ledger,
            finalizer,
            detector,
        })
    }

    /// A detection worker bound to this till's ledger and detector.
    pub fn worker(&self, cfg: &TillConfig) -> DetectionWorker {
        DetectionWorker::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.detector),
            WorkerSettings {
                detection_interval: cfg.detection_interval,
                thresholds: cfg.presence,
                loop_yield: cfg.loop_yield,
            },
        )
    }
}
