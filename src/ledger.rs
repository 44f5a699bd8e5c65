//! Cart ledger.
//!
//! The single source of truth for quantities in the active cart. One mutex
//! guards the cart, the cooldown table and the running counters together; the
//! detection thread, the refresh timer and operator actions all go through it.
//! No I/O happens while the lock is held.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::catalog::Catalog;
use crate::cooldown::CooldownTable;
use crate::error::{TillError, TillResult};
use crate::transaction::TransactionStatus;

const RECENT_SALES: usize = 10;

/// Consistent read-only copy of the cart.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CartSnapshot {
    pub items: BTreeMap<String, u32>,
    pub total: u64,
    pub item_count: u64,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn quantity(&self, key: &str) -> u32 {
        self.items.get(key).copied().unwrap_or(0)
    }
}

/// Process-wide counters. Monotonic until restart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub items_sold: u64,
    pub transactions_completed: u64,
    pub checkouts_begun: u64,
    pub checkouts_cancelled: u64,
    pub detections_admitted: u64,
    /// Seconds since the Unix epoch when the ledger was created.
    pub session_started_at: u64,
}

/// Summary of a finished checkout kept for the operator view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecentSale {
    pub timestamp: u64,
    pub total: u64,
    pub items: u64,
    pub status: TransactionStatus,
}

struct LedgerInner {
    cart: BTreeMap<String, u32>,
    cooldown: CooldownTable,
    counters: Counters,
    recent: VecDeque<RecentSale>,
}

pub struct Ledger {
    inner: Mutex<LedgerInner>,
    catalog: Arc<Catalog>,
}

impl Ledger {
    pub fn new(catalog: Arc<Catalog>, cooldown_ticks: u32) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                cart: BTreeMap::new(),
                cooldown: CooldownTable::new(cooldown_ticks),
                counters: Counters {
                    session_started_at: crate::now_s().unwrap_or(0),
                    ..Counters::default()
                },
                recent: VecDeque::with_capacity(RECENT_SALES),
            }),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::error!("ledger lock poisoned; continuing with last consistent state");
            poisoned.into_inner()
        })
    }

    /// Admit detected items, one unit each, skipping keys still cooling down.
    ///
    /// The cooldown check and the increment happen under one lock hold.
    /// Returns the keys that were admitted.
    pub fn admit_detected<S: AsRef<str>>(&self, keys: &[S]) -> Vec<String> {
        let mut admitted = Vec::new();
        let mut inner = self.lock();
        for key in keys {
            let key = key.as_ref();
            if !self.catalog.contains(key) {
                log::debug!("admit: '{}' not in catalog, dropped", key);
                continue;
            }
            if !inner.cooldown.try_admit(key) {
                log::debug!(
                    "admit: {} cooling down ({} ticks left)",
                    key,
                    inner.cooldown.remaining(key)
                );
                continue;
            }
            let qty = inner.cart.entry(key.to_string()).or_insert(0);
            *qty += 1;
            let qty = *qty;
            inner.counters.detections_admitted += 1;
            log::info!("admitted {} qty={}", key, qty);
            admitted.push(key.to_string());
        }
        admitted
    }

    /// Admit a single item. True when the cart was incremented.
    pub fn admit(&self, key: &str) -> bool {
        !self.admit_detected(&[key]).is_empty()
    }

    /// Decay every cooldown by one tick.
    pub fn tick_cooldowns(&self) {
        self.lock().cooldown.tick();
    }

    pub fn cooldown_remaining(&self, key: &str) -> u32 {
        self.lock().cooldown.remaining(key)
    }

    pub fn snapshot(&self) -> CartSnapshot {
        let items = self.lock().cart.clone();
        self.price(items)
    }

    fn price(&self, items: BTreeMap<String, u32>) -> CartSnapshot {
        let prices = self.catalog.prices(items.keys().map(String::as_str));
        let total = items
            .iter()
            .map(|(key, qty)| prices.get(key).copied().unwrap_or(0) * u64::from(*qty))
            .sum();
        let item_count = items.values().map(|qty| u64::from(*qty)).sum();
        CartSnapshot {
            items,
            total,
            item_count,
        }
    }

    pub fn clear(&self) {
        self.lock().cart.clear();
    }

    /// Operator override: add or remove units without the detection pipeline.
    ///
    /// Removing more than is in the cart clamps at zero and drops the key.
    /// Returns the new quantity.
    pub fn manual_adjust(&self, key: &str, delta: i64) -> TillResult<u32> {
        if !self.catalog.contains(key) {
            return Err(TillError::UnknownItem(key.to_string()));
        }
        let mut inner = self.lock();
        let current = i64::from(inner.cart.get(key).copied().unwrap_or(0));
        let next = current.saturating_add(delta);
        if next > i64::from(u32::MAX) {
            return Err(TillError::InvalidQuantity {
                key: key.to_string(),
                reason: format!("quantity {} exceeds limit", next),
            });
        }
        if next <= 0 {
            inner.cart.remove(key);
            log::info!("manual adjust {} {:+} -> removed", key, delta);
            return Ok(0);
        }
        let next = next as u32;
        inner.cart.insert(key.to_string(), next);
        log::info!("manual adjust {} {:+} -> qty={}", key, delta, next);
        Ok(next)
    }

    /// Book a completed sale: clear the cart and bump the counters in one step.
    ///
    /// Returns the units that were in the cart but not in `sold`, i.e. items
    /// added while payment was pending. They are cleared with the rest.
    pub fn complete_sale(&self, sold: &CartSnapshot, timestamp: u64) -> BTreeMap<String, u32> {
        let mut inner = self.lock();
        let discarded: BTreeMap<String, u32> = inner
            .cart
            .iter()
            .filter_map(|(key, qty)| {
                let extra = qty.saturating_sub(sold.quantity(key));
                (extra > 0).then(|| (key.clone(), extra))
            })
            .collect();
        inner.cart.clear();
        inner.counters.items_sold += sold.item_count;
        inner.counters.transactions_completed += 1;
        if inner.recent.len() == RECENT_SALES {
            inner.recent.pop_back();
        }
        inner.recent.push_front(RecentSale {
            timestamp,
            total: sold.total,
            items: sold.item_count,
            status: TransactionStatus::Completed,
        });
        discarded
    }

    pub(crate) fn note_checkout_begun(&self) {
        self.lock().counters.checkouts_begun += 1;
    }

    /// Clear the cart after a cancel and count it.
    pub(crate) fn cancel_cart(&self) {
        let mut inner = self.lock();
        inner.cart.clear();
        inner.counters.checkouts_cancelled += 1;
    }

    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    /// Newest first.
    pub fn recent_sales(&self) -> Vec<RecentSale> {
        self.lock().recent.iter().cloned().collect()
    }
}
