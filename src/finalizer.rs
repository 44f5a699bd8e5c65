//! Checkout finalizer.
//!
//! Per transaction: `Open -> AwaitingPayment -> Completed` or `-> Cancelled`.
//!
//! - `begin_checkout` captures a cart snapshot, issues the payment artifact and
//!   writes the opening audit row.
//! - `confirm` charges exactly that snapshot: it writes the COMPLETED row,
//!   takes stock, reports to the backend, clears the cart and bumps counters.
//! - `cancel` clears the cart and drops the artifact with no other effects.
//!
//! Only one checkout may be in flight. A second begin or confirm while one is
//! running is rejected with `FinalizeInProgress`, never queued. The phase lock
//! is held only to read and swap the phase; persistence and network calls run
//! outside it and outside the ledger lock.

use std::collections::BTreeMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{TillError, TillResult};
use crate::ledger::{CartSnapshot, Ledger};
use crate::now_s;
use crate::storage::{StatusTotals, TransactionLog};
use crate::sync::BackendSync;
use crate::transaction::{PaymentArtifact, PaymentMethod, TransactionRecord, TransactionStatus};

#[derive(Clone, Debug)]
struct PendingCheckout {
    snapshot: CartSnapshot,
    artifact: PaymentArtifact,
}

enum Phase {
    Open,
    /// Opening audit row being written.
    Beginning,
    AwaitingPayment(PendingCheckout),
    /// Confirm running.
    Finalizing,
}

/// Externally visible checkout state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CheckoutState {
    Open,
    AwaitingPayment { amount: u64, reference: String },
    Finalizing,
}

/// Outcome of a successful confirm.
#[derive(Clone, Debug)]
pub struct FinalizeReceipt {
    pub record: TransactionRecord,
    pub row_id: i64,
    /// False when the stock file could not be rewritten. In-memory stock is
    /// still decremented.
    pub stock_persisted: bool,
    /// Backend sync result. Telemetry only.
    pub synced: bool,
    /// Units added to the cart while payment was pending. Not charged and
    /// cleared with the cart.
    pub discarded: BTreeMap<String, u32>,
}

pub struct Finalizer {
    ledger: Arc<Ledger>,
    log: Mutex<Box<dyn TransactionLog>>,
    sync: Arc<dyn BackendSync>,
    phase: Mutex<Phase>,
}

impl Finalizer {
    pub fn new(
        ledger: Arc<Ledger>,
        log: Box<dyn TransactionLog>,
        sync: Arc<dyn BackendSync>,
    ) -> Self {
        Self {
            ledger,
            log: Mutex::new(log),
            sync,
            phase: Mutex::new(Phase::Open),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        *self.lock_phase() = phase;
    }

    fn append(&self, record: &TransactionRecord) -> TillResult<i64> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| TillError::Persistence(anyhow::anyhow!("transaction log lock poisoned")))?;
        log.append(record).map_err(TillError::Persistence)
    }

    pub fn state(&self) -> CheckoutState {
        match &*self.lock_phase() {
            Phase::Open => CheckoutState::Open,
            Phase::AwaitingPayment(pending) => CheckoutState::AwaitingPayment {
                amount: pending.artifact.amount,
                reference: pending.artifact.reference.clone(),
            },
            Phase::Beginning | Phase::Finalizing => CheckoutState::Finalizing,
        }
    }

    /// Artifact of the checkout awaiting payment, if any.
    pub fn pending_artifact(&self) -> Option<PaymentArtifact> {
        match &*self.lock_phase() {
            Phase::AwaitingPayment(pending) => Some(pending.artifact.clone()),
            _ => None,
        }
    }

    /// Open a checkout on the current cart.
    pub fn begin_checkout(&self, method: PaymentMethod) -> TillResult<PaymentArtifact> {
        {
            let mut phase = self.lock_phase();
            if !matches!(*phase, Phase::Open) {
                return Err(TillError::FinalizeInProgress);
            }
            *phase = Phase::Beginning;
        }

        let snapshot = self.ledger.snapshot();
        if snapshot.is_empty() || snapshot.total == 0 {
            self.set_phase(Phase::Open);
            return Err(TillError::EmptyCart);
        }

        let issued_at = match now_s() {
            Ok(ts) => ts,
            Err(e) => {
                self.set_phase(Phase::Open);
                return Err(TillError::Persistence(e));
            }
        };
        let artifact = PaymentArtifact::issue(snapshot.total, method, issued_at);
        let record = TransactionRecord {
            timestamp: issued_at,
            items: snapshot.items.clone(),
            total_amount: snapshot.total,
            payment_method: method,
            status: method.opening_status(),
            reference: artifact.reference.clone(),
        };

        if let Err(e) = self.append(&record) {
            log::error!("checkout audit row not written: {}", e);
            self.set_phase(Phase::Open);
            return Err(e);
        }

        self.ledger.note_checkout_begun();
        log::info!(
            "checkout opened: ref={} total={} items={} method={}",
            artifact.reference,
            snapshot.total,
            snapshot.item_count,
            method
        );
        self.set_phase(Phase::AwaitingPayment(PendingCheckout {
            snapshot,
            artifact: artifact.clone(),
        }));
        Ok(artifact)
    }

    /// Confirm payment and finalize the snapshot captured at `begin_checkout`.
    ///
    /// A persistence failure leaves the checkout awaiting payment so the
    /// operator can retry.
    pub fn confirm(&self) -> TillResult<FinalizeReceipt> {
        let pending = {
            let mut phase = self.lock_phase();
            match mem::replace(&mut *phase, Phase::Finalizing) {
                Phase::AwaitingPayment(pending) => pending,
                Phase::Open => {
                    *phase = Phase::Open;
                    return Err(TillError::NoPaymentPending);
                }
                other => {
                    *phase = other;
                    return Err(TillError::FinalizeInProgress);
                }
            }
        };

        let timestamp = match now_s() {
            Ok(ts) => ts,
            Err(e) => {
                self.set_phase(Phase::AwaitingPayment(pending));
                return Err(TillError::Persistence(e));
            }
        };
        let record = TransactionRecord {
            timestamp,
            items: pending.snapshot.items.clone(),
            total_amount: pending.snapshot.total,
            payment_method: pending.artifact.method,
            status: TransactionStatus::Completed,
            reference: pending.artifact.reference.clone(),
        };

        let row_id = match self.append(&record) {
            Ok(id) => id,
            Err(e) => {
                log::error!(
                    "finalize aborted, ref={} still awaiting payment: {}",
                    record.reference,
                    e
                );
                self.set_phase(Phase::AwaitingPayment(pending));
                return Err(e);
            }
        };

        let stock_persisted = match self
            .ledger
            .catalog()
            .decrement_for_sale(&pending.snapshot.items)
        {
            Ok(()) => true,
            Err(e) => {
                log::error!("stock file not updated after sale {}: {}", record.reference, e);
                false
            }
        };

        let synced = self.sync.send(&record);
        if !synced {
            log::warn!("sale {} kept locally; backend not updated", record.reference);
        }

        let discarded = self.ledger.complete_sale(&pending.snapshot, timestamp);
        if !discarded.is_empty() {
            log::warn!(
                "sale {}: items added during payment were not charged and are cleared: {:?}",
                record.reference,
                discarded
            );
        }
        self.set_phase(Phase::Open);
        log::info!(
            "checkout completed: ref={} total={} items={}",
            record.reference,
            record.total_amount,
            pending.snapshot.item_count
        );

        Ok(FinalizeReceipt {
            record,
            row_id,
            stock_persisted,
            synced,
            discarded,
        })
    }

    /// Abandon the open or awaiting checkout and empty the cart.
    pub fn cancel(&self) -> TillResult<()> {
        let mut phase = self.lock_phase();
        match mem::replace(&mut *phase, Phase::Open) {
            Phase::Open => {}
            Phase::AwaitingPayment(pending) => {
                log::info!("checkout cancelled: ref={}", pending.artifact.reference);
            }
            busy => {
                *phase = busy;
                return Err(TillError::FinalizeInProgress);
            }
        }
        self.ledger.cancel_cart();
        Ok(())
    }

    /// Newest first.
    pub fn recent_transactions(&self, limit: usize) -> TillResult<Vec<TransactionRecord>> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| TillError::Persistence(anyhow::anyhow!("transaction log lock poisoned")))?;
        log.recent(limit).map_err(TillError::Persistence)
    }

    pub fn totals_by_status(&self, status: TransactionStatus) -> TillResult<StatusTotals> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| TillError::Persistence(anyhow::anyhow!("transaction log lock poisoned")))?;
        log.totals_by_status(status).map_err(TillError::Persistence)
    }

    pub fn backend_status(&self) -> bool {
        self.sync.status()
    }
}
