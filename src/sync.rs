//! Backend sync adapter.
//!
//! Reports finalized transactions to the monitoring collector. Best effort:
//! every call is bounded by a hard timeout, failures are logged and returned
//! as `false`, and nothing here can undo or block a local commit.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::catalog::Catalog;
use crate::transaction::TransactionRecord;

const RECORD_SALE_PATH: &str = "/api/cashier/record-sale";
const STATUS_PATH: &str = "/api/cashier/status";

pub trait BackendSync: Send + Sync {
    /// Report one finalized transaction. True when the collector accepted it.
    fn send(&self, record: &TransactionRecord) -> bool;

    /// Probe the collector.
    fn status(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct SaleItem<'a> {
    product_name: &'a str,
    quantity: u32,
    price: u64,
}

#[derive(Debug, Serialize)]
struct SalePayload<'a> {
    items: Vec<SaleItem<'a>>,
    total_amount: u64,
    payment_method: &'static str,
    cashier_id: u32,
}

/// HTTP adapter for the monitoring collector.
pub struct HttpBackendSync {
    record_sale_url: Url,
    status_url: Url,
    agent: ureq::Agent,
    cashier_id: u32,
    catalog: Arc<Catalog>,
}

impl HttpBackendSync {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        cashier_id: u32,
        catalog: Arc<Catalog>,
    ) -> Result<Self> {
        if timeout.is_zero() {
            return Err(anyhow!("backend sync timeout must be greater than zero"));
        }
        let base =
            Url::parse(base_url).map_err(|e| anyhow!("invalid backend url '{}': {}", base_url, e))?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Ok(Self {
            record_sale_url: base.join(RECORD_SALE_PATH)?,
            status_url: base.join(STATUS_PATH)?,
            agent,
            cashier_id,
            catalog,
        })
    }

    fn payload<'a>(&self, record: &'a TransactionRecord) -> SalePayload<'a> {
        SalePayload {
            items: record
                .items
                .iter()
                .map(|(key, qty)| SaleItem {
                    product_name: key.as_str(),
                    quantity: *qty,
                    price: self.catalog.unit_price(key).unwrap_or(0),
                })
                .collect(),
            total_amount: record.total_amount,
            payment_method: record.payment_method.as_str(),
            cashier_id: self.cashier_id,
        }
    }
}

impl BackendSync for HttpBackendSync {
    fn send(&self, record: &TransactionRecord) -> bool {
        let payload = self.payload(record);
        match self
            .agent
            .post(self.record_sale_url.as_str())
            .send_json(&payload)
        {
            Ok(response) if matches!(response.status(), 200 | 201) => {
                log::info!(
                    "backend sync ok: ref={} total={}",
                    record.reference,
                    record.total_amount
                );
                true
            }
            Ok(response) => {
                log::warn!("backend sync rejected: HTTP {}", response.status());
                false
            }
            Err(ureq::Error::Status(code, _)) => {
                log::warn!("backend sync rejected: HTTP {}", code);
                false
            }
            Err(err) => {
                log::warn!("backend sync failed ({}): {}", self.record_sale_url, err);
                false
            }
        }
    }

    fn status(&self) -> bool {
        match self.agent.get(self.status_url.as_str()).call() {
            Ok(response) => response.status() == 200,
            Err(err) => {
                log::debug!("backend status probe failed: {}", err);
                false
            }
        }
    }
}

/// Offline mode: never touches the network.
#[derive(Debug, Default)]
pub struct DisabledSync;

impl BackendSync for DisabledSync {
    fn send(&self, record: &TransactionRecord) -> bool {
        log::info!(
            "backend sync disabled (offline mode); ref={} not sent",
            record.reference
        );
        false
    }

    fn status(&self) -> bool {
        false
    }
}
