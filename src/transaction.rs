//! Transaction records and payment artifacts.

use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Merchant tag embedded in payment payloads.
pub const MERCHANT_TAG: &str = "Minimarket";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Paid => "PAID",
            TransactionStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PAID" => Ok(TransactionStatus::Paid),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            other => Err(anyhow!("unknown transaction status '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Qr,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Qr => "QR",
            PaymentMethod::Cash => "CASH",
        }
    }

    /// Status of the audit row written when checkout begins.
    pub fn opening_status(&self) -> TransactionStatus {
        match self {
            PaymentMethod::Qr => TransactionStatus::Paid,
            PaymentMethod::Cash => TransactionStatus::Pending,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QR" => Ok(PaymentMethod::Qr),
            "CASH" => Ok(PaymentMethod::Cash),
            other => Err(anyhow!("unknown payment method '{}'", other)),
        }
    }
}

/// Immutable audit row. Status changes append a new record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub items: BTreeMap<String, u32>,
    pub total_amount: u64,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
    /// Payment reference shared by every row of one checkout.
    pub reference: String,
}

impl TransactionRecord {
    pub fn item_count(&self) -> u64 {
        self.items.values().map(|qty| u64::from(*qty)).sum()
    }
}

/// What the customer pays against: amount plus a reference.
///
/// `payload` is the string a QR renderer would encode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentArtifact {
    pub amount: u64,
    pub reference: String,
    pub payload: String,
    pub method: PaymentMethod,
    pub issued_at: u64,
}

impl PaymentArtifact {
    pub fn issue(amount: u64, method: PaymentMethod, issued_at: u64) -> Self {
        let payload = format!("{}|Total:{}|Waktu:{}", MERCHANT_TAG, amount, issued_at);
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hasher.update(nonce);
        let digest: [u8; 32] = hasher.finalize().into();
        Self {
            amount,
            reference: hex::encode(&digest[..8]),
            payload,
            method,
            issued_at,
        }
    }
}
