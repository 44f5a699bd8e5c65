use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::open_db_connection;
use crate::transaction::{PaymentMethod, TransactionRecord, TransactionStatus};

/// Append-only transaction log.
///
/// `append` must not return `Ok` before the row is durable.
pub trait TransactionLog: Send {
    fn append(&mut self, record: &TransactionRecord) -> Result<i64>;

    /// Newest first.
    fn recent(&mut self, limit: usize) -> Result<Vec<TransactionRecord>>;

    fn totals_by_status(&mut self, status: TransactionStatus) -> Result<StatusTotals>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusTotals {
    pub count: u64,
    pub revenue: u64,
}

pub struct SqliteTransactionLog {
    conn: Connection,
}

impl SqliteTransactionLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;

            CREATE TABLE IF NOT EXISTS transactions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp INTEGER NOT NULL,
              items TEXT NOT NULL,
              total INTEGER NOT NULL,
              payment_method TEXT NOT NULL,
              status TEXT NOT NULL,
              reference TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_transactions_reference ON transactions(reference);
            "#,
        )?;
        Ok(())
    }
}

impl TransactionLog for SqliteTransactionLog {
    fn append(&mut self, record: &TransactionRecord) -> Result<i64> {
        let timestamp = i64::try_from(record.timestamp)
            .map_err(|_| anyhow!("transaction timestamp exceeds i64 range"))?;
        let total = i64::try_from(record.total_amount)
            .map_err(|_| anyhow!("transaction total exceeds i64 range"))?;
        let items_json = serde_json::to_string(&record.items)?;

        self.conn.execute(
            r#"
            INSERT INTO transactions(timestamp, items, total, payment_method, status, reference)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                timestamp,
                items_json,
                total,
                record.payment_method.as_str(),
                record.status.as_str(),
                record.reference
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<TransactionRecord>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT timestamp, items, total, payment_method, status, reference
                FROM transactions ORDER BY id DESC LIMIT ?1
                "#,
            )?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let timestamp: i64 = row.get(0)?;
                let items: String = row.get(1)?;
                let total: i64 = row.get(2)?;
                let method: String = row.get(3)?;
                let status: String = row.get(4)?;
                let reference: String = row.get(5)?;
                out.push((timestamp, items, total, method, status, reference));
            }
            out
        };

        let mut records = Vec::with_capacity(rows.len());
        for (timestamp, items, total, method, status, reference) in rows {
            let items: BTreeMap<String, u32> = serde_json::from_str(&items)
                .map_err(|e| anyhow!("corrupt transaction items: {}", e))?;
            records.push(TransactionRecord {
                timestamp: u64::try_from(timestamp)
                    .map_err(|_| anyhow!("corrupt transaction timestamp"))?,
                items,
                total_amount: u64::try_from(total)
                    .map_err(|_| anyhow!("corrupt transaction total"))?,
                payment_method: method.parse::<PaymentMethod>()?,
                status: status.parse::<TransactionStatus>()?,
                reference,
            });
        }
        Ok(records)
    }

    fn totals_by_status(&mut self, status: TransactionStatus) -> Result<StatusTotals> {
        let (count, revenue): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(total), 0) FROM transactions WHERE status = ?1",
            params![status.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StatusTotals {
            count: count.max(0) as u64,
            revenue: revenue.max(0) as u64,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryTransactionLog {
    records: Vec<TransactionRecord>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(&mut self, record: &TransactionRecord) -> Result<i64> {
        self.records.push(record.clone());
        Ok(self.records.len() as i64)
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<TransactionRecord>> {
        Ok(self.records.iter().rev().take(limit).cloned().collect())
    }

    fn totals_by_status(&mut self, status: TransactionStatus) -> Result<StatusTotals> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.status == status)
            .fold(StatusTotals::default(), |acc, record| StatusTotals {
                count: acc.count + 1,
                revenue: acc.revenue + record.total_amount,
            }))
    }
}
