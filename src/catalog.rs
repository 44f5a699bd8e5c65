//! Catalog store.
//!
//! One entry per sellable item type. Keys, display names and prices are fixed
//! once the catalog is built; stock levels change through `adjust_stock` and
//! `decrement_for_sale` and are written to the stock file on every change.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{TillError, TillResult};
use crate::stock::{load_stock_file, write_stock_file, StockLevels};

/// Built-in catalog: `(key, display name, unit price, stock)`.
const BUILTIN_CATALOG: &[(&str, &str, u64, u32)] = &[
    ("apple", "Apel", 12000, 50),
    ("banana", "Pisang", 8000, 75),
    ("orange", "Jeruk", 10000, 60),
    ("strawberry", "Stroberi", 18000, 40),
    ("pear", "Pir", 15000, 35),
    ("kiwi", "Kiwi", 16000, 45),
    ("donut", "Donat", 8000, 100),
    ("sandwich", "Sandwich", 22000, 50),
    ("pizza", "Pizza", 35000, 30),
    ("cake", "Kue", 28000, 25),
    ("hot dog", "Hot Dog", 18000, 45),
    ("bread", "Roti", 10000, 80),
    ("cheese", "Keju", 25000, 35),
    ("broccoli", "Brokoli", 15000, 40),
    ("carrot", "Wortel", 8000, 70),
    ("potato", "Kentang", 7000, 90),
    ("tomato", "Tomat", 10000, 55),
    ("cup", "Cangkir", 12000, 60),
    ("bottle", "Botol", 15000, 50),
    ("wine glass", "Gelas Wine", 18000, 30),
    ("water bottle", "Botol Air Minum", 25000, 40),
    ("backpack", "Tas Punggung", 120000, 15),
    ("handbag", "Tas Tangan", 180000, 12),
    ("umbrella", "Payung", 45000, 25),
    ("tie", "Dasi", 35000, 30),
    ("teddy bear", "Boneka", 45000, 20),
    ("watch", "Jam Tangan", 150000, 10),
    ("sunglasses", "Kacamata Hitam", 75000, 18),
    ("cap", "Topi", 30000, 35),
    ("shoe", "Sepatu", 250000, 8),
    ("sock", "Kaos Kaki", 15000, 100),
    ("clock", "Jam Dinding", 50000, 15),
    ("mouse", "Mouse", 85000, 20),
    ("keyboard", "Keyboard", 200000, 15),
    ("cell phone", "Ponsel", 2500000, 5),
    ("book", "Buku", 35000, 40),
    ("scissors", "Gunting", 12000, 25),
    ("pen", "Pena", 5000, 200),
    ("notebook", "Buku Tulis", 8000, 80),
    ("pencil", "Pensil", 3000, 150),
    ("fork", "Garpu", 8000, 70),
    ("knife", "Pisau", 25000, 40),
    ("spoon", "Sendok", 8000, 90),
    ("bowl", "Mangkuk", 12000, 55),
    ("baseball", "Bola Baseball", 50000, 20),
    ("frisbee", "Frisbee", 35000, 15),
    ("skateboard", "Skateboard", 350000, 5),
    ("bicycle", "Sepeda", 800000, 3),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: String,
    pub display_name: String,
    /// Price in whole currency units.
    pub unit_price: u64,
    pub stock_on_hand: u32,
}

impl CatalogEntry {
    pub fn new(key: &str, display_name: &str, unit_price: u64, stock_on_hand: u32) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            unit_price,
            stock_on_hand,
        }
    }
}

#[derive(Clone, Debug)]
struct ItemInfo {
    display_name: String,
    unit_price: u64,
}

pub struct Catalog {
    items: BTreeMap<String, ItemInfo>,
    stock: Mutex<StockLevels>,
    stock_path: Option<PathBuf>,
    // Serialises snapshot+write so an older snapshot never lands after a newer one.
    persist_lock: Mutex<()>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(anyhow!("catalog must contain at least one entry"));
        }
        let mut items = BTreeMap::new();
        let mut stock = StockLevels::new();
        for entry in entries {
            let key = entry.key.trim().to_lowercase();
            if key.is_empty() {
                return Err(anyhow!("catalog key must not be empty"));
            }
            if items.contains_key(&key) {
                return Err(anyhow!("duplicate catalog key '{}'", key));
            }
            stock.insert(key.clone(), entry.stock_on_hand);
            items.insert(
                key,
                ItemInfo {
                    display_name: entry.display_name,
                    unit_price: entry.unit_price,
                },
            );
        }
        Ok(Self {
            items,
            stock: Mutex::new(stock),
            stock_path: None,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn builtin_entries() -> Vec<CatalogEntry> {
        BUILTIN_CATALOG
            .iter()
            .map(|(key, name, price, stock)| CatalogEntry::new(key, name, *price, *stock))
            .collect()
    }

    pub fn builtin() -> Result<Self> {
        Self::new(Self::builtin_entries())
    }

    /// Bind the catalog to a stock file, loading levels from it when present.
    ///
    /// Keys in the file that the catalog does not know are ignored. Keys the
    /// file lacks keep their catalog defaults.
    pub fn with_stock_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(levels) = load_stock_file(&path)? {
            let mut stock = self.lock_stock()?;
            for (key, qty) in levels {
                match stock.get_mut(&key) {
                    Some(level) => *level = qty,
                    None => log::debug!("stock file key '{}' not in catalog, ignored", key),
                }
            }
            drop(stock);
            log::info!("stock loaded from {}", path.display());
        }
        self.stock_path = Some(path);
        Ok(self)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unit_price(&self, key: &str) -> Option<u64> {
        self.items.get(key).map(|info| info.unit_price)
    }

    pub fn display_name(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(|info| info.display_name.as_str())
    }

    /// Read one entry with its current stock.
    pub fn entry(&self, key: &str) -> Option<CatalogEntry> {
        let info = self.items.get(key)?;
        let stock_on_hand = self.stock(key).unwrap_or(0);
        Some(CatalogEntry {
            key: key.to_string(),
            display_name: info.display_name.clone(),
            unit_price: info.unit_price,
            stock_on_hand,
        })
    }

    /// Bulk price lookup. Unknown keys are left out.
    pub fn prices<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, u64> {
        keys.into_iter()
            .filter_map(|key| self.unit_price(key).map(|price| (key.to_string(), price)))
            .collect()
    }

    pub fn stock(&self, key: &str) -> Option<u32> {
        self.stock.lock().ok()?.get(key).copied()
    }

    pub fn stock_levels(&self) -> Result<StockLevels> {
        Ok(self.lock_stock()?.clone())
    }

    /// Operator stock correction. Clamped at zero; persisted when bound to a file.
    ///
    /// When the stock file cannot be written the change is rolled back, so a
    /// retried adjustment is applied once.
    pub fn adjust_stock(&self, key: &str, delta: i64) -> TillResult<u32> {
        let _persist = self.lock_persist().map_err(TillError::Persistence)?;
        let (previous, level) = {
            let mut stock = self.lock_stock().map_err(TillError::Persistence)?;
            let level = stock
                .get_mut(key)
                .ok_or_else(|| TillError::UnknownItem(key.to_string()))?;
            let previous = *level;
            *level = clamp_level(i64::from(previous).saturating_add(delta));
            (previous, *level)
        };
        if let Err(e) = self.write_levels() {
            let applied = i64::from(level) - i64::from(previous);
            if let Ok(mut stock) = self.lock_stock() {
                if let Some(current) = stock.get_mut(key) {
                    *current = clamp_level(i64::from(*current) - applied);
                }
            }
            log::error!("stock change for {} rolled back: {}", key, e);
            return Err(TillError::Persistence(e));
        }
        Ok(level)
    }

    /// Take sold quantities off stock, clamping each level at zero.
    pub fn decrement_for_sale(&self, items: &BTreeMap<String, u32>) -> Result<()> {
        {
            let mut stock = self.lock_stock()?;
            for (key, qty) in items {
                match stock.get_mut(key) {
                    Some(level) => *level = level.saturating_sub(*qty),
                    None => log::warn!("sold item '{}' not in catalog, stock untouched", key),
                }
            }
        }
        self.persist()
    }

    /// Write current levels to the stock file, if one is bound.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.lock_persist()?;
        self.write_levels()
    }

    // Caller holds the persist lock.
    fn write_levels(&self) -> Result<()> {
        let Some(path) = self.stock_path.as_deref() else {
            return Ok(());
        };
        let levels = self.stock_levels()?;
        write_stock_file(path, &levels)
    }

    fn lock_persist(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.persist_lock
            .lock()
            .map_err(|_| anyhow!("stock persist lock poisoned"))
    }

    fn lock_stock(&self) -> Result<std::sync::MutexGuard<'_, StockLevels>> {
        self.stock
            .lock()
            .map_err(|_| anyhow!("stock lock poisoned"))
    }
}

fn clamp_level(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}
