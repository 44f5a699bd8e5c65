//! Stock file persistence.
//!
//! The stock file is a JSON object mapping catalog key to quantity on hand. It
//! is read once at startup and rewritten on every stock change. Rewrites go to
//! a sibling temp file which is synced and then renamed over the original, so a
//! crash mid-write leaves the previous snapshot intact.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub type StockLevels = BTreeMap<String, u32>;

/// Read a stock file. A missing file yields `None`.
pub fn load_stock_file(path: &Path) -> Result<Option<StockLevels>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read stock file {}: {}", path.display(), e))?;
    let levels: StockLevels = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid stock file {}: {}", path.display(), e))?;
    Ok(Some(levels))
}

/// Replace the stock file with `levels`.
pub fn write_stock_file(path: &Path, levels: &StockLevels) -> Result<()> {
    let json = serde_json::to_vec_pretty(levels)?;
    write_atomic(path, &json)
        .map_err(|e| anyhow!("failed to write stock file {}: {}", path.display(), e))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
