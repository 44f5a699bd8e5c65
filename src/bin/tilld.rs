//! tilld - vision till daemon
//!
//! Runs the detection worker against the configured source and takes operator
//! commands on stdin:
//!
//! ```text
//! add <item> [n]        remove <item> [n]      stock <item> <delta>
//! checkout [qr|cash]    confirm                cancel
//! cart                  status                 quit
//! ```

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};

use vision_till::refresh::RefreshTimer;
use vision_till::{open_source, PaymentMethod, Till, TillConfig, TransactionStatus};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "TILL_CONFIG")]
    config: Option<PathBuf>,
    /// Frame source URL, overriding the config.
    #[arg(long)]
    source: Option<String>,
    /// Do not report sales to the monitoring backend.
    #[arg(long)]
    offline: bool,
}

enum Event {
    Line(String),
    Shutdown,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = TillConfig::load_from(args.config.as_deref())?;
    if let Some(url) = args.source {
        cfg.source.url = url;
    }

    let till = Till::open(&cfg, args.offline)?;
    let mut worker = till.worker(&cfg);
    worker.start(open_source(&cfg.source.url, cfg.source.width, cfg.source.height)?)?;

    let last_seen = Arc::new(Mutex::new((0u64, 0u64)));
    let refresh = RefreshTimer::spawn(Arc::clone(&till.ledger), cfg.refresh_interval, move |cart, _| {
        if let Ok(mut last) = last_seen.lock() {
            if *last != (cart.item_count, cart.total) {
                *last = (cart.item_count, cart.total);
                log::info!("cart: {} items, total {}", cart.item_count, cart.total);
            }
        }
    })?;

    let (tx, rx) = mpsc::channel();
    let tx_signal = tx.clone();
    ctrlc::set_handler(move || {
        let _ = tx_signal.send(Event::Shutdown);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(Event::Line(line)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(Event::Shutdown);
    });

    log::info!("tilld running on {}. type 'quit' or press Ctrl-C to stop", cfg.source.url);

    while let Ok(event) = rx.recv() {
        let line = match event {
            Event::Line(line) => line,
            Event::Shutdown => break,
        };
        match handle_command(&till, &line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => log::warn!("{}", err),
        }
    }

    log::info!("shutting down...");
    worker.stop()?;
    refresh.stop()?;
    let stats = worker.stats();
    log::info!(
        "processed {} ticks ({} fresh, {} reused, {} skipped), {} admissions",
        stats.ticks,
        stats.fresh,
        stats.reused,
        stats.skipped,
        stats.admissions
    );
    Ok(())
}

/// Returns `Ok(false)` when the operator asked to quit.
fn handle_command(till: &Till, line: &str) -> Result<bool> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((command, rest)) = words.split_first() else {
        return Ok(true);
    };

    match *command {
        "add" | "remove" => {
            let (item, qty) = item_and_count(rest)?;
            let delta = cart_delta(command, qty)?;
            let now = till.ledger.manual_adjust(&item, delta)?;
            println!("{}: {}", item, now);
        }
        "stock" => {
            let (item, delta) = item_and_count(rest)?;
            let level = till.catalog.adjust_stock(&item, delta)?;
            println!("stock {}: {}", item, level);
        }
        "checkout" => {
            let method = match rest.first() {
                Some(method) => method.parse::<PaymentMethod>()?,
                None => PaymentMethod::Qr,
            };
            let artifact = till.finalizer.begin_checkout(method)?;
            println!(
                "awaiting {} payment of {} (ref {})",
                artifact.method, artifact.amount, artifact.reference
            );
            println!("payload: {}", artifact.payload);
        }
        "confirm" => {
            let receipt = till.finalizer.confirm()?;
            println!(
                "completed ref {}: {} items, total {}{}",
                receipt.record.reference,
                receipt.record.item_count(),
                receipt.record.total_amount,
                if receipt.synced { "" } else { " (not synced)" }
            );
            for (item, qty) in &receipt.discarded {
                println!("  not charged, cleared: {} x {}", item, qty);
            }
        }
        "cancel" => {
            till.finalizer.cancel()?;
            println!("cart cleared");
        }
        "cart" => {
            let cart = till.ledger.snapshot();
            for (item, qty) in &cart.items {
                let price = till.catalog.unit_price(item).unwrap_or(0);
                let name = till.catalog.display_name(item).unwrap_or(item);
                println!("  {:<20} {:>3} x {:>8} = {}", name, qty, price, price * u64::from(*qty));
            }
            println!("  {} items, total {}", cart.item_count, cart.total);
        }
        "status" => {
            let counters = till.ledger.counters();
            let completed = till
                .finalizer
                .totals_by_status(TransactionStatus::Completed)?;
            println!("checkout: {:?}", till.finalizer.state());
            println!("counters: {}", serde_json::to_string(&counters)?);
            println!("completed: {} sales, revenue {}", completed.count, completed.revenue);
            println!(
                "backend: {}",
                if till.finalizer.backend_status() { "online" } else { "offline" }
            );
            for sale in till.ledger.recent_sales() {
                println!("  {} {} items total {} {}", sale.timestamp, sale.items, sale.total, sale.status);
            }
        }
        "quit" | "exit" => return Ok(false),
        other => return Err(anyhow!("unknown command '{}'", other)),
    }
    Ok(true)
}

/// Signed cart change for `add`/`remove`. Counts must be positive.
fn cart_delta(command: &str, qty: i64) -> Result<i64> {
    if qty <= 0 {
        return Err(anyhow!("{} count must be a positive integer, got {}", command, qty));
    }
    Ok(if command == "remove" { -qty } else { qty })
}

fn item_and_count(rest: &[&str]) -> Result<(String, i64)> {
    // Item keys may contain spaces ("hot dog"); a trailing integer is the count.
    let (count, name_words) = match rest.split_last() {
        Some((last, init)) if !init.is_empty() => match last.parse::<i64>() {
            Ok(n) => (n, init),
            Err(_) => (1, rest),
        },
        _ => (1, rest),
    };
    if name_words.is_empty() {
        return Err(anyhow!("missing item name"));
    }
    Ok((name_words.join(" ").to_lowercase(), count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_delta_signs_positive_counts() {
        assert_eq!(cart_delta("add", 3).unwrap(), 3);
        assert_eq!(cart_delta("remove", 2).unwrap(), -2);
        assert_eq!(cart_delta("remove", i64::MAX).unwrap(), -i64::MAX);
    }

    #[test]
    fn cart_delta_rejects_non_positive_counts() {
        for qty in [0, -1, i64::MIN] {
            assert!(cart_delta("add", qty).is_err(), "add accepted {}", qty);
            assert!(cart_delta("remove", qty).is_err(), "remove accepted {}", qty);
        }
    }

    #[test]
    fn remove_with_extreme_count_is_rejected_before_the_cart() {
        let (item, qty) = item_and_count(&["apple", "-9223372036854775808"]).unwrap();
        assert_eq!((item.as_str(), qty), ("apple", i64::MIN));
        assert!(cart_delta("remove", qty).is_err());
    }

    #[test]
    fn item_names_keep_spaces_and_default_to_one() {
        assert_eq!(item_and_count(&["Hot", "dog", "2"]).unwrap(), ("hot dog".to_string(), 2));
        assert_eq!(item_and_count(&["pizza"]).unwrap(), ("pizza".to_string(), 1));
        assert!(item_and_count(&[]).is_err());
    }
}
