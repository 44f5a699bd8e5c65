use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use vision_till::config::TillConfig;
use vision_till::{CheckoutState, PaymentMethod, Till};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TILL_CONFIG",
        "TILL_DB_PATH",
        "TILL_STOCK_PATH",
        "TILL_SOURCE_URL",
        "TILL_DETECTOR",
        "TILL_BACKEND_URL",
        "TILL_BACKEND_SYNC",
        "TILL_CASHIER_ID",
        "TILL_COOLDOWN_TICKS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_match_the_counter_setup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TillConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "till.db");
    assert_eq!(cfg.cashier_id, 1);
    assert_eq!(cfg.source.url, "stub://counter");
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detection_interval, 3);
    assert_eq!(cfg.presence.presence_frames, 2);
    assert_eq!(cfg.presence.absence_frames, 8);
    assert_eq!(cfg.cooldown_ticks, 600);
    assert_eq!(cfg.refresh_interval.as_millis(), 200);
    assert!(cfg.backend.enabled);
    assert_eq!(cfg.backend.url, "http://127.0.0.1:5000");
    assert_eq!(cfg.backend.timeout.as_secs(), 5);
    assert!(cfg.catalog.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "till_prod.db",
        "cashier_id": 4,
        "source": { "url": "stub://lane-2", "width": 320, "height": 240 },
        "detector": { "backend": "scripted", "script": "apple;;banana" },
        "sampler": { "detection_interval": 2 },
        "presence": { "presence_frames": 3, "absence_frames": 10 },
        "cooldown": { "ticks": 90 },
        "backend": { "url": "http://10.0.0.9:5000", "timeout_ms": 1500 },
        "catalog": [
            { "key": "Apple", "display_name": "Apel", "unit_price": 12000, "stock_on_hand": 5 }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TILL_CONFIG", file.path());
    std::env::set_var("TILL_COOLDOWN_TICKS", "120");
    std::env::set_var("TILL_BACKEND_SYNC", "false");
    std::env::set_var("TILL_CASHIER_ID", "9");

    let cfg = TillConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "till_prod.db");
    assert_eq!(cfg.cashier_id, 9);
    assert_eq!(cfg.source.url, "stub://lane-2");
    assert_eq!((cfg.source.width, cfg.source.height), (320, 240));
    assert_eq!(cfg.detector.backend, "scripted");
    assert_eq!(cfg.detector.script.as_deref(), Some("apple;;banana"));
    assert_eq!(cfg.detection_interval, 2);
    assert_eq!(cfg.presence.presence_frames, 3);
    assert_eq!(cfg.presence.absence_frames, 10);
    assert_eq!(cfg.cooldown_ticks, 120);
    assert!(!cfg.backend.enabled);
    assert_eq!(cfg.backend.url, "http://10.0.0.9:5000");
    assert_eq!(cfg.backend.timeout.as_millis(), 1500);
    assert_eq!(cfg.catalog.as_ref().unwrap()[0].key, "apple");

    clear_env();
}

#[test]
fn toml_config_files_are_accepted() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        db_path = "lane.db"

        [presence]
        absence_frames = 12

        [backend]
        enabled = false
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = TillConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.db_path, "lane.db");
    assert_eq!(cfg.presence.absence_frames, 12);
    assert_eq!(cfg.presence.presence_frames, 2);
    assert!(!cfg.backend.enabled);
}

#[test]
fn invalid_settings_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{ "sampler": { "detection_interval": 0 } }"#,
        r#"{ "presence": { "absence_frames": 0 } }"#,
        r#"{ "cooldown": { "ticks": 0 } }"#,
        r#"{ "backend": { "timeout_ms": 0 } }"#,
        r#"{ "catalog": [] }"#,
        r#"{ "catalog": [
            { "key": "pen", "display_name": "Pena", "unit_price": 5000, "stock_on_hand": 1 },
            { "key": "PEN", "display_name": "Pena", "unit_price": 5000, "stock_on_hand": 1 }
        ] }"#,
    ] {
        let mut file = NamedTempFile::new().expect("temp config");
        std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
        assert!(
            TillConfig::load_from(Some(file.path())).is_err(),
            "accepted {}",
            json
        );
    }

    std::env::set_var("TILL_BACKEND_SYNC", "maybe");
    assert!(TillConfig::load().is_err());
    clear_env();
}

#[test]
fn till_opens_from_config_and_runs_a_checkout() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("TILL_DB_PATH", dir.path().join("till.db"));
    std::env::set_var("TILL_STOCK_PATH", dir.path().join("stock.json"));
    std::env::set_var("TILL_DETECTOR", "stub");
    let cfg = TillConfig::load().expect("load config");
    clear_env();

    let till = Till::open(&cfg, true).expect("open till");
    assert_eq!(till.catalog.len(), 48);
    assert_eq!(till.detector.lock().unwrap().name(), "stub");

    till.ledger.manual_adjust("pen", 2).unwrap();
    let artifact = till.finalizer.begin_checkout(PaymentMethod::Cash).unwrap();
    assert_eq!(artifact.amount, 10000);
    let receipt = till.finalizer.confirm().unwrap();
    assert!(!receipt.synced);
    assert_eq!(till.catalog.stock("pen"), Some(198));
    assert_eq!(till.finalizer.state(), CheckoutState::Open);
    assert!(!till.finalizer.backend_status());

    let mut worker = till.worker(&cfg);
    worker
        .start(vision_till::open_source(&cfg.source.url, 16, 12).unwrap())
        .unwrap();
    worker.stop().unwrap();
}
