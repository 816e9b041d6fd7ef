mod common;

use common::{day, order, seed, setup_test_env};
use rust_decimal_macros::dec;
use std::fs;
use tempfile::tempdir;
use tradebook_core::{
    config::{ConfigManager, EngineConfig, Tolerances, WriteMode},
    core::{services::NewLedgerEntry, utils::staging_path},
    domain::{Order, PaymentSide},
    errors::StoreError,
    storage::{Collection, DocumentStore, JsonFileStore},
    PaymentEngine,
};

#[test]
fn config_save_load_and_backup() {
    let temp = tempdir().unwrap();
    let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
    let config = EngineConfig {
        tolerances: Tolerances {
            invoice: dec!(250),
            ..Tolerances::default()
        },
        write_mode: WriteMode::Sequential,
    };

    manager.save(&config).unwrap();
    assert!(!staging_path(manager.path()).exists());
    assert_eq!(manager.load().unwrap(), config);

    let name = manager.backup(&config).unwrap();
    assert!(name.starts_with("engine_"));
    assert_eq!(manager.list_backups().unwrap(), vec![name]);
}

#[test]
fn invalid_config_is_never_written() {
    let temp = tempdir().unwrap();
    let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
    let config = EngineConfig {
        tolerances: Tolerances::uniform(dec!(-5)),
        ..EngineConfig::default()
    };

    assert!(manager.save(&config).is_err());
    assert!(!manager.path().exists());
}

#[tokio::test]
async fn json_store_lists_allocated_orders() {
    let (engine, _) = setup_test_env().await;
    let acme = Order::new(day(1), dec!(800), dec!(1100)).with_supplier("Acme");
    seed(&engine, &[acme.clone()]).await;
    engine
        .record_entry(NewLedgerEntry::debit(dec!(500), day(2)).with_supplier("Acme"))
        .await
        .unwrap();

    let values = engine
        .store()
        .list(Collection::Orders, &[])
        .await
        .unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(order(&engine, acme.id).await.remaining(PaymentSide::Supplier), dec!(300));
}

#[tokio::test]
async fn reopening_reads_what_was_written() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("store.json");
    let acme = Order::new(day(1), dec!(800), dec!(1100)).with_supplier("Acme");
    {
        let engine = PaymentEngine::open_json(&path, EngineConfig::default()).await.unwrap();
        seed(&engine, &[acme.clone()]).await;
        engine
            .record_entry(NewLedgerEntry::debit(dec!(800), day(2)).with_supplier("Acme"))
            .await
            .unwrap();
    }
    assert!(!staging_path(&path).exists());

    let engine = PaymentEngine::open_json(&path, EngineConfig::default()).await.unwrap();
    let stored = order(&engine, acme.id).await;
    assert!(stored.paid);
    assert_eq!(stored.partial_payments.len(), 1);
}

#[tokio::test]
async fn corrupt_store_file_is_reported() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("store.json");
    fs::write(&path, "{ not json").unwrap();

    let err = JsonFileStore::open(&path).await.err().expect("corrupt file must fail");
    assert!(matches!(err, StoreError::Serde(_)));
}
