mod common;

use common::{day, entry, invoice, memory_engine, order, seed, setup_test_env};
use rust_decimal_macros::dec;
use tradebook_core::{
    config::EngineConfig,
    core::services::{ArchiveChange, LedgerEntryChanges, NewLedgerEntry, PaymentInput},
    domain::{EntrySource, Invoice, Order, PartyPayment, PaymentSide},
    storage::{Collection, Repository},
    ServiceError,
};

#[tokio::test]
async fn journal_lifecycle_on_json_store() {
    let (engine, _) = setup_test_env().await;
    let first = Order::new(day(1), dec!(3000), dec!(4000)).with_party("Bharat");
    let second = Order::new(day(2), dec!(750), dec!(1000)).with_party("Bharat");
    seed(&engine, &[first.clone(), second.clone()]).await;

    let recorded = engine
        .record_entry(NewLedgerEntry::credit(dec!(2500), day(5)).with_party("Bharat").with_note("wire"))
        .await
        .unwrap();
    assert_eq!(order(&engine, first.id).await.paid_total(PaymentSide::Customer), dec!(2000));
    assert_eq!(order(&engine, second.id).await.paid_total(PaymentSide::Customer), dec!(500));

    let updated = engine
        .update_entry(recorded.entry.id, LedgerEntryChanges::default().date(day(6)))
        .await
        .unwrap();
    assert_eq!(updated.delta, Some(dec!(0)));
    assert_eq!(entry(&engine, recorded.entry.id).await.unwrap().date, day(6));

    let report = engine.delete_entry(recorded.entry.id).await.unwrap();
    assert_eq!(report.party_payments.len(), 1);
    assert!(entry(&engine, recorded.entry.id).await.is_none());
    assert!(order(&engine, first.id).await.customer_payments.is_empty());
    assert!(order(&engine, second.id).await.payment_due);
}

#[tokio::test]
async fn conflicting_edit_through_engine_changes_nothing() {
    let (_, engine) = memory_engine(EngineConfig::default());
    let acme = Order::new(day(1), dec!(900), dec!(900)).with_supplier("Acme");
    seed(&engine, &[acme.clone()]).await;
    let recorded = engine
        .record_entry(NewLedgerEntry::debit(dec!(900), day(2)).with_supplier("Acme"))
        .await
        .unwrap();

    let err = engine
        .update_entry(recorded.entry.id, LedgerEntryChanges::default().amount(dec!(400)))
        .await
        .expect_err("shrink must conflict");

    assert!(matches!(err, ServiceError::ReconciliationConflict { .. }));
    assert_eq!(entry(&engine, recorded.entry.id).await.unwrap().amount, dec!(900));
    assert!(order(&engine, acme.id).await.paid);
}

#[tokio::test]
async fn invoice_payments_archive_and_unarchive() {
    let (_, engine) = memory_engine(EngineConfig::default());
    let orders = vec![
        Order::new(day(1), dec!(500), dec!(700)).with_party("Bharat"),
        Order::new(day(2), dec!(200), dec!(300)).with_party("Bharat"),
    ];
    let billed = Invoice::new(orders.iter().map(|o| o.id).collect(), dec!(1000)).with_party("Bharat");
    seed(&engine, &orders).await;
    seed(&engine, &[billed.clone()]).await;

    let partial = engine
        .add_invoice_payment(billed.id, dec!(600), day(4), None)
        .await
        .unwrap();
    assert_eq!(partial.archive, ArchiveChange::Unchanged);
    let closing = engine
        .add_invoice_payment(billed.id, dec!(350), day(5), Some("balance".into()))
        .await
        .unwrap();
    assert_eq!(closing.archive, ArchiveChange::Archived);
    assert!(invoice(&engine, billed.id).await.archived);
    assert!(order(&engine, orders[0].id).await.archived);

    let closing_entry = entry(&engine, closing.ledger_entry_id.unwrap()).await.unwrap();
    assert_eq!(closing_entry.source, EntrySource::InvoicePayment);
    assert_eq!(closing_entry.allocation_target(), None);

    let reopened = engine
        .remove_invoice_payment(billed.id, closing.payment_id)
        .await
        .unwrap();
    assert_eq!(reopened.archive, ArchiveChange::Unarchived);
    assert!(!order(&engine, orders[1].id).await.archived);
    assert!(entry(&engine, closing.ledger_entry_id.unwrap()).await.is_none());

    let restored = invoice(&engine, billed.id).await;
    assert_eq!(restored.paid_amount, dec!(600));
    assert!(!restored.archived);
}

#[tokio::test]
async fn direct_order_payments_post_to_journal() {
    let (memory, engine) = memory_engine(EngineConfig::default());
    let sample = Order::new(day(1), dec!(400), dec!(650)).with_supplier("Acme").with_party("Bharat");
    seed(&engine, &[sample.clone()]).await;

    let paid = engine
        .add_customer_payment(sample.id, PaymentInput::new(dec!(600), day(3)))
        .await
        .unwrap();
    assert!(!paid.order.payment_due);
    assert_eq!(memory.count(Collection::LedgerEntries), 1);

    engine
        .remove_order_payment(sample.id, paid.payment_id)
        .await
        .unwrap();
    assert!(order(&engine, sample.id).await.payment_due);
    assert_eq!(memory.count(Collection::LedgerEntries), 0);
}

#[tokio::test]
async fn backfill_repairs_legacy_party_payments_once() {
    let (memory, engine) = memory_engine(EngineConfig::default());
    let legacy = vec![
        PartyPayment::new("Bharat", dec!(1200), day(1)),
        PartyPayment::new("Chand", dec!(80), day(2)),
    ];
    seed(&engine, &legacy).await;

    let first = engine.backfill_party_payment_links().await.unwrap();
    assert_eq!(first.repaired.len(), 2);
    assert_eq!(memory.count(Collection::LedgerEntries), 2);

    let linked = Repository::<PartyPayment>::new(engine.store())
        .all()
        .await
        .unwrap();
    for payment in linked {
        let ledger_entry_id = payment.ledger_entry_id.expect("linked after backfill");
        let created = entry(&engine, ledger_entry_id).await.expect("entry created");
        assert_eq!(created.amount, payment.amount);
        assert_eq!(created.party.as_deref(), Some(payment.party.as_str()));
    }

    let second = engine.backfill_party_payment_links().await.unwrap();
    assert!(second.repaired.is_empty());
    assert_eq!(memory.count(Collection::LedgerEntries), 2);
}
