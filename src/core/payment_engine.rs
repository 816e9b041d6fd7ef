use std::{path::PathBuf, sync::Arc};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::services::{
    AllocationOutcome, AllocationService, BackfillReport, BackfillService, CascadeReport,
    CascadeService, InvoicePaymentManager, InvoicePaymentOutcome, JournalOutcome, JournalService,
    JournalUpdate, LedgerEntryChanges, NewLedgerEntry, OrderPaymentOutcome, OrderPaymentService,
    PaidStatus, PaymentInput, RedistributionOutcome, RedistributionService, ServiceResult,
    StoreContext, TargetLocks,
};
use crate::domain::{EntrySource, Invoice, LedgerEntry, Order, PaymentSide};
use crate::errors::StoreResult;
use crate::storage::{DocumentStore, JsonFileStore, Repository};

/// Facade that coordinates allocation, journal, and invoice operations over
/// one document store.
///
/// Every mutating call first takes the lock of the supplier, party, or
/// invoice it touches, so two calls against the same counterparty never
/// interleave their read-modify-write cycles inside this process.
pub struct PaymentEngine {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
    locks: TargetLocks,
}

impl PaymentEngine {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            locks: TargetLocks::new(),
        }
    }

    /// Opens (or creates) a JSON store file and wraps it in an engine.
    pub async fn open_json(path: impl Into<PathBuf>, config: EngineConfig) -> StoreResult<Self> {
        let store = JsonFileStore::open(path).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn allocation(&self) -> AllocationService {
        AllocationService::new(self.store(), self.config.clone())
    }

    pub fn redistribution(&self) -> RedistributionService {
        RedistributionService::new(self.store(), self.config.clone())
    }

    pub fn cascade(&self) -> CascadeService {
        CascadeService::new(self.store(), self.config.clone())
    }

    pub fn invoices(&self) -> InvoicePaymentManager {
        InvoicePaymentManager::new(self.store(), self.config.clone())
    }

    pub fn journal(&self) -> JournalService {
        JournalService::new(self.store(), self.config.clone())
    }

    pub fn order_payments(&self) -> OrderPaymentService {
        OrderPaymentService::new(self.store(), self.config.clone())
    }

    pub async fn distribute_to_supplier_orders(
        &self,
        supplier: &str,
        amount: Decimal,
        ledger_entry_id: Uuid,
        date: NaiveDate,
        note: Option<String>,
    ) -> ServiceResult<AllocationOutcome> {
        let _guard = self.locks.lock(&format!("supplier:{supplier}")).await;
        self.allocation()
            .distribute_to_supplier_orders(supplier, amount, ledger_entry_id, date, note)
            .await
    }

    pub async fn distribute_to_party_orders(
        &self,
        party: &str,
        amount: Decimal,
        ledger_entry_id: Uuid,
        date: NaiveDate,
        note: Option<String>,
    ) -> ServiceResult<AllocationOutcome> {
        let _guard = self.locks.lock(&format!("party:{party}")).await;
        self.allocation()
            .distribute_to_party_orders(party, amount, ledger_entry_id, date, note)
            .await
    }

    pub async fn redistribute_supplier_payment(
        &self,
        ledger_entry_id: Uuid,
        date: NaiveDate,
    ) -> ServiceResult<RedistributionOutcome> {
        let _guard = self.lock_entry(ledger_entry_id).await?;
        self.redistribution()
            .redistribute_supplier_payment(ledger_entry_id, date)
            .await
    }

    pub async fn redistribute_party_payment(
        &self,
        ledger_entry_id: Uuid,
        date: NaiveDate,
    ) -> ServiceResult<RedistributionOutcome> {
        let _guard = self.lock_entry(ledger_entry_id).await?;
        self.redistribution()
            .redistribute_party_payment(ledger_entry_id, date)
            .await
    }

    pub async fn cascade_remove(&self, ledger_entry_id: Uuid) -> ServiceResult<CascadeReport> {
        let _guard = self.lock_entry(ledger_entry_id).await?;
        self.cascade().cascade_remove(ledger_entry_id).await
    }

    pub fn is_expense_paid(&self, order: &Order) -> bool {
        PaidStatus::is_expense_paid(order, self.config.tolerances.expense)
    }

    pub fn is_customer_paid(&self, order: &Order) -> bool {
        PaidStatus::is_customer_paid(order, self.config.tolerances.customer)
    }

    pub fn is_invoice_paid(&self, invoice: &Invoice) -> bool {
        PaidStatus::is_invoice_paid(invoice, self.config.tolerances.invoice)
    }

    pub async fn add_invoice_payment(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        date: NaiveDate,
        note: Option<String>,
    ) -> ServiceResult<InvoicePaymentOutcome> {
        let _guard = self.locks.lock(&format!("invoice:{invoice_id}")).await;
        self.invoices().add_payment(invoice_id, amount, date, note).await
    }

    pub async fn remove_invoice_payment(
        &self,
        invoice_id: Uuid,
        payment_id: Uuid,
    ) -> ServiceResult<InvoicePaymentOutcome> {
        let _guard = self.locks.lock(&format!("invoice:{invoice_id}")).await;
        self.invoices().remove_payment(invoice_id, payment_id).await
    }

    pub async fn record_entry(&self, entry: NewLedgerEntry) -> ServiceResult<JournalOutcome> {
        let _guard = match entry.target() {
            Some(target) => Some(self.locks.lock(&target.key()).await),
            None => None,
        };
        self.journal().record_entry(entry).await
    }

    pub async fn update_entry(
        &self,
        ledger_entry_id: Uuid,
        changes: LedgerEntryChanges,
    ) -> ServiceResult<JournalUpdate> {
        let _guard = self.lock_entry(ledger_entry_id).await?;
        self.journal().update_entry(ledger_entry_id, changes).await
    }

    pub async fn delete_entry(&self, ledger_entry_id: Uuid) -> ServiceResult<CascadeReport> {
        let _guard = self.lock_entry(ledger_entry_id).await?;
        self.journal().delete_entry(ledger_entry_id).await
    }

    pub async fn void_entry(&self, ledger_entry_id: Uuid) -> ServiceResult<CascadeReport> {
        let _guard = self.lock_entry(ledger_entry_id).await?;
        self.journal().void_entry(ledger_entry_id).await
    }

    pub async fn add_supplier_payment(
        &self,
        order_id: Uuid,
        input: PaymentInput,
    ) -> ServiceResult<OrderPaymentOutcome> {
        let _guard = self.lock_order(order_id, PaymentSide::Supplier).await?;
        self.order_payments().add_supplier_payment(order_id, input).await
    }

    pub async fn add_customer_payment(
        &self,
        order_id: Uuid,
        input: PaymentInput,
    ) -> ServiceResult<OrderPaymentOutcome> {
        let _guard = self.lock_order(order_id, PaymentSide::Customer).await?;
        self.order_payments().add_customer_payment(order_id, input).await
    }

    pub async fn remove_order_payment(
        &self,
        order_id: Uuid,
        payment_id: Uuid,
    ) -> ServiceResult<OrderPaymentOutcome> {
        let side = match self.load_order(order_id).await? {
            Some(order) if order.customer_payments.iter().any(|p| p.id == payment_id) => {
                PaymentSide::Customer
            }
            _ => PaymentSide::Supplier,
        };
        let _guard = self.lock_order(order_id, side).await?;
        self.order_payments().remove_payment(order_id, payment_id).await
    }

    pub async fn backfill_party_payment_links(&self) -> ServiceResult<BackfillReport> {
        BackfillService::new(self.store(), self.config.clone())
            .backfill_party_payment_links()
            .await
    }

    /// Locks whatever a ledger entry's records live under.
    ///
    /// Tagged entries lock their supplier or party. Invoice payment entries
    /// lock the invoice holding them, and direct order payment entries lock
    /// the same key the order payment calls use. Anything else, including an
    /// entry that is already gone, locks the entry itself.
    async fn lock_entry(&self, ledger_entry_id: Uuid) -> ServiceResult<OwnedMutexGuard<()>> {
        let key = self.entry_lock_key(ledger_entry_id).await?;
        Ok(self.locks.lock(&key).await)
    }

    async fn entry_lock_key(&self, ledger_entry_id: Uuid) -> ServiceResult<String> {
        let fallback = format!("entry:{ledger_entry_id}");
        let Some(entry) = Repository::<LedgerEntry>::new(self.store())
            .get(ledger_entry_id)
            .await
            .context(|| format!("loading ledger entry {ledger_entry_id}"))?
        else {
            return Ok(fallback);
        };
        if let Some(target) = entry.allocation_target() {
            return Ok(target.key());
        }

        let key = match entry.source {
            EntrySource::InvoicePayment => Repository::<Invoice>::new(self.store())
                .all()
                .await
                .context(|| format!("finding the invoice of ledger entry {ledger_entry_id}"))?
                .into_iter()
                .find(|invoice| invoice.references(ledger_entry_id))
                .map(|invoice| format!("invoice:{}", invoice.id)),
            EntrySource::OrderExpense | EntrySource::OrderRevenue => {
                let side = match entry.source {
                    EntrySource::OrderExpense => PaymentSide::Supplier,
                    _ => PaymentSide::Customer,
                };
                Repository::<Order>::new(self.store())
                    .all()
                    .await
                    .context(|| format!("finding the order of ledger entry {ledger_entry_id}"))?
                    .into_iter()
                    .find(|order| order.has_payment_from(side, ledger_entry_id))
                    .map(|order| order_lock_key(order.id, Some(order), side))
            }
            _ => None,
        };
        Ok(key.unwrap_or(fallback))
    }

    async fn lock_order(&self, order_id: Uuid, side: PaymentSide) -> ServiceResult<OwnedMutexGuard<()>> {
        let order = self.load_order(order_id).await?;
        let key = order_lock_key(order_id, order, side);
        Ok(self.locks.lock(&key).await)
    }

    async fn load_order(&self, order_id: Uuid) -> ServiceResult<Option<Order>> {
        Repository::<Order>::new(self.store())
            .get(order_id)
            .await
            .context(|| format!("loading order {order_id}"))
    }
}

/// Counterparty whose allocations share `side` of the order, or the order itself.
fn order_lock_key(order_id: Uuid, order: Option<Order>, side: PaymentSide) -> String {
    order
        .and_then(|order| match side {
            PaymentSide::Supplier => order.supplier.map(|name| format!("supplier:{name}")),
            PaymentSide::Customer => order.party.map(|name| format!("party:{name}")),
        })
        .unwrap_or_else(|| format!("order:{order_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[tokio::test]
    async fn concurrent_party_payments_do_not_lose_records() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let order = Order::new(day(1), dec!(5000), dec!(5000)).with_party("Bharat");
        Repository::<Order>::new(store.clone()).create(&order).await.unwrap();
        let engine = Arc::new(PaymentEngine::new(store.clone(), EngineConfig::default()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine
                    .record_entry(NewLedgerEntry::credit(dec!(100), day(2)).with_note(format!("#{i}")))
                    .await
                    .unwrap();
                engine
                    .distribute_to_party_orders("Bharat", dec!(100), Uuid::new_v4(), day(2), None)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = Repository::<Order>::new(store).require(order.id).await.unwrap();
        assert_eq!(stored.customer_payments.len(), 8);
        assert_eq!(stored.paid_total(PaymentSide::Customer), dec!(800));
    }

    #[tokio::test]
    async fn untagged_entries_lock_what_they_touch() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let order = Order::new(day(1), dec!(500), dec!(700)).with_party("Bharat");
        let invoice = Invoice::new(vec![order.id], dec!(700)).with_party("Bharat");
        Repository::<Order>::new(store.clone()).create(&order).await.unwrap();
        Repository::<Invoice>::new(store.clone()).create(&invoice).await.unwrap();
        let engine = PaymentEngine::new(store, EngineConfig::default());

        let billed = engine
            .add_invoice_payment(invoice.id, dec!(200), day(2), None)
            .await
            .unwrap();
        let billed_entry = billed.ledger_entry_id.unwrap();
        assert_eq!(
            engine.entry_lock_key(billed_entry).await.unwrap(),
            format!("invoice:{}", invoice.id)
        );

        let direct = engine
            .add_customer_payment(order.id, PaymentInput::new(dec!(50), day(3)))
            .await
            .unwrap();
        let direct_entry = direct.ledger_entry_id.unwrap();
        assert_eq!(engine.entry_lock_key(direct_entry).await.unwrap(), "party:Bharat");

        let missing = Uuid::new_v4();
        assert_eq!(
            engine.entry_lock_key(missing).await.unwrap(),
            format!("entry:{missing}")
        );

        let _held = engine.locks.lock(&format!("invoice:{}", invoice.id)).await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            engine.delete_entry(billed_entry),
        )
        .await;
        assert!(blocked.is_err(), "deleting the entry must wait for the invoice lock");
    }

    #[tokio::test]
    async fn json_backed_engine_round_trips_allocations() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store.json");
        let order_id = {
            let engine = PaymentEngine::open_json(&path, EngineConfig::default()).await.unwrap();
            let order = Order::new(day(1), dec!(300), dec!(450)).with_supplier("Acme");
            Repository::<Order>::new(engine.store()).create(&order).await.unwrap();
            engine
                .record_entry(NewLedgerEntry::debit(dec!(300), day(3)).with_supplier("Acme"))
                .await
                .unwrap();
            order.id
        };

        let reopened = PaymentEngine::open_json(&path, EngineConfig::default()).await.unwrap();
        let order = Repository::<Order>::new(reopened.store())
            .require(order_id)
            .await
            .unwrap();
        assert!(reopened.is_expense_paid(&order));
        assert!(order.paid);
    }
}
