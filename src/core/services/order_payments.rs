//! Payments entered directly on a single order.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{Direction, EntrySource, LedgerEntry, Order, PaymentRecord, PaymentSide};
use crate::storage::{DocumentStore, Repository};

use super::{
    ensure_positive, CommitReport, PaidStatus, ServiceError, ServiceResult, StoreContext, UnitOfWork,
};

/// A payment typed in against one order.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentInput {
    pub amount: Decimal,
    pub date: NaiveDate,
    pub note: Option<String>,
    /// Also write an untagged journal entry for the cash movement.
    pub post_to_journal: bool,
}

impl PaymentInput {
    pub fn new(amount: Decimal, date: NaiveDate) -> Self {
        Self {
            amount,
            date,
            note: None,
            post_to_journal: true,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn without_journal(mut self) -> Self {
        self.post_to_journal = false;
        self
    }
}

#[derive(Debug)]
pub struct OrderPaymentOutcome {
    pub order: Order,
    pub payment_id: Uuid,
    pub ledger_entry_id: Option<Uuid>,
    pub commit: CommitReport,
}

pub struct OrderPaymentService {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl OrderPaymentService {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub async fn add_supplier_payment(&self, order_id: Uuid, input: PaymentInput) -> ServiceResult<OrderPaymentOutcome> {
        self.add_payment(order_id, PaymentSide::Supplier, input).await
    }

    pub async fn add_customer_payment(&self, order_id: Uuid, input: PaymentInput) -> ServiceResult<OrderPaymentOutcome> {
        self.add_payment(order_id, PaymentSide::Customer, input).await
    }

    /// Appends a payment to one side of the order and refreshes its flags.
    pub async fn add_payment(
        &self,
        order_id: Uuid,
        side: PaymentSide,
        input: PaymentInput,
    ) -> ServiceResult<OrderPaymentOutcome> {
        ensure_positive(input.amount, "payment amount")?;
        let mut order = self.load(order_id).await?;
        let tolerance = self.config.tolerances.for_side(side);
        let remaining = order.remaining(side);
        if input.amount > remaining + tolerance {
            return Err(ServiceError::Invalid(format!(
                "payment of {} exceeds the {remaining} still open on order {order_id}",
                input.amount
            )));
        }

        let entry = input.post_to_journal.then(|| {
            let (direction, source) = match side {
                PaymentSide::Supplier => (Direction::Debit, EntrySource::OrderExpense),
                PaymentSide::Customer => (Direction::Credit, EntrySource::OrderRevenue),
            };
            let mut entry = LedgerEntry::new(direction, input.amount, input.date, source);
            entry.note = input.note.clone();
            entry.partner = match side {
                PaymentSide::Supplier => order.supplier.clone(),
                PaymentSide::Customer => order.party.clone(),
            };
            entry
        });

        let record = match &entry {
            Some(entry) => PaymentRecord::linked(input.amount, input.date, entry.id),
            None => PaymentRecord::manual(input.amount, input.date),
        }
        .with_note(input.note);
        let payment_id = record.id;
        order.payments_mut(side).push(record);
        PaidStatus::refresh_side(&mut order, side, &self.config.tolerances);

        let mut uow = match &entry {
            Some(entry) => UnitOfWork::new(entry.id),
            None => UnitOfWork::detached(),
        };
        if let Some(entry) = &entry {
            uow.stage_create(entry)?;
        }
        uow.stage_order_payments(&order)?;
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;

        info!(%order_id, ?side, amount = %input.amount, "recorded order payment");
        Ok(OrderPaymentOutcome {
            order,
            payment_id,
            ledger_entry_id: entry.map(|entry| entry.id),
            commit,
        })
    }

    /// Removes a payment from whichever side holds it.
    ///
    /// A payment posted from this service takes its journal entry with it.
    /// Payments that came from distributing a supplier or party entry are
    /// refused; edit or delete that journal entry instead.
    pub async fn remove_payment(&self, order_id: Uuid, payment_id: Uuid) -> ServiceResult<OrderPaymentOutcome> {
        let mut order = self.load(order_id).await?;
        let (side, record) = [PaymentSide::Supplier, PaymentSide::Customer]
            .into_iter()
            .find_map(|side| {
                order
                    .payments(side)
                    .iter()
                    .find(|record| record.id == payment_id)
                    .map(|record| (side, record.clone()))
            })
            .ok_or(ServiceError::NotFound {
                kind: "order payment",
                id: payment_id,
            })?;

        let mut uow = UnitOfWork::detached();
        if let Some(entry_id) = record.ledger_entry_id {
            uow = UnitOfWork::new(entry_id);
            let entry = Repository::<LedgerEntry>::new(Arc::clone(&self.store))
                .get(entry_id)
                .await
                .context(|| format!("loading ledger entry {entry_id}"))?;
            if let Some(entry) = entry {
                if !matches!(entry.source, EntrySource::OrderExpense | EntrySource::OrderRevenue) {
                    return Err(ServiceError::Invalid(format!(
                        "payment {payment_id} was allocated from ledger entry {entry_id}; change that entry instead"
                    )));
                }
                uow.stage_delete::<LedgerEntry>(entry_id);
            }
        }

        order
            .payments_mut(side)
            .retain(|existing| existing.id != payment_id);
        PaidStatus::refresh_side(&mut order, side, &self.config.tolerances);
        uow.stage_order_payments(&order)?;
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;

        info!(%order_id, %payment_id, ?side, "removed order payment");
        Ok(OrderPaymentOutcome {
            order,
            payment_id,
            ledger_entry_id: record.ledger_entry_id,
            commit,
        })
    }

    async fn load(&self, order_id: Uuid) -> ServiceResult<Order> {
        Repository::<Order>::new(Arc::clone(&self.store))
            .get(order_id)
            .await
            .context(|| format!("loading order {order_id}"))?
            .ok_or(ServiceError::NotFound {
                kind: "order",
                id: order_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::services::fixtures::{config, day, load, memory_store, seed};
    use crate::core::services::AllocationService;
    use crate::storage::Collection;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn posted_payment_creates_untagged_journal_entry() {
        let (memory, store) = memory_store();
        let order = Order::new(day(1), dec!(900), dec!(1200)).with_supplier("Acme");
        seed(&store, &[order.clone()]).await;
        let service = OrderPaymentService::new(store.clone(), config());

        let outcome = service
            .add_supplier_payment(order.id, PaymentInput::new(dec!(850), day(4)).with_note("cheque"))
            .await
            .unwrap();

        assert!(outcome.order.paid);
        let entry_id = outcome.ledger_entry_id.expect("journal entry");
        let entry: LedgerEntry = load(&store, entry_id).await;
        assert_eq!(entry.source, EntrySource::OrderExpense);
        assert_eq!(entry.direction, Direction::Debit);
        assert_eq!(entry.allocation_target(), None);
        assert_eq!(entry.partner.as_deref(), Some("Acme"));
        assert_eq!(memory.count(Collection::LedgerEntries), 1);
    }

    #[tokio::test]
    async fn unposted_payment_is_manual() {
        let (memory, store) = memory_store();
        let order = Order::new(day(1), dec!(900), dec!(1200)).with_party("Bharat");
        seed(&store, &[order.clone()]).await;

        let outcome = OrderPaymentService::new(store.clone(), config())
            .add_customer_payment(order.id, PaymentInput::new(dec!(300), day(4)).without_journal())
            .await
            .unwrap();

        assert!(outcome.ledger_entry_id.is_none());
        assert!(outcome.order.customer_payments[0].is_manual());
        assert!(outcome.order.payment_due);
        assert_eq!(memory.count(Collection::LedgerEntries), 0);
    }

    #[tokio::test]
    async fn payment_beyond_balance_and_tolerance_is_rejected() {
        let (_, store) = memory_store();
        let order = Order::new(day(1), dec!(900), dec!(1200));
        seed(&store, &[order.clone()]).await;

        let err = OrderPaymentService::new(store, config())
            .add_supplier_payment(order.id, PaymentInput::new(dec!(1000.01), day(4)))
            .await
            .expect_err("overpayment must fail");
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn removing_posted_payment_deletes_its_entry() {
        let (memory, store) = memory_store();
        let order = Order::new(day(1), dec!(900), dec!(1200));
        seed(&store, &[order.clone()]).await;
        let service = OrderPaymentService::new(store.clone(), config());
        let added = service
            .add_customer_payment(order.id, PaymentInput::new(dec!(1200), day(4)))
            .await
            .unwrap();
        assert!(!added.order.payment_due);

        let removed = service.remove_payment(order.id, added.payment_id).await.unwrap();

        assert!(removed.order.customer_payments.is_empty());
        assert!(removed.order.payment_due);
        assert_eq!(memory.count(Collection::LedgerEntries), 0);
    }

    #[tokio::test]
    async fn allocated_payments_cannot_be_removed_individually() {
        let (_, store) = memory_store();
        let order = Order::new(day(1), dec!(900), dec!(900)).with_supplier("Acme");
        let entry = LedgerEntry::supplier_payment("Acme", dec!(500), day(2));
        seed(&store, &[order.clone()]).await;
        seed(&store, &[entry.clone()]).await;
        AllocationService::new(store.clone(), config())
            .distribute_to_supplier_orders("Acme", entry.amount, entry.id, entry.date, None)
            .await
            .unwrap();
        let stored: Order = load(&store, order.id).await;

        let err = OrderPaymentService::new(store, config())
            .remove_payment(order.id, stored.partial_payments[0].id)
            .await
            .expect_err("allocated payment is owned by its entry");
        assert!(matches!(err, ServiceError::Invalid(_)));
    }
}
