//! Cash journal operations that keep order allocations in step with entries.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{AllocationTarget, Direction, EntrySource, LedgerEntry, PartyPayment};
use crate::storage::{to_fields, DocumentStore, Filter, Repository};

use super::allocation::PaymentStamp;
use super::{
    ensure_named, ensure_positive, AllocationPlan, AllocationService, CascadeReport, CascadeService,
    CommitReport, RedistributionService, ServiceError, ServiceResult, StoreContext, UnitOfWork,
};

/// A journal entry as typed in by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub direction: Direction,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub note: Option<String>,
    pub supplier: Option<String>,
    pub party: Option<String>,
    pub partner: Option<String>,
}

impl NewLedgerEntry {
    pub fn debit(amount: Decimal, date: NaiveDate) -> Self {
        Self::new(Direction::Debit, amount, date)
    }

    pub fn credit(amount: Decimal, date: NaiveDate) -> Self {
        Self::new(Direction::Credit, amount, date)
    }

    fn new(direction: Direction, amount: Decimal, date: NaiveDate) -> Self {
        Self {
            direction,
            amount,
            date,
            note: None,
            supplier: None,
            party: None,
            partner: None,
        }
    }

    pub fn with_supplier(mut self, supplier: impl Into<String>) -> Self {
        self.supplier = Some(supplier.into());
        self
    }

    pub fn with_party(mut self, party: impl Into<String>) -> Self {
        self.party = Some(party.into());
        self
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Orders the entry will be allocated to once recorded.
    pub fn target(&self) -> Option<AllocationTarget> {
        match (self.direction, &self.supplier, &self.party) {
            (Direction::Debit, Some(supplier), _) => Some(AllocationTarget::Supplier(supplier.clone())),
            (Direction::Credit, _, Some(party)) => Some(AllocationTarget::Party(party.clone())),
            _ => None,
        }
    }

    fn validate(&self) -> ServiceResult<()> {
        ensure_positive(self.amount, "entry amount")?;
        if let Some(supplier) = &self.supplier {
            ensure_named(supplier, "supplier")?;
        }
        if let Some(party) = &self.party {
            ensure_named(party, "party")?;
        }
        Ok(())
    }

    fn into_entry(self) -> LedgerEntry {
        let source = match self.target() {
            Some(AllocationTarget::Supplier(_)) => EntrySource::SupplierPayment,
            Some(AllocationTarget::Party(_)) => EntrySource::PartyPayment,
            None => EntrySource::Manual,
        };
        let mut entry = LedgerEntry::new(self.direction, self.amount, self.date, source);
        entry.note = self.note;
        entry.supplier = self.supplier;
        entry.party = self.party;
        entry.partner = self.partner;
        entry
    }
}

/// Edits to an existing entry; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerEntryChanges {
    pub amount: Option<Decimal>,
    pub date: Option<NaiveDate>,
    /// `Some(None)` clears the note.
    pub note: Option<Option<String>>,
}

impl LedgerEntryChanges {
    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn note(mut self, note: Option<String>) -> Self {
        self.note = Some(note);
        self
    }
}

#[derive(Serialize)]
struct EntryPatch<'a> {
    amount: Decimal,
    date: NaiveDate,
    note: &'a Option<String>,
}

#[derive(Serialize)]
struct VoidPatch {
    voided: bool,
}

#[derive(Debug)]
pub struct JournalOutcome {
    pub entry: LedgerEntry,
    pub party_payment: Option<Uuid>,
    pub plan: Option<AllocationPlan>,
    pub overflow_order: Option<Uuid>,
    pub commit: CommitReport,
}

#[derive(Debug)]
pub struct JournalUpdate {
    pub entry: LedgerEntry,
    /// Amount redistributed, when the change called for it.
    pub delta: Option<Decimal>,
    pub plan: Option<AllocationPlan>,
    pub overflow_order: Option<Uuid>,
    pub party_payments_synced: usize,
    pub commit: CommitReport,
}

/// Records, edits, voids, and deletes journal entries.
pub struct JournalService {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl JournalService {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    fn entries(&self) -> Repository<LedgerEntry> {
        Repository::new(Arc::clone(&self.store))
    }

    /// Creates the entry and, for tagged entries, allocates it once.
    ///
    /// Party credits also get a mirroring [`PartyPayment`]. The entry, the
    /// mirror, and every order change commit as one unit of work.
    pub async fn record_entry(&self, new_entry: NewLedgerEntry) -> ServiceResult<JournalOutcome> {
        new_entry.validate()?;
        let entry = new_entry.into_entry();
        let mut uow = UnitOfWork::new(entry.id);
        uow.stage_create(&entry)?;

        let mut party_payment = None;
        let settlement = match entry.allocation_target() {
            Some(target) => {
                if let AllocationTarget::Party(party) = &target {
                    let mut mirror = PartyPayment::new(party.as_str(), entry.amount, entry.date).linked_to(entry.id);
                    mirror.note = entry.note.clone();
                    uow.stage_create(&mirror)?;
                    party_payment = Some(mirror.id);
                }
                let stamp = PaymentStamp::new(entry.id, entry.date, entry.note.clone());
                let allocation = AllocationService::new(Arc::clone(&self.store), self.config.clone());
                Some(allocation.stage(&target, entry.amount, &stamp, &mut uow).await?)
            }
            None => None,
        };

        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        info!(
            ledger_entry_id = %entry.id,
            amount = %entry.amount,
            source = ?entry.source,
            allocated = settlement.is_some(),
            "recorded journal entry"
        );
        let (plan, overflow_order) = match settlement {
            Some(settlement) => (Some(settlement.plan), settlement.overflow_order),
            None => (None, None),
        };
        Ok(JournalOutcome {
            entry,
            party_payment,
            plan,
            overflow_order,
            commit,
        })
    }

    /// Applies `changes`, redistributing when a tagged entry's amount or date moved.
    ///
    /// On a reconciliation conflict nothing is written, including the edit.
    pub async fn update_entry(&self, ledger_entry_id: Uuid, changes: LedgerEntryChanges) -> ServiceResult<JournalUpdate> {
        let mut entry = self.load(ledger_entry_id).await?;
        if entry.voided {
            return Err(ServiceError::Invalid(format!(
                "ledger entry {ledger_entry_id} is voided and cannot be edited"
            )));
        }
        let moved = changes.amount.is_some_and(|amount| amount != entry.amount)
            || changes.date.is_some_and(|date| date != entry.date);
        if let Some(amount) = changes.amount {
            ensure_positive(amount, "entry amount")?;
            entry.amount = amount;
        }
        if let Some(date) = changes.date {
            entry.date = date;
        }
        if let Some(note) = changes.note {
            entry.note = note;
        }

        let mut uow = UnitOfWork::new(entry.id);
        let target = entry.allocation_target();
        let staged = match (&target, moved) {
            (Some(_), true) => {
                let redistribution = RedistributionService::new(Arc::clone(&self.store), self.config.clone());
                Some(redistribution.stage(&entry, entry.date, &mut uow).await?)
            }
            _ => None,
        };

        let patch = EntryPatch {
            amount: entry.amount,
            date: entry.date,
            note: &entry.note,
        };
        let fields = to_fields(&patch).context(|| format!("serializing ledger entry {ledger_entry_id}"))?;
        uow.stage_update::<LedgerEntry>(entry.id, fields.clone());

        let mut party_payments_synced = 0;
        if let Some(AllocationTarget::Party(_)) = target {
            for mirror in self.mirrors_of(entry.id).await? {
                uow.stage_update::<PartyPayment>(mirror.id, fields.clone());
                party_payments_synced += 1;
            }
        }

        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        info!(%ledger_entry_id, amount = %entry.amount, redistributed = staged.is_some(), "updated journal entry");
        let (delta, plan, overflow_order) = match staged {
            Some(staged) => (
                Some(staged.delta),
                Some(staged.settlement.plan),
                staged.settlement.overflow_order,
            ),
            None => (None, None, None),
        };
        Ok(JournalUpdate {
            entry,
            delta,
            plan,
            overflow_order,
            party_payments_synced,
            commit,
        })
    }

    /// Removes the entry's allocations, then the entry itself.
    pub async fn delete_entry(&self, ledger_entry_id: Uuid) -> ServiceResult<CascadeReport> {
        let entry = self.load(ledger_entry_id).await?;
        let cascade = CascadeService::new(Arc::clone(&self.store), self.config.clone());
        let mut uow = UnitOfWork::new(entry.id);
        let staged = cascade.stage(entry.id, &mut uow).await?;
        uow.stage_delete::<LedgerEntry>(entry.id);
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        info!(%ledger_entry_id, "deleted journal entry");
        cascade.finish(entry.id, staged, commit).await
    }

    /// Keeps the entry for the record but withdraws everything it allocated.
    pub async fn void_entry(&self, ledger_entry_id: Uuid) -> ServiceResult<CascadeReport> {
        let entry = self.load(ledger_entry_id).await?;
        let cascade = CascadeService::new(Arc::clone(&self.store), self.config.clone());
        let mut uow = UnitOfWork::new(entry.id);
        let staged = cascade.stage(entry.id, &mut uow).await?;
        if !entry.voided {
            let fields = to_fields(&VoidPatch { voided: true })
                .context(|| format!("serializing ledger entry {ledger_entry_id}"))?;
            uow.stage_update::<LedgerEntry>(entry.id, fields);
        }
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        info!(%ledger_entry_id, "voided journal entry");
        cascade.finish(entry.id, staged, commit).await
    }

    async fn mirrors_of(&self, ledger_entry_id: Uuid) -> ServiceResult<Vec<PartyPayment>> {
        Repository::<PartyPayment>::new(Arc::clone(&self.store))
            .find(&[Filter::eq("ledger_entry_id", ledger_entry_id.to_string())])
            .await
            .context(|| format!("loading party payments for ledger entry {ledger_entry_id}"))
    }

    async fn load(&self, ledger_entry_id: Uuid) -> ServiceResult<LedgerEntry> {
        self.entries()
            .get(ledger_entry_id)
            .await
            .context(|| format!("loading ledger entry {ledger_entry_id}"))?
            .ok_or(ServiceError::NotFound {
                kind: "ledger entry",
                id: ledger_entry_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::services::fixtures::{config, day, load, memory_store, seed};
    use crate::domain::{Order, PaymentSide};
    use crate::storage::Collection;
    use rust_decimal_macros::dec;

    async fn party_orders(store: &Arc<dyn DocumentStore>) -> (Order, Order) {
        let first = Order::new(day(1), dec!(6000), dec!(8000)).with_party("Bharat");
        let second = Order::new(day(2), dec!(1500), dec!(2000)).with_party("Bharat");
        seed(store, &[first.clone(), second.clone()]).await;
        (first, second)
    }

    #[tokio::test]
    async fn party_credit_mirrors_and_allocates_once() {
        let (memory, store) = memory_store();
        let (first, second) = party_orders(&store).await;
        let journal = JournalService::new(store.clone(), config());

        let outcome = journal
            .record_entry(NewLedgerEntry::credit(dec!(5000), day(10)).with_party("Bharat"))
            .await
            .unwrap();

        assert_eq!(outcome.entry.source, EntrySource::PartyPayment);
        assert!(outcome.party_payment.is_some());
        assert_eq!(memory.count(Collection::PartyPayments), 1);
        let first: Order = load(&store, first.id).await;
        let second: Order = load(&store, second.id).await;
        assert_eq!(first.linked_amount(PaymentSide::Customer, outcome.entry.id), dec!(4000));
        assert_eq!(second.linked_amount(PaymentSide::Customer, outcome.entry.id), dec!(1000));
    }

    #[tokio::test]
    async fn untagged_entry_allocates_nothing() {
        let (memory, store) = memory_store();
        party_orders(&store).await;

        let outcome = JournalService::new(store, config())
            .record_entry(NewLedgerEntry::credit(dec!(50), day(3)).with_partner("Bank"))
            .await
            .unwrap();

        assert_eq!(outcome.entry.source, EntrySource::Manual);
        assert!(outcome.plan.is_none());
        assert_eq!(outcome.commit.written, 1);
        assert_eq!(memory.count(Collection::PartyPayments), 0);
    }

    #[tokio::test]
    async fn shrinking_edit_is_rolled_back() {
        let (_, store) = memory_store();
        party_orders(&store).await;
        let journal = JournalService::new(store.clone(), config());
        let recorded = journal
            .record_entry(NewLedgerEntry::credit(dec!(5000), day(10)).with_party("Bharat"))
            .await
            .unwrap();

        let err = journal
            .update_entry(recorded.entry.id, LedgerEntryChanges::default().amount(dec!(3000)))
            .await
            .expect_err("shrink must conflict");
        assert!(matches!(err, ServiceError::ReconciliationConflict { .. }));

        let stored: LedgerEntry = load(&store, recorded.entry.id).await;
        assert_eq!(stored.amount, dec!(5000));
    }

    #[tokio::test]
    async fn growing_edit_redistributes_and_syncs_mirror() {
        let (_, store) = memory_store();
        party_orders(&store).await;
        let journal = JournalService::new(store.clone(), config());
        let recorded = journal
            .record_entry(NewLedgerEntry::credit(dec!(5000), day(10)).with_party("Bharat"))
            .await
            .unwrap();

        let updated = journal
            .update_entry(
                recorded.entry.id,
                LedgerEntryChanges::default()
                    .amount(dec!(5600))
                    .note(Some("corrected".into())),
            )
            .await
            .unwrap();

        assert_eq!(updated.delta, Some(dec!(600)));
        assert_eq!(updated.party_payments_synced, 1);
        let mirror: PartyPayment = load(&store, recorded.party_payment.unwrap()).await;
        assert_eq!(mirror.amount, dec!(5600));
        assert_eq!(mirror.note.as_deref(), Some("corrected"));
        let overflow_order: Order = load(&store, updated.overflow_order.expect("overflow parked")).await;
        assert_eq!(overflow_order.revenue_adjustment, dec!(600));
    }

    #[tokio::test]
    async fn delete_removes_allocations_mirror_and_entry() {
        let (memory, store) = memory_store();
        let (first, _) = party_orders(&store).await;
        let journal = JournalService::new(store.clone(), config());
        let recorded = journal
            .record_entry(NewLedgerEntry::credit(dec!(5000), day(10)).with_party("Bharat"))
            .await
            .unwrap();

        let report = journal.delete_entry(recorded.entry.id).await.unwrap();

        assert_eq!(report.orders.len(), 2);
        assert_eq!(memory.count(Collection::LedgerEntries), 0);
        assert_eq!(memory.count(Collection::PartyPayments), 0);
        let first: Order = load(&store, first.id).await;
        assert!(first.customer_payments.is_empty());
    }

    #[tokio::test]
    async fn voided_entry_keeps_record_but_not_allocations() {
        let (memory, store) = memory_store();
        let order = Order::new(day(1), dec!(700), dec!(900)).with_supplier("Acme");
        seed(&store, &[order.clone()]).await;
        let journal = JournalService::new(store.clone(), config());
        let recorded = journal
            .record_entry(NewLedgerEntry::debit(dec!(700), day(4)).with_supplier("Acme"))
            .await
            .unwrap();

        journal.void_entry(recorded.entry.id).await.unwrap();

        let stored: LedgerEntry = load(&store, recorded.entry.id).await;
        assert!(stored.voided);
        assert_eq!(memory.count(Collection::LedgerEntries), 1);
        let order: Order = load(&store, order.id).await;
        assert!(order.partial_payments.is_empty());
        assert!(!order.paid);

        let err = journal
            .update_entry(stored.id, LedgerEntryChanges::default().amount(dec!(10)))
            .await
            .expect_err("voided entries are frozen");
        assert!(matches!(err, ServiceError::Invalid(_)));
    }
}
