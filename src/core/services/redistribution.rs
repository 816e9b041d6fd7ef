//! Re-allocation after a ledger entry's amount or date changes.
//!
//! Existing linked payments are preserved; only the difference between the
//! entry amount and what its orders already hold is spread further, over
//! orders that carry nothing from the entry yet.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{AllocationTarget, LedgerEntry};
use crate::storage::{DocumentStore, Repository};

use super::allocation::{PaymentStamp, Settlement};
use super::{
    AllocationPlan, AllocationService, CommitReport, PaidStatus, ServiceError, ServiceResult,
    StoreContext, UnitOfWork,
};

/// Outcome of re-running allocation for one ledger entry.
#[derive(Debug)]
pub struct RedistributionOutcome {
    pub ledger_entry_id: Uuid,
    pub entry_amount: Decimal,
    /// Payments and adjustments the entry's orders already held, plus any
    /// historic amount carried by the entry.
    pub preserved: Decimal,
    /// `entry_amount - preserved`; what this run distributed.
    pub delta: Decimal,
    pub plan: AllocationPlan,
    pub overflow_order: Option<Uuid>,
    pub commit: CommitReport,
}

/// What a staged redistribution will write.
#[derive(Debug)]
pub(crate) struct StagedRedistribution {
    pub preserved: Decimal,
    pub delta: Decimal,
    pub settlement: Settlement,
}

pub struct RedistributionService {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl RedistributionService {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Tops up a supplier payment's orders after the entry grew.
    pub async fn redistribute_supplier_payment(
        &self,
        ledger_entry_id: Uuid,
        date: NaiveDate,
    ) -> ServiceResult<RedistributionOutcome> {
        let entry = self.load_entry(ledger_entry_id).await?;
        match entry.allocation_target() {
            Some(AllocationTarget::Supplier(_)) => self.run(&entry, date).await,
            _ => Err(ServiceError::Invalid(format!(
                "ledger entry {ledger_entry_id} is not a supplier payment"
            ))),
        }
    }

    /// Tops up a party payment's orders after the entry grew.
    pub async fn redistribute_party_payment(
        &self,
        ledger_entry_id: Uuid,
        date: NaiveDate,
    ) -> ServiceResult<RedistributionOutcome> {
        let entry = self.load_entry(ledger_entry_id).await?;
        match entry.allocation_target() {
            Some(AllocationTarget::Party(_)) => self.run(&entry, date).await,
            _ => Err(ServiceError::Invalid(format!(
                "ledger entry {ledger_entry_id} is not a party payment"
            ))),
        }
    }

    /// Redistributes whichever kind of tagged entry `ledger_entry_id` is.
    pub async fn redistribute(&self, ledger_entry_id: Uuid, date: NaiveDate) -> ServiceResult<RedistributionOutcome> {
        let entry = self.load_entry(ledger_entry_id).await?;
        self.run(&entry, date).await
    }

    async fn run(&self, entry: &LedgerEntry, date: NaiveDate) -> ServiceResult<RedistributionOutcome> {
        let mut uow = UnitOfWork::new(entry.id);
        let staged = self.stage(entry, date, &mut uow).await?;
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        Ok(RedistributionOutcome {
            ledger_entry_id: entry.id,
            entry_amount: entry.amount,
            preserved: staged.preserved,
            delta: staged.delta,
            plan: staged.settlement.plan,
            overflow_order: staged.settlement.overflow_order,
            commit,
        })
    }

    /// Computes and stages the redistribution of `entry` as it stands in memory.
    ///
    /// Fails with [`ServiceError::ReconciliationConflict`] before staging
    /// anything when the orders already hold more than the entry amount.
    pub(crate) async fn stage(
        &self,
        entry: &LedgerEntry,
        date: NaiveDate,
        uow: &mut UnitOfWork,
    ) -> ServiceResult<StagedRedistribution> {
        let target = entry.allocation_target().ok_or_else(|| {
            ServiceError::Invalid(format!(
                "ledger entry {} is not tagged with a supplier or party",
                entry.id
            ))
        })?;
        let side = target.side();
        let allocation = AllocationService::new(Arc::clone(&self.store), self.config.clone());
        let mut orders = allocation.orders_for(&target).await?;

        let linked: Decimal = orders
            .iter()
            .map(|order| order.linked_amount(side, entry.id))
            .sum();
        let preserved = linked + entry.historic_amount;
        let delta = entry.amount - preserved;

        if delta < Decimal::ZERO {
            warn!(
                ledger_entry_id = %entry.id,
                entry_amount = %entry.amount,
                %preserved,
                "entry shrank below its allocations; leaving orders untouched"
            );
            return Err(ServiceError::ReconciliationConflict {
                ledger_entry_id: entry.id,
                entry_amount: entry.amount,
                allocated: preserved,
            });
        }
        if delta == Decimal::ZERO {
            debug!(ledger_entry_id = %entry.id, "allocations already match entry amount");
            return Ok(StagedRedistribution {
                preserved,
                delta,
                settlement: Settlement::default(),
            });
        }

        let last_carrier = orders
            .iter()
            .filter(|order| order.linked_amount(side, entry.id) > Decimal::ZERO)
            .last()
            .map(|order| order.id);
        let tolerance = self.config.tolerances.expense;
        let fresh: Vec<_> = orders
            .iter()
            .filter(|order| order.linked_amount(side, entry.id) == Decimal::ZERO)
            .filter(|order| match target {
                AllocationTarget::Supplier(_) => {
                    !order.paid && !PaidStatus::is_expense_paid(order, tolerance)
                }
                AllocationTarget::Party(_) => true,
            })
            .cloned()
            .collect();

        let plan = match target {
            AllocationTarget::Supplier(_) => AllocationPlan::sequential(&fresh, side, delta),
            AllocationTarget::Party(_) => AllocationPlan::proportional(&fresh, side, delta),
        };
        let fallback = fresh.last().map(|order| order.id).or(last_carrier);
        let stamp = PaymentStamp::new(entry.id, date, entry.note.clone());
        let settlement = allocation.settle(&mut orders, plan, side, &stamp, fallback, uow)?;

        info!(
            ledger_entry_id = %entry.id,
            %preserved,
            %delta,
            allocated = %settlement.plan.allocated(),
            "redistributed ledger entry"
        );
        Ok(StagedRedistribution {
            preserved,
            delta,
            settlement,
        })
    }

    async fn load_entry(&self, ledger_entry_id: Uuid) -> ServiceResult<LedgerEntry> {
        Repository::<LedgerEntry>::new(Arc::clone(&self.store))
            .get(ledger_entry_id)
            .await
            .context(|| format!("loading ledger entry {ledger_entry_id}"))?
            .ok_or(ServiceError::NotFound {
                kind: "ledger entry",
                id: ledger_entry_id,
            })
    }
}
