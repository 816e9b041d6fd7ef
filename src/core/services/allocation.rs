//! Spreads a tagged ledger entry across a counterparty's orders.
//!
//! Supplier payments fill the oldest unpaid orders first. Party payments are
//! shared out in proportion to each order's value. Whatever cannot be placed
//! is parked as an adjustment on the last order touched, so the sum of all
//! linked records always equals the entry amount.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{round_money, AllocationTarget, Order, PaymentRecord, PaymentSide};
use crate::storage::{DocumentStore, Filter, Repository};

use super::{
    ensure_named, ensure_positive, CommitReport, PaidStatus, ServiceResult, StoreContext, UnitOfWork,
};

/// Amount assigned to one order.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationLine {
    pub order_id: Uuid,
    pub amount: Decimal,
}

/// Result of splitting a pool of money across orders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllocationPlan {
    pub lines: Vec<AllocationLine>,
    /// Money no order had room for.
    pub overflow: Decimal,
}

impl AllocationPlan {
    /// Fills orders in the given order, each up to its remaining balance.
    pub fn sequential(orders: &[Order], side: PaymentSide, pool: Decimal) -> Self {
        let mut grants = vec![Decimal::ZERO; orders.len()];
        let left = top_up(orders, side, pool, &mut grants);
        Self::from_grants(orders, grants, left)
    }

    /// Gives each order `round(value / total_value * pool, 2)`, capped by its
    /// remaining balance and by what is left of the pool.
    ///
    /// Money freed by caps and rounding then tops up orders that still have
    /// room, oldest first, before anything is reported as overflow.
    pub fn proportional(orders: &[Order], side: PaymentSide, pool: Decimal) -> Self {
        let total_value: Decimal = orders.iter().map(|order| order.target(side)).sum();
        let mut grants = vec![Decimal::ZERO; orders.len()];
        let mut left = pool;

        if total_value > Decimal::ZERO {
            for (grant, order) in grants.iter_mut().zip(orders) {
                if left <= Decimal::ZERO {
                    break;
                }
                let share = round_money(order.target(side) * pool / total_value);
                let amount = share.min(order.remaining(side)).min(left);
                if amount > Decimal::ZERO {
                    *grant = amount;
                    left -= amount;
                }
            }
        }

        let left = top_up(orders, side, left, &mut grants);
        Self::from_grants(orders, grants, left)
    }

    fn from_grants(orders: &[Order], grants: Vec<Decimal>, overflow: Decimal) -> Self {
        let lines = orders
            .iter()
            .zip(grants)
            .filter(|(_, amount)| *amount > Decimal::ZERO)
            .map(|(order, amount)| AllocationLine {
                order_id: order.id,
                amount,
            })
            .collect();
        Self { lines, overflow }
    }

    pub fn allocated(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount).sum()
    }

    pub fn amount_for(&self, order_id: Uuid) -> Decimal {
        self.lines
            .iter()
            .filter(|line| line.order_id == order_id)
            .map(|line| line.amount)
            .sum()
    }

    pub fn last_order(&self) -> Option<Uuid> {
        self.lines.last().map(|line| line.order_id)
    }
}

/// Adds to `grants` wherever an order still has room, returning what is left.
fn top_up(orders: &[Order], side: PaymentSide, mut left: Decimal, grants: &mut [Decimal]) -> Decimal {
    for (grant, order) in grants.iter_mut().zip(orders) {
        if left <= Decimal::ZERO {
            break;
        }
        let room = order.remaining(side) - *grant;
        if room <= Decimal::ZERO {
            continue;
        }
        let amount = room.min(left);
        *grant += amount;
        left -= amount;
    }
    left
}

/// Metadata copied onto every payment record created for a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentStamp {
    pub ledger_entry_id: Uuid,
    pub date: NaiveDate,
    pub note: Option<String>,
}

impl PaymentStamp {
    pub fn new(ledger_entry_id: Uuid, date: NaiveDate, note: Option<String>) -> Self {
        Self {
            ledger_entry_id,
            date,
            note,
        }
    }

    fn record(&self, amount: Decimal) -> PaymentRecord {
        PaymentRecord::linked(amount, self.date, self.ledger_entry_id).with_note(self.note.clone())
    }
}

/// Where a staged allocation put the money.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Settlement {
    pub plan: AllocationPlan,
    pub overflow_order: Option<Uuid>,
}

/// Outcome of a committed allocation.
#[derive(Debug)]
pub struct AllocationOutcome {
    pub ledger_entry_id: Uuid,
    pub target: AllocationTarget,
    pub plan: AllocationPlan,
    /// Order whose adjustment absorbed the overflow, if there was any.
    pub overflow_order: Option<Uuid>,
    pub commit: CommitReport,
}

impl AllocationOutcome {
    pub fn allocated(&self) -> Decimal {
        self.plan.allocated()
    }

    /// Overflow that found no order to attach to.
    pub fn unattached_overflow(&self) -> Decimal {
        if self.overflow_order.is_some() {
            Decimal::ZERO
        } else {
            self.plan.overflow
        }
    }
}

/// Allocates new ledger-entry money to supplier or party orders.
pub struct AllocationService {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl AllocationService {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Pays `amount` into the supplier's oldest unpaid orders.
    pub async fn distribute_to_supplier_orders(
        &self,
        supplier: &str,
        amount: Decimal,
        ledger_entry_id: Uuid,
        date: NaiveDate,
        note: Option<String>,
    ) -> ServiceResult<AllocationOutcome> {
        let target = AllocationTarget::Supplier(supplier.to_string());
        self.distribute(&target, amount, PaymentStamp::new(ledger_entry_id, date, note))
            .await
    }

    /// Shares `amount` across all of the party's orders by order value.
    pub async fn distribute_to_party_orders(
        &self,
        party: &str,
        amount: Decimal,
        ledger_entry_id: Uuid,
        date: NaiveDate,
        note: Option<String>,
    ) -> ServiceResult<AllocationOutcome> {
        let target = AllocationTarget::Party(party.to_string());
        self.distribute(&target, amount, PaymentStamp::new(ledger_entry_id, date, note))
            .await
    }

    pub async fn distribute(
        &self,
        target: &AllocationTarget,
        amount: Decimal,
        stamp: PaymentStamp,
    ) -> ServiceResult<AllocationOutcome> {
        let mut uow = UnitOfWork::new(stamp.ledger_entry_id);
        let settlement = self.stage(target, amount, &stamp, &mut uow).await?;
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        info!(
            target = %target.key(),
            ledger_entry_id = %stamp.ledger_entry_id,
            %amount,
            allocated = %settlement.plan.allocated(),
            overflow = %settlement.plan.overflow,
            "distributed ledger entry"
        );
        Ok(AllocationOutcome {
            ledger_entry_id: stamp.ledger_entry_id,
            target: target.clone(),
            plan: settlement.plan,
            overflow_order: settlement.overflow_order,
            commit,
        })
    }

    /// Plans the allocation and stages its writes without committing them.
    pub(crate) async fn stage(
        &self,
        target: &AllocationTarget,
        amount: Decimal,
        stamp: &PaymentStamp,
        uow: &mut UnitOfWork,
    ) -> ServiceResult<Settlement> {
        ensure_positive(amount, "allocation amount")?;
        ensure_named(target.name(), "allocation target")?;

        let side = target.side();
        let mut orders = self.orders_for(target).await?;
        if let AllocationTarget::Supplier(_) = target {
            let tolerance = self.config.tolerances.expense;
            orders.retain(|order| !order.paid && !PaidStatus::is_expense_paid(order, tolerance));
        }
        if orders.is_empty() {
            warn!(
                target = %target.key(),
                ledger_entry_id = %stamp.ledger_entry_id,
                %amount,
                "no eligible orders; nothing to allocate to"
            );
            return Ok(Settlement {
                plan: AllocationPlan {
                    lines: Vec::new(),
                    overflow: amount,
                },
                overflow_order: None,
            });
        }

        let plan = match target {
            AllocationTarget::Supplier(_) => AllocationPlan::sequential(&orders, side, amount),
            AllocationTarget::Party(_) => AllocationPlan::proportional(&orders, side, amount),
        };
        let fallback = orders.last().map(|order| order.id);
        self.settle(&mut orders, plan, side, stamp, fallback, uow)
    }

    /// Every order of the target, oldest first.
    pub(crate) async fn orders_for(&self, target: &AllocationTarget) -> ServiceResult<Vec<Order>> {
        let filter = match target {
            AllocationTarget::Supplier(name) => Filter::eq("supplier", name.as_str()),
            AllocationTarget::Party(name) => Filter::eq("party", name.as_str()),
        };
        let mut orders = Repository::<Order>::new(Arc::clone(&self.store))
            .find(&[filter])
            .await
            .context(|| format!("loading orders for {}", target.key()))?;
        orders.sort_by(|a, b| (a.date, a.created_at, a.id).cmp(&(b.date, b.created_at, b.id)));
        Ok(orders)
    }

    /// Writes `plan` into `orders` and stages every changed order.
    ///
    /// Overflow goes to the last order the plan touched, or to `fallback`
    /// when the plan touched none.
    pub(crate) fn settle(
        &self,
        orders: &mut [Order],
        plan: AllocationPlan,
        side: PaymentSide,
        stamp: &PaymentStamp,
        fallback: Option<Uuid>,
        uow: &mut UnitOfWork,
    ) -> ServiceResult<Settlement> {
        for line in &plan.lines {
            if let Some(order) = orders.iter_mut().find(|order| order.id == line.order_id) {
                order.payments_mut(side).push(stamp.record(line.amount));
                PaidStatus::refresh_side(order, side, &self.config.tolerances);
                uow.stage_order_payments(order)?;
            }
        }

        let mut overflow_order = None;
        if plan.overflow > Decimal::ZERO {
            let anchor = plan.last_order().or(fallback);
            match anchor.and_then(|id| orders.iter_mut().find(|order| order.id == id)) {
                Some(order) => {
                    order.add_adjustment(stamp.ledger_entry_id, side, plan.overflow);
                    uow.stage_order_payments(order)?;
                    overflow_order = Some(order.id);
                    debug!(
                        order_id = %order.id,
                        overflow = %plan.overflow,
                        "parked overflow as adjustment"
                    );
                }
                None => warn!(
                    ledger_entry_id = %stamp.ledger_entry_id,
                    overflow = %plan.overflow,
                    "overflow has no order to attach to"
                ),
            }
        }

        Ok(Settlement {
            plan,
            overflow_order,
        })
    }
}
