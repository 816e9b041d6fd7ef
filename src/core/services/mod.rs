pub mod allocation;
pub mod backfill;
pub mod cascade;
pub mod invoice_payments;
pub mod journal;
pub mod order_payments;
pub mod paid_status;
pub mod redistribution;
pub mod target_locks;
pub mod unit_of_work;

#[cfg(test)]
pub(crate) mod fixtures;

pub use allocation::{AllocationLine, AllocationOutcome, AllocationPlan, AllocationService, PaymentStamp};
pub use backfill::{BackfillReport, BackfillService, RepairedLink};
pub use cascade::{CascadeReport, CascadeService};
pub use invoice_payments::{ArchiveChange, InvoicePaymentManager, InvoicePaymentOutcome};
pub use journal::{JournalOutcome, JournalService, JournalUpdate, LedgerEntryChanges, NewLedgerEntry};
pub use order_payments::{OrderPaymentOutcome, OrderPaymentService, PaymentInput};
pub use paid_status::PaidStatus;
pub use redistribution::{RedistributionOutcome, RedistributionService};
pub use target_locks::TargetLocks;
pub use unit_of_work::{CommitReport, UnitOfWork, WriteFailure};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{context}: {source} ({})", .source.hint())]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("{0}")]
    Invalid(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error(
        "ledger entry {ledger_entry_id} was reduced to {entry_amount} but {allocated} is already allocated to orders"
    )]
    ReconciliationConflict {
        ledger_entry_id: Uuid,
        entry_amount: Decimal,
        allocated: Decimal,
    },
}

/// Re-wraps store failures with a description of what was being attempted.
pub(crate) trait StoreContext<T> {
    fn context(self, context: impl FnOnce() -> String) -> ServiceResult<T>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn context(self, context: impl FnOnce() -> String) -> ServiceResult<T> {
        self.map_err(|source| ServiceError::Store {
            context: context(),
            source,
        })
    }
}

pub(crate) fn ensure_positive(amount: Decimal, what: &str) -> ServiceResult<()> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::Invalid(format!(
            "{what} must be greater than zero (got {amount})"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_named(value: &str, what: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::Invalid(format!("{what} is required")));
    }
    Ok(())
}
