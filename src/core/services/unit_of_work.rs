//! Staging area for the writes produced by one ledger-entry operation.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::WriteMode;
use crate::domain::{Adjustment, Invoice, InvoicePayment, Order, PaymentRecord};
use crate::errors::StoreError;
use crate::storage::{to_fields, Collection, Document, DocumentStore, FieldMap, Repository, WriteOp};

use super::{ServiceError, ServiceResult, StoreContext};

/// Payment-related fields of an order, written together.
#[derive(Serialize)]
struct OrderPaymentState<'a> {
    partial_payments: &'a [PaymentRecord],
    customer_payments: &'a [PaymentRecord],
    adjustments: &'a [Adjustment],
    expense_adjustment: Decimal,
    revenue_adjustment: Decimal,
    paid: bool,
    payment_due: bool,
}

#[derive(Serialize)]
struct InvoicePaymentState<'a> {
    partial_payments: &'a [InvoicePayment],
    paid_amount: Decimal,
    paid: bool,
}

#[derive(Serialize)]
struct ArchiveFlag {
    archived: bool,
}

/// A write that did not reach the store in sequential mode.
#[derive(Debug)]
pub struct WriteFailure {
    pub collection: Collection,
    pub id: Uuid,
    pub error: StoreError,
}

/// What a commit managed to write.
#[derive(Debug, Default)]
pub struct CommitReport {
    pub ledger_entry_id: Option<Uuid>,
    pub written: usize,
    pub failures: Vec<WriteFailure>,
}

impl CommitReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<Uuid> {
        self.failures.iter().map(|failure| failure.id).collect()
    }
}

/// Collects every record write caused by one ledger entry.
///
/// Updates to the same record are merged so each record is written once.
/// In [`WriteMode::Batch`] the whole set commits atomically; in
/// [`WriteMode::Sequential`] each record is written on its own and failures
/// are collected instead of aborting the rest.
#[derive(Debug)]
pub struct UnitOfWork {
    ledger_entry_id: Option<Uuid>,
    ops: Vec<WriteOp>,
}

impl UnitOfWork {
    pub fn new(ledger_entry_id: Uuid) -> Self {
        Self {
            ledger_entry_id: Some(ledger_entry_id),
            ops: Vec::new(),
        }
    }

    /// A unit of work that is not tied to a single ledger entry.
    pub fn detached() -> Self {
        Self {
            ledger_entry_id: None,
            ops: Vec::new(),
        }
    }

    pub fn ledger_entry_id(&self) -> Option<Uuid> {
        self.ledger_entry_id
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn stage_create<T: Document>(&mut self, record: &T) -> ServiceResult<()> {
        let op = Repository::<T>::create_op(record)
            .context(|| format!("serializing new {} record {}", T::COLLECTION, record.id()))?;
        self.push(op);
        Ok(())
    }

    pub fn stage_update<T: Document>(&mut self, id: Uuid, fields: FieldMap) {
        self.push(Repository::<T>::update_op(id, fields));
    }

    pub fn stage_delete<T: Document>(&mut self, id: Uuid) {
        self.push(Repository::<T>::delete_op(id));
    }

    /// Stages the payment lists, adjustments, and status flags of an order.
    pub fn stage_order_payments(&mut self, order: &Order) -> ServiceResult<()> {
        let fields = to_fields(&OrderPaymentState {
            partial_payments: &order.partial_payments,
            customer_payments: &order.customer_payments,
            adjustments: &order.adjustments,
            expense_adjustment: order.expense_adjustment,
            revenue_adjustment: order.revenue_adjustment,
            paid: order.paid,
            payment_due: order.payment_due,
        })
        .context(|| format!("serializing payments of order {}", order.id))?;
        self.stage_update::<Order>(order.id, fields);
        Ok(())
    }

    pub fn stage_invoice_payments(&mut self, invoice: &Invoice) -> ServiceResult<()> {
        let fields = to_fields(&InvoicePaymentState {
            partial_payments: &invoice.partial_payments,
            paid_amount: invoice.paid_amount,
            paid: invoice.paid,
        })
        .context(|| format!("serializing payments of invoice {}", invoice.id))?;
        self.stage_update::<Invoice>(invoice.id, fields);
        Ok(())
    }

    fn push(&mut self, op: WriteOp) {
        if let WriteOp::Update {
            collection,
            id,
            fields,
        } = &op
        {
            let pending = self.ops.iter_mut().find(|staged| {
                matches!(staged, WriteOp::Update { .. } | WriteOp::Create { .. })
                    && staged.collection() == *collection
                    && staged.id() == *id
            });
            match pending {
                Some(WriteOp::Update { fields: staged, .. }) => {
                    for (key, value) in fields {
                        staged.insert(key.clone(), value.clone());
                    }
                    return;
                }
                Some(WriteOp::Create { record, .. }) => {
                    if let Some(object) = record.as_object_mut() {
                        for (key, value) in fields {
                            object.insert(key.clone(), value.clone());
                        }
                        return;
                    }
                }
                _ => {}
            }
        }
        self.ops.push(op);
    }

    pub async fn commit(self, store: &dyn DocumentStore, mode: WriteMode) -> ServiceResult<CommitReport> {
        let mut report = CommitReport {
            ledger_entry_id: self.ledger_entry_id,
            ..CommitReport::default()
        };
        if self.ops.is_empty() {
            return Ok(report);
        }
        let label = self
            .ledger_entry_id
            .map(|id| format!("ledger entry {id}"))
            .unwrap_or_else(|| "maintenance".to_string());

        match mode {
            WriteMode::Batch => {
                let count = self.ops.len();
                store.batch_write(self.ops).await.map_err(|source| {
                    warn!(%label, count, error = %source, "batch commit rejected");
                    ServiceError::Store {
                        context: format!("committing {count} changes for {label}"),
                        source,
                    }
                })?;
                report.written = count;
            }
            WriteMode::Sequential => {
                for op in self.ops {
                    let (collection, id) = (op.collection(), op.id());
                    match store.apply(op).await {
                        Ok(()) => report.written += 1,
                        Err(error) => {
                            warn!(%label, %collection, %id, %error, "skipping failed write");
                            report.failures.push(WriteFailure { collection, id, error });
                        }
                    }
                }
            }
        }
        debug!(%label, written = report.written, failed = report.failures.len(), "unit of work committed");
        Ok(report)
    }
}

/// Writes the `archived` flag on a single record.
pub(crate) fn archive_fields(archived: bool) -> ServiceResult<FieldMap> {
    to_fields(&ArchiveFlag { archived }).context(|| "serializing archive flag".to_string())
}
