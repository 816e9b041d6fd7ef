//! Payments recorded against whole invoices, with archive bookkeeping for
//! the invoiced orders.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{Direction, EntrySource, Invoice, InvoicePayment, LedgerEntry, Order};
use crate::errors::StoreError;
use crate::storage::{DocumentStore, Repository};

use super::unit_of_work::archive_fields;
use super::{
    ensure_positive, CommitReport, PaidStatus, ServiceError, ServiceResult, StoreContext, UnitOfWork,
};

/// How a payment change moved the invoice's archive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveChange {
    Unchanged,
    Archived,
    Unarchived,
}

#[derive(Debug)]
pub struct InvoicePaymentOutcome {
    pub invoice: Invoice,
    pub payment_id: Uuid,
    pub ledger_entry_id: Option<Uuid>,
    pub archive: ArchiveChange,
    pub commit: CommitReport,
}

pub struct InvoicePaymentManager {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl InvoicePaymentManager {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    fn invoices(&self) -> Repository<Invoice> {
        Repository::new(Arc::clone(&self.store))
    }

    /// Records a payment on the invoice and a matching credit journal entry.
    ///
    /// Once the invoice counts as paid, it and all its orders are archived.
    pub async fn add_payment(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        date: NaiveDate,
        note: Option<String>,
    ) -> ServiceResult<InvoicePaymentOutcome> {
        ensure_positive(amount, "payment amount")?;
        let mut invoice = self.load(invoice_id).await?;
        let tolerance = self.config.tolerances.invoice;
        if amount > invoice.remaining() + tolerance {
            return Err(ServiceError::Invalid(format!(
                "payment of {amount} exceeds the {} still owed on invoice {invoice_id}",
                invoice.remaining()
            )));
        }

        let mut entry = LedgerEntry::new(Direction::Credit, amount, date, EntrySource::InvoicePayment);
        entry.note = note.clone();
        entry.partner = invoice.party.clone();

        let mut payment = InvoicePayment::new(amount, date, note);
        payment.ledger_entry_id = Some(entry.id);
        let payment_id = payment.id;
        invoice.partial_payments.push(payment);
        PaidStatus::refresh_invoice(&mut invoice, tolerance);

        let mut uow = UnitOfWork::new(entry.id);
        uow.stage_create(&entry)?;
        uow.stage_invoice_payments(&invoice)?;
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;

        let archive = if invoice_write_failed(&commit, invoice_id) {
            ArchiveChange::Unchanged
        } else {
            self.archive_if_paid(&mut invoice).await?
        };
        info!(%invoice_id, %amount, paid = invoice.paid, "recorded invoice payment");
        Ok(InvoicePaymentOutcome {
            invoice,
            payment_id,
            ledger_entry_id: Some(entry.id),
            archive,
            commit,
        })
    }

    /// Removes one invoice payment and its journal entry, unarchiving the
    /// invoice when it drops below paid.
    pub async fn remove_payment(&self, invoice_id: Uuid, payment_id: Uuid) -> ServiceResult<InvoicePaymentOutcome> {
        let mut invoice = self.load(invoice_id).await?;
        let payment = invoice.payment(payment_id).cloned().ok_or(ServiceError::NotFound {
            kind: "invoice payment",
            id: payment_id,
        })?;
        invoice
            .partial_payments
            .retain(|existing| existing.id != payment_id);
        PaidStatus::refresh_invoice(&mut invoice, self.config.tolerances.invoice);

        let mut uow = match payment.ledger_entry_id {
            Some(entry_id) => UnitOfWork::new(entry_id),
            None => UnitOfWork::detached(),
        };
        uow.stage_invoice_payments(&invoice)?;
        if let Some(entry_id) = payment.ledger_entry_id {
            let exists = Repository::<LedgerEntry>::new(Arc::clone(&self.store))
                .get(entry_id)
                .await
                .context(|| format!("loading ledger entry {entry_id}"))?
                .is_some();
            if exists {
                uow.stage_delete::<LedgerEntry>(entry_id);
            }
        }
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;

        let archive = if invoice_write_failed(&commit, invoice_id) {
            ArchiveChange::Unchanged
        } else {
            self.unarchive_if_unpaid(&mut invoice).await?
        };
        info!(%invoice_id, %payment_id, paid = invoice.paid, "removed invoice payment");
        Ok(InvoicePaymentOutcome {
            invoice,
            payment_id,
            ledger_entry_id: payment.ledger_entry_id,
            archive,
            commit,
        })
    }

    /// Archives the invoice and its orders once it counts as paid.
    ///
    /// Adding money never unarchives: an invoice archived by hand while
    /// still short stays archived.
    pub(crate) async fn archive_if_paid(&self, invoice: &mut Invoice) -> ServiceResult<ArchiveChange> {
        if invoice.paid && !invoice.archived {
            self.set_archived(invoice, true).await?;
            return Ok(ArchiveChange::Archived);
        }
        Ok(ArchiveChange::Unchanged)
    }

    /// Unarchives the invoice and its orders after it dropped below paid.
    pub(crate) async fn unarchive_if_unpaid(&self, invoice: &mut Invoice) -> ServiceResult<ArchiveChange> {
        if !invoice.paid && invoice.archived {
            self.set_archived(invoice, false).await?;
            return Ok(ArchiveChange::Unarchived);
        }
        Ok(ArchiveChange::Unchanged)
    }

    /// Flags each order, then the invoice, one write at a time.
    ///
    /// A failure stops the sequence; orders already flagged stay flagged and
    /// the invoice keeps its previous state.
    async fn set_archived(&self, invoice: &mut Invoice, archived: bool) -> ServiceResult<()> {
        let orders = Repository::<Order>::new(Arc::clone(&self.store));
        let total = invoice.order_ids.len();
        for (done, order_id) in invoice.order_ids.iter().enumerate() {
            match orders.update_fields(*order_id, archive_fields(archived)?).await {
                Ok(()) => {}
                Err(StoreError::NotFound { .. }) => {
                    warn!(invoice_id = %invoice.id, %order_id, "invoiced order no longer exists");
                }
                Err(source) => {
                    warn!(
                        invoice_id = %invoice.id,
                        %order_id,
                        done,
                        total,
                        error = %source,
                        "archive sequence stopped partway"
                    );
                    return Err(ServiceError::Store {
                        context: format!(
                            "setting archived={archived} on order {order_id} of invoice {} ({done} of {total} orders updated)",
                            invoice.id
                        ),
                        source,
                    });
                }
            }
        }
        self.invoices()
            .update_fields(invoice.id, archive_fields(archived)?)
            .await
            .context(|| format!("setting archived={archived} on invoice {}", invoice.id))?;
        invoice.archived = archived;
        Ok(())
    }

    async fn load(&self, invoice_id: Uuid) -> ServiceResult<Invoice> {
        self.invoices()
            .get(invoice_id)
            .await
            .context(|| format!("loading invoice {invoice_id}"))?
            .ok_or(ServiceError::NotFound {
                kind: "invoice",
                id: invoice_id,
            })
    }
}

/// True when a sequential commit dropped the invoice's own write; the stored
/// paid state is then stale and archive flags must not follow it.
pub(crate) fn invoice_write_failed(commit: &CommitReport, invoice_id: Uuid) -> bool {
    let failed = commit.failed_ids().contains(&invoice_id);
    if failed {
        warn!(%invoice_id, "invoice write failed; archive state left as stored");
    }
    failed
}
