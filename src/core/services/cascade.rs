//! Removal of everything a ledger entry allocated.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{Invoice, Order, PartyPayment, PaymentSide};
use crate::storage::{DocumentStore, Filter, Repository};

use super::invoice_payments::invoice_write_failed;
use super::{
    ArchiveChange, CommitReport, InvoicePaymentManager, PaidStatus, ServiceResult, StoreContext,
    UnitOfWork,
};

/// What a cascade removal changed.
#[derive(Debug, Default)]
pub struct CascadeReport {
    pub ledger_entry_id: Uuid,
    pub orders: Vec<Uuid>,
    pub invoices: Vec<Uuid>,
    pub party_payments: Vec<Uuid>,
    /// Payment records and adjustments dropped across all orders and invoices.
    pub records_removed: usize,
    pub unarchived_invoices: Vec<Uuid>,
    pub commit: CommitReport,
}

impl CascadeReport {
    pub fn is_noop(&self) -> bool {
        self.records_removed == 0 && self.party_payments.is_empty()
    }
}

/// Staged removal awaiting commit.
#[derive(Debug, Default)]
pub(crate) struct StagedCascade {
    pub orders: Vec<Uuid>,
    pub invoices: Vec<Invoice>,
    pub party_payments: Vec<Uuid>,
    pub records_removed: usize,
}

pub struct CascadeService {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl CascadeService {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Strips every payment, adjustment, and party payment linked to
    /// `ledger_entry_id`, then recomputes paid flags.
    ///
    /// Manual payments are never touched. Calling this for an entry that
    /// allocated nothing, or twice in a row, changes nothing.
    pub async fn cascade_remove(&self, ledger_entry_id: Uuid) -> ServiceResult<CascadeReport> {
        let mut uow = UnitOfWork::new(ledger_entry_id);
        let staged = self.stage(ledger_entry_id, &mut uow).await?;
        let commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        self.finish(ledger_entry_id, staged, commit).await
    }

    pub(crate) async fn stage(&self, ledger_entry_id: Uuid, uow: &mut UnitOfWork) -> ServiceResult<StagedCascade> {
        let mut staged = StagedCascade::default();
        let tolerances = &self.config.tolerances;

        let orders = Repository::<Order>::new(Arc::clone(&self.store))
            .all()
            .await
            .context(|| format!("scanning orders for ledger entry {ledger_entry_id}"))?;
        for mut order in orders.into_iter().filter(|order| order.references(ledger_entry_id)) {
            let touched: Vec<PaymentSide> = [PaymentSide::Supplier, PaymentSide::Customer]
                .into_iter()
                .filter(|side| order.has_payment_from(*side, ledger_entry_id))
                .collect();
            staged.records_removed += order.remove_linked(ledger_entry_id);
            for side in touched {
                PaidStatus::refresh_side(&mut order, side, tolerances);
            }
            uow.stage_order_payments(&order)?;
            staged.orders.push(order.id);
        }

        let invoices = Repository::<Invoice>::new(Arc::clone(&self.store))
            .all()
            .await
            .context(|| format!("scanning invoices for ledger entry {ledger_entry_id}"))?;
        for mut invoice in invoices
            .into_iter()
            .filter(|invoice| invoice.references(ledger_entry_id))
        {
            staged.records_removed += invoice.remove_linked(ledger_entry_id);
            PaidStatus::refresh_invoice(&mut invoice, tolerances.invoice);
            uow.stage_invoice_payments(&invoice)?;
            staged.invoices.push(invoice);
        }

        let party_payments = Repository::<PartyPayment>::new(Arc::clone(&self.store))
            .find(&[Filter::eq("ledger_entry_id", ledger_entry_id.to_string())])
            .await
            .context(|| format!("loading party payments for ledger entry {ledger_entry_id}"))?;
        for payment in party_payments {
            uow.stage_delete::<PartyPayment>(payment.id);
            staged.party_payments.push(payment.id);
        }

        Ok(staged)
    }

    /// Runs the per-order unarchive step for invoices that dropped below paid.
    pub(crate) async fn finish(
        &self,
        ledger_entry_id: Uuid,
        staged: StagedCascade,
        commit: CommitReport,
    ) -> ServiceResult<CascadeReport> {
        let manager = InvoicePaymentManager::new(Arc::clone(&self.store), self.config.clone());
        let mut unarchived = Vec::new();
        let mut invoice_ids = Vec::with_capacity(staged.invoices.len());
        for mut invoice in staged.invoices {
            invoice_ids.push(invoice.id);
            if invoice_write_failed(&commit, invoice.id) {
                continue;
            }
            if manager.unarchive_if_unpaid(&mut invoice).await? == ArchiveChange::Unarchived {
                unarchived.push(invoice.id);
            }
        }

        let report = CascadeReport {
            ledger_entry_id,
            orders: staged.orders,
            invoices: invoice_ids,
            party_payments: staged.party_payments,
            records_removed: staged.records_removed,
            unarchived_invoices: unarchived,
            commit,
        };
        if report.is_noop() {
            debug!(%ledger_entry_id, "nothing referenced the ledger entry");
        } else {
            info!(
                %ledger_entry_id,
                orders = report.orders.len(),
                invoices = report.invoices.len(),
                party_payments = report.party_payments.len(),
                records = report.records_removed,
                "removed ledger entry allocations"
            );
        }
        Ok(report)
    }
}
