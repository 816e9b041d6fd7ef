//! One-off repair of party payments recorded before journal linking existed.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{LedgerEntry, PartyPayment};
use crate::storage::{to_fields, DocumentStore, Repository};

use super::{CommitReport, ServiceResult, StoreContext, UnitOfWork};

#[derive(Serialize)]
struct LinkPatch {
    ledger_entry_id: Uuid,
}

/// A party payment that received a journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedLink {
    pub party_payment_id: Uuid,
    pub ledger_entry_id: Uuid,
}

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub scanned: usize,
    pub repaired: Vec<RepairedLink>,
    pub commit: CommitReport,
}

pub struct BackfillService {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl BackfillService {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Gives every unlinked or dangling party payment its credit entry.
    ///
    /// A dangling link is repaired under the id it already points at, so
    /// order payments carrying that id stay traceable. Allocation is not
    /// re-run; the money is already in the order histories, and the entry
    /// records it as historic so later edits only spread what they add.
    /// Running this a second time repairs nothing.
    pub async fn backfill_party_payment_links(&self) -> ServiceResult<BackfillReport> {
        let payments = Repository::<PartyPayment>::new(Arc::clone(&self.store))
            .all()
            .await
            .context(|| "loading party payments".to_string())?;
        let entries = Repository::<LedgerEntry>::new(Arc::clone(&self.store));

        let mut report = BackfillReport {
            scanned: payments.len(),
            ..BackfillReport::default()
        };
        let mut uow = UnitOfWork::detached();
        for payment in payments {
            let existing = match payment.ledger_entry_id {
                Some(entry_id) => entries
                    .get(entry_id)
                    .await
                    .context(|| format!("loading ledger entry {entry_id}"))?,
                None => None,
            };
            if existing.is_some() {
                continue;
            }

            let mut entry = LedgerEntry::party_payment(payment.party.as_str(), payment.amount, payment.date);
            entry.note = payment.note.clone();
            entry.historic_amount = payment.amount;
            match payment.ledger_entry_id {
                Some(dangling) => entry.id = dangling,
                None => {
                    let fields = to_fields(&LinkPatch {
                        ledger_entry_id: entry.id,
                    })
                    .context(|| format!("serializing link for party payment {}", payment.id))?;
                    uow.stage_update::<PartyPayment>(payment.id, fields);
                }
            }
            uow.stage_create(&entry)?;
            report.repaired.push(RepairedLink {
                party_payment_id: payment.id,
                ledger_entry_id: entry.id,
            });
        }

        report.commit = uow.commit(self.store.as_ref(), self.config.write_mode).await?;
        info!(
            scanned = report.scanned,
            repaired = report.repaired.len(),
            "backfilled party payment links"
        );
        Ok(report)
    }
}
