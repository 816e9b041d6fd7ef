use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::common::{outstanding, total_of, Amounted, Identifiable};

/// A payment recorded against a whole invoice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoicePayment {
    pub id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry_id: Option<Uuid>,
}

impl InvoicePayment {
    pub fn new(amount: Decimal, date: NaiveDate, note: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            date,
            created_at: Utc::now(),
            note,
            ledger_entry_id: None,
        }
    }
}

impl Amounted for InvoicePayment {
    fn amount(&self) -> Decimal {
        self.amount
    }
}

/// Bills a customer for a group of orders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    pub order_ids: Vec<Uuid>,
    pub total_amount: Decimal,
    #[serde(default)]
    pub paid_amount: Decimal,
    #[serde(default)]
    pub partial_payments: Vec<InvoicePayment>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(order_ids: Vec<Uuid>, total_amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            party: None,
            order_ids,
            total_amount,
            paid_amount: Decimal::ZERO,
            partial_payments: Vec::new(),
            paid: false,
            archived: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_party(mut self, party: impl Into<String>) -> Self {
        self.party = Some(party.into());
        self
    }

    pub fn recompute_paid_amount(&mut self) {
        self.paid_amount = total_of(&self.partial_payments);
    }

    pub fn remaining(&self) -> Decimal {
        outstanding(self.total_amount, self.paid_amount)
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<&InvoicePayment> {
        self.partial_payments
            .iter()
            .find(|payment| payment.id == payment_id)
    }

    /// Removes payments traced to `ledger_entry_id`, returning how many went.
    pub fn remove_linked(&mut self, ledger_entry_id: Uuid) -> usize {
        let before = self.partial_payments.len();
        self.partial_payments
            .retain(|payment| payment.ledger_entry_id != Some(ledger_entry_id));
        let removed = before - self.partial_payments.len();
        if removed > 0 {
            self.recompute_paid_amount();
        }
        removed
    }

    pub fn references(&self, ledger_entry_id: Uuid) -> bool {
        self.partial_payments
            .iter()
            .any(|payment| payment.ledger_entry_id == Some(ledger_entry_id))
    }
}

impl Identifiable for Invoice {
    fn id(&self) -> Uuid {
        self.id
    }
}
