use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::common::{Amounted, Identifiable};

/// Party-level receipt mirroring a credit journal entry, kept for history views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartyPayment {
    pub id: Uuid,
    pub party: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    /// `None` only on legacy records that predate journal linking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PartyPayment {
    pub fn new(party: impl Into<String>, amount: Decimal, date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            party: party.into(),
            amount,
            date,
            ledger_entry_id: None,
            note: None,
        }
    }

    pub fn linked_to(mut self, ledger_entry_id: Uuid) -> Self {
        self.ledger_entry_id = Some(ledger_entry_id);
        self
    }
}

impl Identifiable for PartyPayment {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Amounted for PartyPayment {
    fn amount(&self) -> Decimal {
        self.amount
    }
}
