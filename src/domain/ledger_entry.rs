use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::common::{Amounted, Identifiable};
use crate::domain::order::PaymentSide;

/// Whether money came in (credit) or went out (debit).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

/// Records which action created a journal entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    #[default]
    Manual,
    PartyPayment,
    SupplierPayment,
    InvoicePayment,
    OrderExpense,
    OrderRevenue,
}

/// A single cash-journal record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub direction: Direction,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub source: EntrySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
    #[serde(default)]
    pub voided: bool,
    /// Part of the amount that already sits in order histories as manual
    /// payments, so redistribution never spreads it again.
    #[serde(default, skip_serializing_if = "Decimal::is_zero")]
    pub historic_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// The counterparty whose orders absorb an entry's amount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllocationTarget {
    Supplier(String),
    Party(String),
}

impl AllocationTarget {
    pub fn key(&self) -> String {
        match self {
            AllocationTarget::Supplier(name) => format!("supplier:{name}"),
            AllocationTarget::Party(name) => format!("party:{name}"),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AllocationTarget::Supplier(name) | AllocationTarget::Party(name) => name,
        }
    }

    /// Supplier entries pay `partial_payments`; party entries settle `customer_payments`.
    pub fn side(&self) -> PaymentSide {
        match self {
            AllocationTarget::Supplier(_) => PaymentSide::Supplier,
            AllocationTarget::Party(_) => PaymentSide::Customer,
        }
    }
}

impl LedgerEntry {
    pub fn new(direction: Direction, amount: Decimal, date: NaiveDate, source: EntrySource) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            amount,
            date,
            note: None,
            source,
            supplier: None,
            party: None,
            partner: None,
            voided: false,
            historic_amount: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    /// Money paid out to a supplier.
    pub fn supplier_payment(supplier: impl Into<String>, amount: Decimal, date: NaiveDate) -> Self {
        Self::new(Direction::Debit, amount, date, EntrySource::SupplierPayment).with_supplier(supplier)
    }

    /// Money received from a party.
    pub fn party_payment(party: impl Into<String>, amount: Decimal, date: NaiveDate) -> Self {
        Self::new(Direction::Credit, amount, date, EntrySource::PartyPayment).with_party(party)
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

    /// Resolves which orders this entry is spread across, if any.
    ///
    /// Debits tagged with a supplier pay supplier orders, credits tagged with a
    /// party settle customer orders. Voided entries never allocate.
    pub fn allocation_target(&self) -> Option<AllocationTarget> {
        if self.voided {
            return None;
        }
        match (self.direction, &self.supplier, &self.party) {
            (Direction::Debit, Some(supplier), _) => Some(AllocationTarget::Supplier(supplier.clone())),
            (Direction::Credit, _, Some(party)) => Some(AllocationTarget::Party(party.clone())),
            _ => None,
        }
    }
}

impl Identifiable for LedgerEntry {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Amounted for LedgerEntry {
    fn amount(&self) -> Decimal {
        self.amount
    }
}
