use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::common::{outstanding, total_of, Amounted, Identifiable};

/// One payment applied to an order, supplier- or customer-side.
///
/// Records without a `ledger_entry_id` are manual payments and are never
/// touched by redistribution or cascade removal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry_id: Option<Uuid>,
}

impl PaymentRecord {
    pub fn manual(amount: Decimal, date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            date,
            created_at: Utc::now(),
            note: None,
            ledger_entry_id: None,
        }
    }

    pub fn linked(amount: Decimal, date: NaiveDate, ledger_entry_id: Uuid) -> Self {
        Self {
            ledger_entry_id: Some(ledger_entry_id),
            ..Self::manual(amount, date)
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn is_manual(&self) -> bool {
        self.ledger_entry_id.is_none()
    }

    pub fn is_linked_to(&self, ledger_entry_id: Uuid) -> bool {
        self.ledger_entry_id == Some(ledger_entry_id)
    }
}

impl Amounted for PaymentRecord {
    fn amount(&self) -> Decimal {
        self.amount
    }
}

/// Which payment history of an order a record belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSide {
    /// Money we paid the supplier (`partial_payments`).
    Supplier,
    /// Money the customer paid us (`customer_payments`).
    Customer,
}

/// Overflow from one ledger entry parked on an order so the books balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Adjustment {
    pub ledger_entry_id: Uuid,
    pub side: PaymentSide,
    pub amount: Decimal,
}

impl Amounted for Adjustment {
    fn amount(&self) -> Decimal {
        self.amount
    }
}

/// A purchase from a supplier resold to a customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    pub date: NaiveDate,
    /// Amount owed to the supplier.
    pub original_total: Decimal,
    /// Amount owed by the customer.
    pub total: Decimal,
    #[serde(default)]
    pub partial_payments: Vec<PaymentRecord>,
    #[serde(default)]
    pub customer_payments: Vec<PaymentRecord>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub payment_due: bool,
    #[serde(default)]
    pub expense_adjustment: Decimal,
    #[serde(default)]
    pub revenue_adjustment: Decimal,
    #[serde(default)]
    pub adjustments: Vec<Adjustment>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(date: NaiveDate, original_total: Decimal, total: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            supplier: None,
            party: None,
            date,
            original_total,
            total,
            partial_payments: Vec::new(),
            customer_payments: Vec::new(),
            paid: false,
            payment_due: true,
            expense_adjustment: Decimal::ZERO,
            revenue_adjustment: Decimal::ZERO,
            adjustments: Vec::new(),
            archived: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_supplier(mut self, supplier: impl Into<String>) -> Self {
        self.supplier = Some(supplier.into());
        self
    }

    pub fn with_party(mut self, party: impl Into<String>) -> Self {
        self.party = Some(party.into());
        self
    }

    pub fn payments(&self, side: PaymentSide) -> &[PaymentRecord] {
        match side {
            PaymentSide::Supplier => &self.partial_payments,
            PaymentSide::Customer => &self.customer_payments,
        }
    }

    pub fn payments_mut(&mut self, side: PaymentSide) -> &mut Vec<PaymentRecord> {
        match side {
            PaymentSide::Supplier => &mut self.partial_payments,
            PaymentSide::Customer => &mut self.customer_payments,
        }
    }

    /// What the order is worth on the given side.
    pub fn target(&self, side: PaymentSide) -> Decimal {
        match side {
            PaymentSide::Supplier => self.original_total,
            PaymentSide::Customer => self.total,
        }
    }

    pub fn paid_total(&self, side: PaymentSide) -> Decimal {
        total_of(self.payments(side))
    }

    pub fn remaining(&self, side: PaymentSide) -> Decimal {
        outstanding(self.target(side), self.paid_total(side))
    }

    pub fn has_payment_from(&self, side: PaymentSide, ledger_entry_id: Uuid) -> bool {
        self.payments(side)
            .iter()
            .any(|record| record.is_linked_to(ledger_entry_id))
    }

    /// Everything this order holds on behalf of a ledger entry: linked
    /// payments plus any overflow adjustment.
    pub fn linked_amount(&self, side: PaymentSide, ledger_entry_id: Uuid) -> Decimal {
        let payments: Decimal = self
            .payments(side)
            .iter()
            .filter(|record| record.is_linked_to(ledger_entry_id))
            .map(|record| record.amount)
            .sum();
        let adjustments: Decimal = self
            .adjustments
            .iter()
            .filter(|adj| adj.side == side && adj.ledger_entry_id == ledger_entry_id)
            .map(|adj| adj.amount)
            .sum();
        payments + adjustments
    }

    pub fn add_adjustment(&mut self, ledger_entry_id: Uuid, side: PaymentSide, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        match self
            .adjustments
            .iter_mut()
            .find(|adj| adj.ledger_entry_id == ledger_entry_id && adj.side == side)
        {
            Some(existing) => existing.amount += amount,
            None => self.adjustments.push(Adjustment {
                ledger_entry_id,
                side,
                amount,
            }),
        }
        self.recompute_adjustments();
    }

    /// Rebuilds `expense_adjustment`/`revenue_adjustment` from the adjustment list.
    pub fn recompute_adjustments(&mut self) {
        let (mut expense, mut revenue) = (Decimal::ZERO, Decimal::ZERO);
        for adj in &self.adjustments {
            match adj.side {
                PaymentSide::Supplier => expense += adj.amount,
                PaymentSide::Customer => revenue += adj.amount,
            }
        }
        self.expense_adjustment = expense;
        self.revenue_adjustment = revenue;
    }

    /// Drops every payment and adjustment traced to `ledger_entry_id`,
    /// returning how many records were removed. Manual payments stay.
    pub fn remove_linked(&mut self, ledger_entry_id: Uuid) -> usize {
        let before = self.partial_payments.len() + self.customer_payments.len() + self.adjustments.len();
        self.partial_payments
            .retain(|record| !record.is_linked_to(ledger_entry_id));
        self.customer_payments
            .retain(|record| !record.is_linked_to(ledger_entry_id));
        self.adjustments
            .retain(|adj| adj.ledger_entry_id != ledger_entry_id);
        self.recompute_adjustments();
        before - (self.partial_payments.len() + self.customer_payments.len() + self.adjustments.len())
    }

    pub fn references(&self, ledger_entry_id: Uuid) -> bool {
        self.has_payment_from(PaymentSide::Supplier, ledger_entry_id)
            || self.has_payment_from(PaymentSide::Customer, ledger_entry_id)
            || self
                .adjustments
                .iter()
                .any(|adj| adj.ledger_entry_id == ledger_entry_id)
    }
}

impl Identifiable for Order {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), dec!(1000), dec!(1400))
    }

    #[test]
    fn remaining_tracks_each_side_independently() {
        let mut order = order();
        let date = order.date;
        order.partial_payments.push(PaymentRecord::manual(dec!(250), date));
        order.customer_payments.push(PaymentRecord::manual(dec!(400), date));

        assert_eq!(order.remaining(PaymentSide::Supplier), dec!(750));
        assert_eq!(order.remaining(PaymentSide::Customer), dec!(1000));
    }

    #[test]
    fn remove_linked_keeps_manual_payments() {
        let mut order = order();
        let date = order.date;
        let entry = Uuid::new_v4();
        order.partial_payments.push(PaymentRecord::manual(dec!(100), date));
        order.partial_payments.push(PaymentRecord::linked(dec!(300), date, entry));
        order.add_adjustment(entry, PaymentSide::Supplier, dec!(20));

        let removed = order.remove_linked(entry);

        assert_eq!(removed, 2);
        assert_eq!(order.partial_payments.len(), 1);
        assert!(order.partial_payments[0].is_manual());
        assert_eq!(order.expense_adjustment, Decimal::ZERO);
    }

    #[test]
    fn adjustments_merge_per_entry_and_side() {
        let mut order = order();
        let entry = Uuid::new_v4();
        order.add_adjustment(entry, PaymentSide::Customer, dec!(10));
        order.add_adjustment(entry, PaymentSide::Customer, dec!(5));

        assert_eq!(order.adjustments.len(), 1);
        assert_eq!(order.revenue_adjustment, dec!(15));
        assert_eq!(order.linked_amount(PaymentSide::Customer, entry), dec!(15));
    }
}
