//! Tolerance-bounded "fully paid" predicates.

use rust_decimal::Decimal;

use crate::config::Tolerances;
use crate::domain::{Invoice, Order, PaymentSide};

/// Pure predicates deciding whether orders and invoices count as paid.
///
/// Nothing here is cached: callers re-evaluate after every change to a
/// payment list and store the result in the record's flags.
pub struct PaidStatus;

impl PaidStatus {
    /// Supplier side: `sum(partial_payments) >= original_total - tolerance`.
    pub fn is_expense_paid(order: &Order, tolerance: Decimal) -> bool {
        order.paid_total(PaymentSide::Supplier) >= order.original_total - tolerance
    }

    /// Customer side: `sum(customer_payments) >= total - tolerance`.
    pub fn is_customer_paid(order: &Order, tolerance: Decimal) -> bool {
        order.paid_total(PaymentSide::Customer) >= order.total - tolerance
    }

    pub fn is_settled(order: &Order, side: PaymentSide, tolerances: &Tolerances) -> bool {
        match side {
            PaymentSide::Supplier => Self::is_expense_paid(order, tolerances.expense),
            PaymentSide::Customer => Self::is_customer_paid(order, tolerances.customer),
        }
    }

    pub fn is_invoice_paid(invoice: &Invoice, tolerance: Decimal) -> bool {
        invoice.paid_amount >= invoice.total_amount - tolerance
    }

    /// Rewrites the flag owned by `side` after its payment list changed:
    /// `paid` for the supplier side, `payment_due` for the customer side.
    /// The other side's flag is left exactly as stored.
    pub fn refresh_side(order: &mut Order, side: PaymentSide, tolerances: &Tolerances) {
        match side {
            PaymentSide::Supplier => order.paid = Self::is_expense_paid(order, tolerances.expense),
            PaymentSide::Customer => {
                order.payment_due = !Self::is_customer_paid(order, tolerances.customer)
            }
        }
    }

    pub fn refresh_invoice(invoice: &mut Invoice, tolerance: Decimal) {
        invoice.recompute_paid_amount();
        invoice.paid = Self::is_invoice_paid(invoice, tolerance);
    }
}
