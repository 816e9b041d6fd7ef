//! Persistence-friendly records shared by the payment services.

pub mod common;
pub mod invoice;
pub mod ledger_entry;
pub mod order;
pub mod party_payment;

pub use common::{round_money, total_of, Amounted, Identifiable};
pub use invoice::{Invoice, InvoicePayment};
pub use ledger_entry::{AllocationTarget, Direction, EntrySource, LedgerEntry};
pub use order::{Adjustment, Order, PaymentRecord, PaymentSide};
pub use party_payment::PartyPayment;
