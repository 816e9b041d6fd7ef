use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

/// Identifies entities that expose a stable unique identifier.
pub trait Identifiable {
    fn id(&self) -> Uuid;
}

/// Records that carry a money amount.
pub trait Amounted {
    fn amount(&self) -> Decimal;
}

/// Sums the amounts of a slice of records.
pub fn total_of<T: Amounted>(items: &[T]) -> Decimal {
    items.iter().map(Amounted::amount).sum()
}

/// Rounds to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Difference clamped at zero.
pub fn outstanding(target: Decimal, settled: Decimal) -> Decimal {
    (target - settled).max(Decimal::ZERO)
}

// Re-export common dependencies so consumers can rely on this module as a façade.
pub use chrono;
pub use rust_decimal;
pub use uuid;
