#![doc(test(attr(deny(warnings))))]

//! Tradebook Core keeps supplier and customer payments on trade orders in
//! step with the cash journal: it spreads journal entries across orders,
//! re-spreads them when they change, and removes them cleanly.

pub mod config;
pub mod core;
pub mod domain;
pub mod errors;
pub mod storage;
pub mod utils;

pub use crate::core::services::{ServiceError, ServiceResult};
pub use crate::core::PaymentEngine;

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        let build = utils::build_info::current();
        tracing::info!(version = build.version, git = build.git_hash, "Tradebook Core tracing initialized.");
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_does_not_panic() {
        super::init();
        super::init();
    }
}
