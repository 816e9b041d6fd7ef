pub mod payment_engine;
pub mod services;
pub mod utils;

pub use payment_engine::PaymentEngine;
