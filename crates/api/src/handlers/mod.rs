pub mod dispatches;
pub mod health;
pub mod metrics;
pub mod settings;
pub mod stream;
pub mod units;
