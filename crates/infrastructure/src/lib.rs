pub mod database;
pub mod message_bus;
pub mod observability;

pub use database::*;
pub use message_bus::*;
pub use observability::*;
