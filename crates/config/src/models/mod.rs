pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod engine;
pub mod message_bus;

pub use api_observability::*;
pub use app_config::*;
pub use database::*;
pub use engine::*;
pub use message_bus::*;
