mod mapping;
pub mod schema;
pub mod sqlite_dispatch_repository;
pub mod sqlite_settings_repository;
pub mod sqlite_unit_repository;

pub use sqlite_dispatch_repository::SqliteDispatchRepository;
pub use sqlite_settings_repository::SqliteSettingsRepository;
pub use sqlite_unit_repository::SqliteUnitRepository;
