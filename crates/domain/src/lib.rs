pub mod clock;
pub mod entities;
pub mod events;
pub mod messaging;
pub mod repositories;
pub mod status;

pub use clock::*;
pub use coordinator_errors::{CoordinatorError, CoordinatorResult};
pub use entities::*;
pub use events::*;
pub use messaging::*;
pub use repositories::*;
pub use status::*;
