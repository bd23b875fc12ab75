//! 副本间同步：提交后发布变更，消费变更更新本地缓存

pub mod loader;
pub mod publisher;
pub mod state_listener;

pub use loader::StateLoader;
pub use publisher::EventPublisher;
pub use state_listener::StateListener;
