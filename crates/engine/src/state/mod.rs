//! 内存状态缓存与空间索引

pub mod cache;
pub mod spatial;

pub use cache::{AttachOutcome, StateCache};
pub use spatial::SpatialIndex;
