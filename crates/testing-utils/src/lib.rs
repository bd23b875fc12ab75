//! # Coordinator Testing Utils
//!
//! 供各个crate测试使用的公共工具：
//!
//! - **Mock Repositories**: 仓储trait的内存实现
//! - **Recording Bus**: 记录所有发布消息的内存消息总线
//! - **Test Data Builders**: 派遣单、单元、设置的构建器
//! - **Manual Clock**: 可手动推进的时钟，用于过期与老化测试
//!
//! ```toml
//! [dev-dependencies]
//! coordinator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
