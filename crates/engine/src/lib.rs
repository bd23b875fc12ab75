//! # Coordinator Engine
//!
//! 多副本派遣协同引擎：
//!
//! - **state**: 每个组织的派遣单、单元、设置缓存与空间索引
//! - **sync**: 同步总线的发布、订阅与从存储重新加载
//! - **assignment**: 分配生命周期（提议、接受、拒绝、过期）与状态机
//! - **housekeeping**: 周期性的过期、归档、清理与重新同步
//! - **bot**: AutoRoundRobin 模式下的自动派遣
//! - **broker / stream**: 面向客户端的实时推送
//! - **service**: 对外的 RPC 方法

pub mod assignment;
pub mod bot;
pub mod broker;
pub mod container;
pub mod housekeeping;
pub mod locks;
pub mod service;
pub mod state;
pub mod strategies;
pub mod stream;
pub mod sync;

pub use assignment::{AssignmentEngine, TakeDispatchResponse};
pub use bot::{BotManager, BotTiming, DispatchBot};
pub use broker::{Broker, BrokerRegistry, BrokerSubscription};
pub use container::{EngineContainer, EngineDeps};
pub use housekeeping::{run_periodic, Housekeeper};
pub use service::*;
pub use state::{AttachOutcome, SpatialIndex, StateCache};
pub use strategies::{RoundRobinStrategy, UnitSelectionStrategy};
pub use stream::{EventStream, Snapshot, StreamHub, StreamMessage};
pub use sync::{EventPublisher, StateListener, StateLoader};
