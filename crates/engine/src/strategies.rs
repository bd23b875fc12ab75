use async_trait::async_trait;
use coordinator_domain::entities::{Dispatch, Unit};
use coordinator_errors::CoordinatorResult;
use tracing::debug;

/// 自动派遣时从候选单元中挑选一个
#[async_trait]
pub trait UnitSelectionStrategy: Send + Sync {
    async fn select_unit(
        &self,
        dispatch: &Dispatch,
        candidates: &[Unit],
    ) -> CoordinatorResult<Option<u64>>;

    fn name(&self) -> &str;
}

/// 按单元 id 顺序选择第一个候选，配合冷却时间实现轮转
#[derive(Debug, Default)]
pub struct RoundRobinStrategy;

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitSelectionStrategy for RoundRobinStrategy {
    async fn select_unit(
        &self,
        dispatch: &Dispatch,
        candidates: &[Unit],
    ) -> CoordinatorResult<Option<u64>> {
        let selected = candidates.iter().map(|u| u.id).min();
        debug!(dispatch_id = dispatch.id, selected = ?selected, candidates = candidates.len(), "轮询策略选择单元");
        Ok(selected)
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}
