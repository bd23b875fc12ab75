//! 后台维护循环：过期提议、归档、清理、空单元撤下和定期重新同步

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coordinator_config::EngineConfig;
use coordinator_domain::clock::Clock;
use coordinator_domain::entities::{Dispatch, DispatchStatus};
use coordinator_domain::repositories::DispatchRepository;
use coordinator_domain::status::DispatchStatusKind;
use coordinator_errors::CoordinatorResult;
use coordinator_infrastructure::MetricsCollector;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::assignment::AssignmentEngine;
use crate::state::StateCache;
use crate::sync::StateLoader;

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// 按固定周期执行一个清理任务，直到收到关闭信号
///
/// 单次执行失败只记录日志，不会终止循环。
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    metrics: Arc<MetricsCollector>,
    mut task: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = CoordinatorResult<usize>> + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(task = name, period_ms = period.as_millis() as u64, "后台任务已启动");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(task = name, "收到停止信号，后台任务退出");
                break;
            }
            _ = ticker.tick() => {
                let started = Instant::now();
                match task().await {
                    Ok(affected) => {
                        metrics.record_housekeeping_sweep(name, affected, started.elapsed().as_secs_f64());
                        if affected > 0 {
                            debug!(task = name, affected, "后台任务完成");
                        }
                    }
                    Err(e) => error!(task = name, error = %e, "后台任务执行失败"),
                }
            }
        }
    }
}

pub struct Housekeeper {
    engine: Arc<AssignmentEngine>,
    dispatches: Arc<dyn DispatchRepository>,
    cache: Arc<StateCache>,
    loader: Arc<StateLoader>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    config: EngineConfig,
}

impl Housekeeper {
    pub fn new(
        engine: Arc<AssignmentEngine>,
        dispatches: Arc<dyn DispatchRepository>,
        cache: Arc<StateCache>,
        loader: Arc<StateLoader>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            dispatches,
            cache,
            loader,
            clock,
            metrics,
            config,
        }
    }

    /// 撤下所有已过期的提议，返回撤下的分配数
    pub async fn expire_assignments(&self) -> CoordinatorResult<usize> {
        let now = self.clock.now();
        let expired = self.dispatches.list_expired_assignments(now).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut grouped: BTreeMap<(String, u64), Vec<u64>> = BTreeMap::new();
        for assignment in &expired {
            grouped
                .entry((assignment.job.clone(), assignment.dispatch_id))
                .or_default()
                .push(assignment.unit_id);
        }

        let mut expired_count = 0;
        for ((job, dispatch_id), unit_ids) in grouped {
            let result = match self
                .engine
                .assign_units(&job, dispatch_id, &[], &unit_ids, None, None)
                .await
            {
                Err(e) if e.is_not_found() => {
                    // 已归档的派遣单不在缓存中，直接删除分配行
                    self.engine
                        .purge_assignments(&job, dispatch_id, &unit_ids)
                        .await
                }
                other => other.map(|_| ()),
            };
            match result {
                Ok(()) => {
                    expired_count += unit_ids.len();
                    info!(job = %job, dispatch_id, units = ?unit_ids, "过期的派遣提议已撤下");
                }
                Err(e) => {
                    error!(job = %job, dispatch_id, error = %e, "撤下过期提议失败");
                }
            }
        }
        Ok(expired_count)
    }

    /// 最新状态早于阈值的派遣单被彻底删除，不区分状态
    pub async fn cleanup_dispatches(&self) -> CoordinatorResult<usize> {
        let older_than = self.clock.now() - to_chrono(self.config.cleanup_after());
        let stale = self.dispatches.list_by_latest_status(&[], older_than).await?;

        let mut deleted = 0;
        for dispatch in stale {
            match self.engine.delete_dispatch(&dispatch.job, dispatch.id).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(job = %dispatch.job, dispatch_id = dispatch.id, error = %e, "删除过期派遣单失败");
                }
            }
        }
        if deleted > 0 {
            info!(deleted, "过期派遣单已删除");
        }
        Ok(deleted)
    }

    /// 已完成或已取消一段时间的派遣单转为 Archived 并移出缓存
    pub async fn archive_dispatches(&self) -> CoordinatorResult<usize> {
        let now = self.clock.now();
        let older_than = now - to_chrono(self.config.archive_after());
        let finished = self
            .dispatches
            .list_by_latest_status(
                &[DispatchStatusKind::Completed, DispatchStatusKind::Cancelled],
                older_than,
            )
            .await?;

        let mut archived = 0;
        for dispatch in finished {
            let status = DispatchStatus::new(dispatch.id, DispatchStatusKind::Archived, now);
            match self.engine.update_dispatch_status(&dispatch.job, status).await {
                Ok(_) => archived += 1,
                Err(e) if e.is_not_found() => {
                    warn!(dispatch_id = dispatch.id, "待归档的派遣单已不存在");
                }
                Err(e) => {
                    error!(job = %dispatch.job, dispatch_id = dispatch.id, error = %e, "归档派遣单失败");
                }
            }
        }
        if archived > 0 {
            info!(archived, "派遣单已归档");
        }
        Ok(archived)
    }

    /// 清理在归档之前执行，避免同一轮中刚归档的派遣单被立刻删除
    pub async fn archival_sweep(&self) -> CoordinatorResult<usize> {
        let deleted = self.cleanup_dispatches().await?;
        let archived = self.archive_dispatches().await?;
        Ok(deleted + archived)
    }

    /// 缓存未命中时从存储重新加载，存储确认不存在或没有成员才算空单元
    async fn unit_is_empty(&self, job: &str, unit_id: u64) -> CoordinatorResult<bool> {
        if let Some(unit) = self.cache.get_unit(job, unit_id) {
            return Ok(unit.is_empty());
        }
        let reloaded = self.loader.reload_unit(job, unit_id).await?;
        Ok(reloaded.map_or(true, |unit| unit.is_empty()))
    }

    async fn empty_units_of(&self, job: &str, dispatch: &Dispatch) -> CoordinatorResult<Vec<u64>> {
        let mut stale = Vec::new();
        for assignment in &dispatch.units {
            if self.unit_is_empty(job, assignment.unit_id).await? {
                stale.push(assignment.unit_id);
            }
        }
        Ok(stale)
    }

    /// 已不存在或没有成员的单元不应该留在派遣单上
    ///
    /// 单个派遣单失败只记录日志，其余派遣单照常处理。
    pub async fn prune_empty_units(&self) -> CoordinatorResult<usize> {
        let mut pruned = 0;
        for job in self.cache.jobs() {
            for dispatch in self.cache.list_dispatches(&job) {
                let stale = match self.empty_units_of(&job, &dispatch).await {
                    Ok(stale) => stale,
                    Err(e) => {
                        error!(job = %job, dispatch_id = dispatch.id, error = %e, "检查派遣单上的单元失败");
                        continue;
                    }
                };
                if stale.is_empty() {
                    continue;
                }

                match self
                    .engine
                    .assign_units(&job, dispatch.id, &[], &stale, None, None)
                    .await
                {
                    Ok(_) => {
                        pruned += stale.len();
                        info!(job = %job, dispatch_id = dispatch.id, units = ?stale, "空单元已从派遣单撤下");
                    }
                    Err(e) if e.is_not_found() => {
                        // 存储中已没有这张派遣单，说明错过了删除事件
                        warn!(job = %job, dispatch_id = dispatch.id, "派遣单已不在存储中，移出缓存");
                        self.cache.remove_dispatch(&job, dispatch.id);
                    }
                    Err(e) => {
                        error!(job = %job, dispatch_id = dispatch.id, error = %e, "撤下空单元失败");
                    }
                }
            }
        }
        Ok(pruned)
    }

    pub async fn resync(&self) -> CoordinatorResult<usize> {
        self.loader.load_all().await
    }

    /// 启动全部维护循环
    pub fn spawn(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(4);

        let this = Arc::clone(self);
        handles.push(tokio::spawn(run_periodic(
            "assignment_expiry",
            self.config.expiration_interval(),
            shutdown.subscribe(),
            self.metrics.clone(),
            move || {
                let this = this.clone();
                async move { this.expire_assignments().await }
            },
        )));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(run_periodic(
            "dispatch_archival",
            self.config.archival_interval(),
            shutdown.subscribe(),
            self.metrics.clone(),
            move || {
                let this = this.clone();
                async move { this.archival_sweep().await }
            },
        )));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(run_periodic(
            "unit_prune",
            self.config.unit_prune_interval(),
            shutdown.subscribe(),
            self.metrics.clone(),
            move || {
                let this = this.clone();
                async move { this.prune_empty_units().await }
            },
        )));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(run_periodic(
            "state_resync",
            self.config.resync_interval(),
            shutdown.subscribe(),
            self.metrics.clone(),
            move || {
                let this = this.clone();
                async move { this.resync().await }
            },
        )));

        handles
    }
}
