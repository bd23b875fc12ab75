//! 自动派遣机器人
//!
//! 组织启用设置且生效模式为 AutoRoundRobin 时，每个组织运行一个机器人，
//! 周期性地把等待分配的派遣单以提议形式派给空闲单元。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use coordinator_domain::clock::Clock;
use coordinator_domain::entities::{Unit, ATTRIBUTE_AUTO_ASSIGNED};
use coordinator_domain::status::{OperatingMode, UnitStatusKind};
use coordinator_errors::CoordinatorResult;
use coordinator_infrastructure::MetricsCollector;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::assignment::AssignmentEngine;
use crate::state::StateCache;
use crate::strategies::UnitSelectionStrategy;

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// 机器人的时间参数
#[derive(Debug, Clone, Copy)]
pub struct BotTiming {
    pub interval: Duration,
    /// 提议的有效期
    pub expiry: Duration,
    /// 同一单元两次被自动派遣的最小间隔
    pub cooldown: Duration,
}

pub struct DispatchBot {
    job: String,
    engine: Arc<AssignmentEngine>,
    cache: Arc<StateCache>,
    clock: Arc<dyn Clock>,
    strategy: Arc<dyn UnitSelectionStrategy>,
    metrics: Arc<MetricsCollector>,
    timing: BotTiming,
    last_assigned: DashMap<u64, DateTime<Utc>>,
}

impl DispatchBot {
    pub fn new(
        job: impl Into<String>,
        engine: Arc<AssignmentEngine>,
        cache: Arc<StateCache>,
        clock: Arc<dyn Clock>,
        strategy: Arc<dyn UnitSelectionStrategy>,
        metrics: Arc<MetricsCollector>,
        timing: BotTiming,
    ) -> Self {
        Self {
            job: job.into(),
            engine,
            cache,
            clock,
            strategy,
            metrics,
            timing,
            last_assigned: DashMap::new(),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    fn candidates(&self, now: DateTime<Utc>) -> Vec<Unit> {
        let cooldown = to_chrono(self.timing.cooldown);
        self.last_assigned.retain(|_, at| now - *at < cooldown);

        self.cache
            .list_units(&self.job)
            .into_iter()
            .filter(|unit| {
                unit.status_kind() == Some(UnitStatusKind::Available)
                    && !unit.is_empty()
                    && !self.last_assigned.contains_key(&unit.id)
            })
            .collect()
    }

    /// 执行一轮派遣，返回本轮发出的提议数
    pub async fn run_once(&self) -> CoordinatorResult<usize> {
        let pending: Vec<_> = self
            .cache
            .list_dispatches(&self.job)
            .into_iter()
            .filter(|d| d.awaits_assignment())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut proposed = 0;
        for dispatch in pending {
            let now = self.clock.now();
            let candidates = self.candidates(now);
            let Some(unit_id) = self.strategy.select_unit(&dispatch, &candidates).await? else {
                debug!(job = %self.job, dispatch_id = dispatch.id, "没有空闲单元，等待下一轮");
                break;
            };

            let expires_at = now + to_chrono(self.timing.expiry);
            match self
                .engine
                .assign_units(&self.job, dispatch.id, &[unit_id], &[], Some(expires_at), None)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    warn!(job = %self.job, dispatch_id = dispatch.id, error = %e, "自动派遣目标已不存在");
                    continue;
                }
                Err(e) => return Err(e),
            }
            self.engine
                .update_dispatch_with(&self.job, dispatch.id, |d| {
                    d.attributes.add(ATTRIBUTE_AUTO_ASSIGNED);
                })
                .await?;

            self.last_assigned.insert(unit_id, now);
            self.metrics.record_bot_assignment(&self.job);
            info!(
                job = %self.job,
                dispatch_id = dispatch.id,
                unit_id,
                strategy = self.strategy.name(),
                "自动派遣提议已发出"
            );
            proposed += 1;
        }
        Ok(proposed)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.timing.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = %self.job, "自动派遣机器人已启动");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(job = %self.job, "收到停止信号，自动派遣机器人退出");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(job = %self.job, error = %e, "自动派遣失败");
                    }
                }
            }
        }
    }
}

/// 根据各组织的设置启动或停止机器人
pub struct BotManager {
    engine: Arc<AssignmentEngine>,
    cache: Arc<StateCache>,
    clock: Arc<dyn Clock>,
    strategy: Arc<dyn UnitSelectionStrategy>,
    metrics: Arc<MetricsCollector>,
    timing: BotTiming,
    manager_interval: Duration,
    shutdown: broadcast::Sender<()>,
    bots: DashMap<String, JoinHandle<()>>,
}

impl BotManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<AssignmentEngine>,
        cache: Arc<StateCache>,
        clock: Arc<dyn Clock>,
        strategy: Arc<dyn UnitSelectionStrategy>,
        metrics: Arc<MetricsCollector>,
        timing: BotTiming,
        manager_interval: Duration,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            engine,
            cache,
            clock,
            strategy,
            metrics,
            timing,
            manager_interval,
            shutdown,
            bots: DashMap::new(),
        }
    }

    fn should_run(&self, job: &str) -> bool {
        let enabled = self
            .cache
            .get_settings(job)
            .map(|s| s.enabled)
            .unwrap_or(false);
        enabled && self.engine.effective_mode(job) == OperatingMode::AutoRoundRobin
    }

    /// 对比期望状态与实际运行的机器人，返回 (启动数, 停止数)
    pub fn reconcile(&self) -> (usize, usize) {
        let mut started = 0;
        let mut stopped = 0;

        self.bots.retain(|job, handle| {
            let keep = !handle.is_finished() && self.should_run(job);
            if !keep {
                handle.abort();
                info!(job = %job, "自动派遣机器人已停止");
                stopped += 1;
            }
            keep
        });

        for job in self.cache.jobs() {
            if self.bots.contains_key(&job) || !self.should_run(&job) {
                continue;
            }
            let bot = Arc::new(DispatchBot::new(
                job.clone(),
                self.engine.clone(),
                self.cache.clone(),
                self.clock.clone(),
                self.strategy.clone(),
                self.metrics.clone(),
                self.timing,
            ));
            let handle = tokio::spawn(bot.run(self.shutdown.subscribe()));
            self.bots.insert(job, handle);
            started += 1;
        }

        if started > 0 || stopped > 0 {
            debug!(started, stopped, running = self.bots.len(), "机器人调整完成");
        }
        (started, stopped)
    }

    pub fn running_bots(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self.bots.iter().map(|e| e.key().clone()).collect();
        jobs.sort();
        jobs
    }

    pub fn stop_all(&self) {
        for entry in self.bots.iter() {
            entry.value().abort();
        }
        self.bots.clear();
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.manager_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.stop_all();
                    info!("机器人管理器已停止");
                    break;
                }
                _ = ticker.tick() => {
                    self.reconcile();
                }
            }
        }
    }
}
