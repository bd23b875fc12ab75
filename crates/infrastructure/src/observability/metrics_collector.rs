//! Metrics collector for the coordinator
//!
//! 通过 `metrics` 门面记录指标，未安装导出器时所有调用都是空操作。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{debug, warn};

/// 调度中心指标
pub struct MetricsCollector {
    // 消息总线
    bus_publish_total: Counter,
    bus_publish_failures_total: Counter,
    bus_decode_failures_total: Counter,
    bus_events_applied_total: Counter,

    // 缓存
    cache_reloads_total: Counter,

    // 派遣
    assignments_total: Counter,
    bot_assignments_total: Counter,

    // 实时推送
    broker_dropped_total: Counter,
    stream_clients: Gauge,

    housekeeping_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            bus_publish_total: counter!("coordinator_bus_publish_total"),
            bus_publish_failures_total: counter!("coordinator_bus_publish_failures_total"),
            bus_decode_failures_total: counter!("coordinator_bus_decode_failures_total"),
            bus_events_applied_total: counter!("coordinator_bus_events_applied_total"),
            cache_reloads_total: counter!("coordinator_cache_reloads_total"),
            assignments_total: counter!("coordinator_assignments_total"),
            bot_assignments_total: counter!("coordinator_bot_assignments_total"),
            broker_dropped_total: counter!("coordinator_broker_dropped_total"),
            stream_clients: gauge!("coordinator_stream_clients"),
            housekeeping_duration: histogram!("coordinator_housekeeping_duration_seconds"),
        }
    }

    /// Record a bus publication result
    pub fn record_bus_publish(&self, subject: &str, success: bool) {
        if success {
            self.bus_publish_total.increment(1);
        } else {
            self.bus_publish_failures_total.increment(1);
            warn!(subject = subject, "Bus publish failed");
        }
    }

    pub fn record_bus_decode_failure(&self, subject: &str) {
        self.bus_decode_failures_total.increment(1);
        debug!(subject = subject, "Bus message dropped");
    }

    pub fn record_bus_event_applied(&self) {
        self.bus_events_applied_total.increment(1);
    }

    /// 缓存未命中后从存储重新加载
    pub fn record_cache_reload(&self, entity: &'static str) {
        self.cache_reloads_total.increment(1);
        counter!("coordinator_cache_reloads_by_entity_total", "entity" => entity).increment(1);
    }

    pub fn record_assignment_change(&self, added: usize, removed: usize) {
        self.assignments_total.increment((added + removed) as u64);
    }

    pub fn record_bot_assignment(&self, job: &str) {
        self.bot_assignments_total.increment(1);
        debug!(job = job, "Bot assignment recorded");
    }

    /// Record one housekeeping sweep and the number of affected entities
    pub fn record_housekeeping_sweep(&self, sweep: &'static str, affected: usize, duration_seconds: f64) {
        counter!("coordinator_housekeeping_sweeps_total", "sweep" => sweep).increment(1);
        counter!("coordinator_housekeeping_affected_total", "sweep" => sweep)
            .increment(affected as u64);
        self.housekeeping_duration.record(duration_seconds);
    }

    pub fn record_broker_drop(&self) {
        self.broker_dropped_total.increment(1);
    }

    pub fn stream_client_connected(&self) {
        self.stream_clients.increment(1.0);
    }

    pub fn stream_client_disconnected(&self) {
        self.stream_clients.decrement(1.0);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
