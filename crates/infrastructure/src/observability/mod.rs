//! Observability module
//!
//! 指标采集。日志订阅器由二进制入口初始化，Prometheus 导出器同样在入口安装。

pub mod metrics_collector;

pub use metrics_collector::MetricsCollector;
