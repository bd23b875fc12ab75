use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 所有后台循环、实时流和 HTTP 服务都订阅同一个关闭信号。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 交给引擎容器的发送端
    pub fn sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// 订阅关闭信号；已经关闭时返回一个立即就绪的接收器
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_shutdown() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        let subscribers = self.shutdown_tx.receiver_count();
        // 没有接收者时发送失败，可以忽略
        let _ = self.shutdown_tx.send(());
        info!(subscribers, "关闭信号已发送");
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// 等待后台任务退出，超时后中止剩余任务，返回被中止的数量
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> usize {
        let aborters: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let total = handles.len();

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => {
                debug!(tasks = total, "后台任务已全部退出");
                0
            }
            Err(_) => {
                let pending = aborters.iter().filter(|a| !a.is_finished()).count();
                warn!(pending, ?timeout, "等待后台任务退出超时，强制中止");
                for aborter in aborters {
                    aborter.abort();
                }
                pending
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
