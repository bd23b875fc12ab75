use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 按实体 id 划分的异步互斥锁
///
/// 同一单元或同一派遣单上的变更依次执行，不同实体之间互不影响。
/// 需要同时持有两种锁时，先锁单元再锁派遣单。
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: u64) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key).or_default().clone();
        mutex.lock_owned().await
    }

    /// 实体删除后清理对应的锁，仍被持有时保留
    pub fn forget(&self, key: u64) {
        self.locks
            .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
