//! 任务调度：动作并发池
//!
//! 同一轮推理产生的多个动作可并发执行；Semaphore 限制同时在途的 provider 调用数。
//! 调度器跨会话共享时，限制作用于整个进程。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 动作并发调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    /// 动作并发限制（默认 3）
    action_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_actions: usize) -> Self {
        let max = max_concurrent_actions.max(1);
        Self {
            action_semaphore: Arc::new(Semaphore::new(max)),
            max_concurrent: max,
        }
    }

    /// 获取动作执行许可；信号量从不关闭，None 仅在其被关闭时出现
    pub async fn acquire_action(&self) -> Option<OwnedSemaphorePermit> {
        self.action_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.action_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let sched = TaskScheduler::new(2);
        let a = sched.acquire_action().await;
        let _b = sched.acquire_action().await;
        assert_eq!(sched.available(), 0);
        drop(a);
        assert_eq!(sched.available(), 1);
    }

    #[test]
    fn test_zero_is_clamped() {
        assert_eq!(TaskScheduler::new(0).max_concurrent(), 1);
    }
}
