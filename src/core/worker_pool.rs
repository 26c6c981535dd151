//! 工作线程池：同步工具处理函数的桥接
//!
//! 同步 handler 通过 spawn_blocking 在阻塞线程上执行，并用 Semaphore 限制同时占用的线程数，
//! 避免纯同步工具卡住 ReAct 主循环。

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::core::AgentError;

/// 有界工作池（可廉价 clone，多个 FnTool 共享同一许可池）
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// 在阻塞线程上运行 f；许可随闭包一起移动，线程结束（即使调用方已超时放弃）才归还
    pub async fn run_blocking<F, R>(&self, f: F) -> Result<R, AgentError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::ToolExecutionFailed("worker pool closed".to_string()))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| AgentError::ToolExecutionFailed(format!("worker panicked: {e}")))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}
