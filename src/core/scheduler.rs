//! 批量调度：限制同时进行的模拟数
//!
//! 各次运行互不共享可变状态，只需 Semaphore 控制并发上限。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::HarnessError;

#[derive(Debug, Clone)]
pub struct BatchScheduler {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl BatchScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 获取一个运行许可，许可随返回值释放
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, HarnessError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HarnessError::Protocol("batch scheduler closed".to_string()))
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
