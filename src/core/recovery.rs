//! 错误恢复引擎
//!
//! 根据 GenerationError 与已重试次数返回 RecoveryAction：可重试错误按指数退避重试，
//! 超过上限或不可重试时终止本次运行。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{GenerationError, RecoveryAction};

/// 重试策略（对应配置 [retry] 段）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 不重试
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 第 attempt 次重试（从 0 开始）前的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// 将生成错误映射为重试 / 终止
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    config: RetryConfig,
}

impl RecoveryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// attempt 为已经重试过的次数
    pub fn handle(&self, err: &GenerationError, attempt: u32) -> RecoveryAction {
        if !err.is_retryable() || attempt >= self.config.max_retries {
            return RecoveryAction::Abort;
        }
        let backoff = self.config.backoff(attempt);
        let delay = match err.retry_after() {
            Some(hint) => hint.max(backoff),
            None => backoff,
        };
        RecoveryAction::Retry { delay }
    }
}
