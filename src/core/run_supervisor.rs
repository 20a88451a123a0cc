//! 运行监管：批量级取消与单次运行墙钟超时
//!
//! 持有根 CancellationToken（Ctrl+C 时取消全部运行）；每次运行领取一个子 token，
//! 超过 run_timeout 后自动取消，编排器据此以 timed_out 结束并保留已有轨迹。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RunSupervisor {
    cancel_token: CancellationToken,
    run_timeout: Option<Duration>,
}

impl RunSupervisor {
    pub fn new(run_timeout: Option<Duration>) -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            run_timeout,
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    /// 取消全部运行
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 为单次运行创建子 token；设置了 run_timeout 时到期自动取消。
    /// 须在 tokio 运行时内调用。
    pub fn run_token(&self) -> CancellationToken {
        self.run_token_with_timeout(self.run_timeout)
    }

    /// 同 run_token，但使用给定的超时（单次运行配置覆盖全局设置）
    pub fn run_token_with_timeout(&self, run_timeout: Option<Duration>) -> CancellationToken {
        let token = self.cancel_token.child_token();
        if let Some(limit) = run_timeout {
            let timer = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => timer.cancel(),
                    _ = timer.cancelled() => {}
                }
            });
        }
        token
    }
}

impl Default for RunSupervisor {
    fn default() -> Self {
        Self::new(None)
    }
}
