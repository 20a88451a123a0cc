//! 错误分类与恢复动作
//!
//! - ToolError：分发边界内的工具错误，转为带 error 标记的 ToolMessage，对话继续
//! - GenerationError：Agent / User 模拟器生成失败，由 RecoveryEngine 决定重试或终止
//! - HarnessError：协议违规、配置、IO、未知领域/任务等顶层错误

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// 工具执行错误（未知工具、参数错误、业务校验失败）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool '{0}' not found.")]
    UnknownTool(String),

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// 领域函数的校验失败，如引用了不存在的实体
    #[error("{0}")]
    Failed(String),

    #[error("Failed to serialize result of '{tool}': {message}")]
    Serialization { tool: String, message: String },
}

impl ToolError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ToolError::Failed(msg.into())
    }
}

/// 模拟器生成下一条消息失败
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    /// 模型输出不可用（既无文本也无工具调用，或用户模拟器发起了工具调用）
    #[error("Malformed output: {0}")]
    MalformedOutput(String),
}

impl GenerationError {
    /// 是否值得重试：限流 / 5xx / 连接 / 超时 / 输出格式错误
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Llm(e) => e.is_retryable(),
            GenerationError::Timeout(_) => true,
            GenerationError::MalformedOutput(_) => true,
        }
    }

    /// 服务端建议的重试等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::Llm(LlmError::RateLimited { retry_after_ms }) => {
                retry_after_ms.map(Duration::from_millis)
            }
            _ => None,
        }
    }
}

/// 顶层错误
#[derive(Error, Debug)]
pub enum HarnessError {
    /// 编排器内部不变量被破坏（说明框架有 bug，不可恢复）
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// 环境初始化失败（初始化动作报错、历史回放不一致）
    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Tool registration error: {0}")]
    Registration(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),
}

/// 恢复引擎根据错误给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待后重试同一次生成
    Retry { delay: Duration },
    /// 放弃：本次运行记为基础设施错误
    Abort,
}
