//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / 脚本化 Mock）实现 LlmClient::generate：输入完整对话与工具定义，
//! 返回文本和/或工具调用。

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::data::{Message, TokenUsage, ToolCall};
use crate::environment::ToolSchema;

/// LLM 后端错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed response: {0}")]
    MalformedOutput(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// 限流 / 超时 / 连接 / 5xx / 响应格式错误可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Timeout
                | LlmError::Connection(_)
                | LlmError::Server(_)
                | LlmError::MalformedOutput(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Required,
}

/// 一次生成请求
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub tool_choice: Option<ToolChoice>,
    pub seed: Option<u64>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            tool_choice: None,
            seed: None,
            temperature: None,
        }
    }
}

/// 模型输出：文本与工具调用可同时存在
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 模型名（记录在结果中）
    fn model(&self) -> &str;

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}
