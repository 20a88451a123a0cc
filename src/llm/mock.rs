//! 脚本化 LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预先写好的响应（或错误）；脚本用完后重复 fallback，未设置 fallback 则报错。
//! 同时记录收到的每个请求，便于断言模型看到的上下文。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::data::ToolCall;
use crate::llm::{LlmClient, LlmError, LlmRequest, LlmResponse};

#[derive(Debug)]
pub struct ScriptedLlmClient {
    model: String,
    script: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    fallback: Option<LlmResponse>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_text(self, content: impl Into<String>) -> Self {
        self.push(Ok(LlmResponse::text(content)))
    }

    /// 单个工具调用，id 自动编号
    pub fn with_tool_call(self, name: &str, arguments: Value) -> Self {
        let id = format!("call_{}", self.pending());
        self.push(Ok(LlmResponse::tool_calls(vec![ToolCall::new(
            id, name, arguments,
        )])))
    }

    pub fn with_response(self, response: LlmResponse) -> Self {
        self.push(Ok(response))
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.push(Err(error))
    }

    /// 脚本耗尽后一直返回的响应
    pub fn with_fallback(mut self, response: LlmResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    fn push(self, item: Result<LlmResponse, LlmError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
        self
    }

    fn pending(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 已收到的请求（按顺序）
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Api("script lock poisoned".to_string()))?
            .pop_front();
        match next {
            Some(item) => item,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::InvalidRequest("script exhausted".to_string())),
        }
    }
}
