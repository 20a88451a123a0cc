//! Environment：单次运行的工具分发器
//!
//! 唯一允许修改领域数据库的组件。get_response 永不向调用方报错：未知工具、参数错误、
//! 业务校验失败一律转成 error=true 的 ToolMessage；每次分发输出一条结构化审计日志。

use std::time::Instant;

use serde_json::{Map, Value};

use crate::core::{HarnessError, ToolError};
use crate::data::{EnvAssertion, EnvFunctionCall, Message, ToolCall, ToolMessage};
use crate::environment::registry::ToolSchema;
use crate::environment::toolkit::ToolProvider;

#[derive(Clone)]
pub struct Environment {
    domain_name: String,
    policy: String,
    tools: Box<dyn ToolProvider>,
    user_tools: Option<Box<dyn ToolProvider>>,
    solo_mode: bool,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("domain_name", &self.domain_name)
            .field("tools", &self.tools.tool_names())
            .field("solo_mode", &self.solo_mode)
            .finish()
    }
}

impl Environment {
    pub fn new(
        domain_name: impl Into<String>,
        policy: impl Into<String>,
        tools: Box<dyn ToolProvider>,
        user_tools: Option<Box<dyn ToolProvider>>,
    ) -> Self {
        Self {
            domain_name: domain_name.into(),
            policy: policy.into(),
            tools,
            user_tools,
            solo_mode: false,
        }
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn is_solo_mode(&self) -> bool {
        self.solo_mode
    }

    /// 单人模式下 Agent 也能调用用户工具，两边工具名不得重叠
    pub fn set_solo_mode(&mut self, solo_mode: bool) -> Result<(), HarnessError> {
        if solo_mode {
            if let Some(user_tools) = &self.user_tools {
                let overlap: Vec<String> = user_tools
                    .tool_names()
                    .into_iter()
                    .filter(|name| self.tools.has_tool(name))
                    .collect();
                if !overlap.is_empty() {
                    return Err(HarnessError::Environment(format!(
                        "solo mode requires disjoint agent and user tools, overlap: {}",
                        overlap.join(", ")
                    )));
                }
            }
        }
        self.solo_mode = solo_mode;
        Ok(())
    }

    /// Agent 可用工具定义（单人模式含用户工具）
    pub fn agent_tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = self.tools.tool_schemas();
        if self.solo_mode {
            if let Some(user_tools) = &self.user_tools {
                schemas.extend(user_tools.tool_schemas());
            }
        }
        schemas
    }

    pub fn user_tool_schemas(&self) -> Vec<ToolSchema> {
        self.user_tools
            .as_ref()
            .map(|t| t.tool_schemas())
            .unwrap_or_default()
    }

    /// 工具说明文本（拼入提示词）
    pub fn tools_description(&self) -> String {
        self.agent_tool_schemas()
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn route(&mut self, name: &str) -> Option<&mut Box<dyn ToolProvider>> {
        if self.tools.has_tool(name) {
            return Some(&mut self.tools);
        }
        if self.solo_mode {
            if let Some(user_tools) = self.user_tools.as_mut() {
                if user_tools.has_tool(name) {
                    return Some(user_tools);
                }
            }
        }
        None
    }

    pub fn use_tool(&mut self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        match self.route(name) {
            Some(provider) => provider.use_tool(name, args),
            None => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    /// 执行一次工具调用并包装为 ToolMessage（id 与调用一致）
    pub fn get_response(&mut self, call: &ToolCall) -> ToolMessage {
        let start = Instant::now();
        let result = self.use_tool(&call.name, &call.arguments);
        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(ToolError::UnknownTool(_)) => (false, "unknown_tool"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "domain": self.domain_name,
            "tool": call.name,
            "call_id": call.id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(value) => ToolMessage::ok(call.id.clone(), to_content(&value)),
            Err(e) => ToolMessage::error(call.id.clone(), format!("Error: {e}")),
        }
    }

    /// 调用环境函数（工具或隐藏函数）
    pub fn run_env_function(&mut self, call: &EnvFunctionCall) -> Result<Value, ToolError> {
        if self.tools.has_function(&call.func_name) {
            return self.tools.call_function(&call.func_name, &call.arguments);
        }
        if let Some(user_tools) = self.user_tools.as_mut() {
            if user_tools.has_function(&call.func_name) {
                return user_tools.call_function(&call.func_name, &call.arguments);
            }
        }
        Err(ToolError::UnknownTool(call.func_name.clone()))
    }

    /// 断言函数须返回 bool，结果与 assert_value 比较
    pub fn run_env_assertion(&mut self, assertion: &EnvAssertion) -> Result<bool, ToolError> {
        let call = EnvFunctionCall {
            func_name: assertion.func_name.clone(),
            arguments: assertion.arguments.clone(),
        };
        match self.run_env_function(&call)? {
            Value::Bool(b) => Ok(b == assertion.assert_value),
            other => Err(ToolError::failed(format!(
                "assertion {} returned non-boolean value {other}",
                assertion.func_name
            ))),
        }
    }

    /// 设置运行初始状态：合并数据库补丁 → 执行初始化动作 → 回放历史中的工具调用
    ///
    /// 回放结果与历史记录不一致时报错，保证续跑的环境与对话一致。
    pub fn set_state(
        &mut self,
        initialization_data: Option<&Value>,
        initialization_actions: &[EnvFunctionCall],
        message_history: &[Message],
    ) -> Result<(), HarnessError> {
        if let Some(patch) = initialization_data {
            self.update_agent_db(patch)?;
        }
        for action in initialization_actions {
            self.run_env_function(action).map_err(|e| {
                HarnessError::Environment(format!(
                    "initialization action {} failed: {e}",
                    action.func_name
                ))
            })?;
        }
        for (call, expected) in paired_tool_calls(message_history)? {
            let actual = self.get_response(call);
            if actual.error != expected.error || !same_content(&actual.content, &expected.content) {
                return Err(HarnessError::Environment(format!(
                    "replayed tool call {} does not match history: expected {:?}, got {:?}",
                    call.func_format(),
                    expected.content,
                    actual.content
                )));
            }
        }
        Ok(())
    }

    pub fn update_agent_db(&mut self, patch: &Value) -> Result<(), HarnessError> {
        self.tools.update_db(patch)
    }

    pub fn db_hash(&self) -> Result<String, HarnessError> {
        self.tools.db_hash()
    }

    pub fn user_db_hash(&self) -> Result<Option<String>, HarnessError> {
        self.user_tools.as_ref().map(|t| t.db_hash()).transpose()
    }

    pub fn db_value(&self) -> Result<Value, HarnessError> {
        self.tools.db_value()
    }
}

/// 历史中的 (ToolCall, ToolMessage) 对；工具消息须按顺序一一应答前一条 Assistant 消息的调用
pub fn paired_tool_calls(history: &[Message]) -> Result<Vec<(&ToolCall, &ToolMessage)>, HarnessError> {
    let mut pairs = Vec::new();
    let mut pending: Vec<&ToolCall> = Vec::new();
    let mut next = 0;
    for message in history {
        match message {
            Message::Tool(tool_msg) => {
                let call = pending.get(next).ok_or_else(|| {
                    HarnessError::Protocol(format!(
                        "tool message {} does not answer any pending tool call",
                        tool_msg.id
                    ))
                })?;
                if call.id != tool_msg.id {
                    return Err(HarnessError::Protocol(format!(
                        "tool message id {} does not match tool call id {}",
                        tool_msg.id, call.id
                    )));
                }
                pairs.push((*call, tool_msg));
                next += 1;
            }
            other => {
                if next < pending.len() {
                    return Err(HarnessError::Protocol(format!(
                        "{} message arrived before all tool calls were answered",
                        other.role()
                    )));
                }
                pending = other
                    .as_assistant()
                    .map(|m| m.tool_calls.iter().collect())
                    .unwrap_or_default();
                next = 0;
            }
        }
    }
    Ok(pairs)
}

fn same_content(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    match (
        serde_json::from_str::<Value>(actual),
        serde_json::from_str::<Value>(expected),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// 字符串原样返回，其它值序列化为 JSON
pub fn to_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
