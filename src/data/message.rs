//! 对话消息：System / User / Assistant / Tool 四种角色
//!
//! 轨迹（Trajectory）即按插入顺序排列的 Message 序列；Assistant 消息可携带若干 ToolCall，
//! 每个 ToolCall 由一条 id 相同的 ToolMessage 应答。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 当前时间（RFC 3339），作为消息时间戳
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// 单次 LLM 调用的 token 用量
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// 工具调用：id 在一轮内唯一，用于与 ToolMessage 对应
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// 函数调用形式，如 `create_task(user_id="user_1", title="x")`，用于日志与提示词
    pub fn func_format(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, args)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub content: String,
    #[serde(default = "now_timestamp")]
    pub timestamp: String,
}

/// 用户（模拟器）消息：只有文本，不发起工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_idx: Option<usize>,
    #[serde(default = "now_timestamp")]
    pub timestamp: String,
}

impl UserMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            turn_idx: None,
            timestamp: now_timestamp(),
        }
    }
}

/// Agent 消息：文本回复或工具调用（至少其一）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_idx: Option<usize>,
    #[serde(default = "now_timestamp")]
    pub timestamp: String,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: None,
            turn_idx: None,
            timestamp: now_timestamp(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            usage: None,
            turn_idx: None,
            timestamp: now_timestamp(),
        }
    }

    pub fn has_text_content(&self) -> bool {
        self.content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn is_tool_call(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 文本与工具调用至少有一项
    pub fn validate(&self) -> Result<(), String> {
        if self.has_text_content() || self.is_tool_call() {
            Ok(())
        } else {
            Err("assistant message must have either content or tool calls".to_string())
        }
    }
}

/// 工具执行结果；error 为 true 表示工具失败（未知工具、参数错误、业务校验失败）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_idx: Option<usize>,
    #[serde(default = "now_timestamp")]
    pub timestamp: String,
}

impl ToolMessage {
    pub fn ok(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            error: false,
            turn_idx: None,
            timestamp: now_timestamp(),
        }
    }

    pub fn error(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            error: true,
            ..Self::ok(id, content)
        }
    }
}

/// 消息（按 role 打标签的和类型）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System(SystemMessage),
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System(SystemMessage {
            content: content.into(),
            timestamp: now_timestamp(),
        })
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User(UserMessage::new(content))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(content))
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::Tool(_) => "tool",
        }
    }

    /// 文本内容（Tool 消息为其结果）
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System(m) => Some(m.content.as_str()),
            Message::User(m) => Some(m.content.as_str()),
            Message::Assistant(m) => m.content.as_deref(),
            Message::Tool(m) => Some(m.content.as_str()),
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn set_turn_idx(&mut self, idx: Option<usize>) {
        match self {
            Message::System(_) => {}
            Message::User(m) => m.turn_idx = idx,
            Message::Assistant(m) => m.turn_idx = idx,
            Message::Tool(m) => m.turn_idx = idx,
        }
    }
}

impl From<UserMessage> for Message {
    fn from(m: UserMessage) -> Self {
        Message::User(m)
    }
}

impl From<AssistantMessage> for Message {
    fn from(m: AssistantMessage) -> Self {
        Message::Assistant(m)
    }
}

impl From<ToolMessage> for Message {
    fn from(m: ToolMessage) -> Self {
        Message::Tool(m)
    }
}

/// 轨迹中 Agent 发起的全部工具调用（按出现顺序）
pub fn collect_tool_calls(trajectory: &[Message]) -> Vec<&ToolCall> {
    trajectory
        .iter()
        .filter_map(Message::as_assistant)
        .flat_map(|m| m.tool_calls.iter())
        .collect()
}
