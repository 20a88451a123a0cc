//! Agent：遵循领域策略、可调用工具的一方
//!
//! 任何实现 `get_init_state` + `generate_next_message` 的类型都可以作为 Agent。
//! 状态由编排器持有：生成时传入旧状态的引用，返回新消息与新状态。

pub mod llm_agent;
pub mod solo;

use async_trait::async_trait;

use crate::core::{GenerationError, HarnessError};
use crate::data::{AssistantMessage, Message};
use crate::llm::LlmResponse;

pub use llm_agent::{LlmAgent, AGENT_INSTRUCTION};
pub use solo::{LlmSoloAgent, STOP_FUNCTION_NAME, STOP_TOKEN};

/// Agent 的对话状态
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentState {
    pub system_messages: Vec<Message>,
    pub messages: Vec<Message>,
}

impl AgentState {
    /// 发给 LLM 的完整上下文
    pub fn llm_messages(&self) -> Vec<Message> {
        self.system_messages
            .iter()
            .chain(self.messages.iter())
            .cloned()
            .collect()
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// 以可选的已有对话初始化状态
    fn get_init_state(&self, message_history: Option<&[Message]>)
        -> Result<AgentState, HarnessError>;

    /// incoming 为空表示首轮无输入；多条时为同一轮的全部工具结果
    async fn generate_next_message(
        &self,
        incoming: &[Message],
        state: &AgentState,
    ) -> Result<(AssistantMessage, AgentState), GenerationError>;

    /// 该消息是否表示 Agent 主动结束
    fn is_stop(&self, _message: &AssistantMessage) -> bool {
        false
    }

    fn set_seed(&mut self, seed: u64);
}

/// Agent 可见的历史：去掉 System 消息
pub(crate) fn agent_history(message_history: Option<&[Message]>) -> Vec<Message> {
    message_history
        .unwrap_or(&[])
        .iter()
        .filter(|m| !matches!(m, Message::System(_)))
        .cloned()
        .collect()
}

pub(crate) fn to_assistant_message(
    response: LlmResponse,
) -> Result<AssistantMessage, GenerationError> {
    let mut message = AssistantMessage::tool_calls(response.tool_calls);
    message.content = response.content;
    message.usage = response.usage;
    message
        .validate()
        .map_err(GenerationError::MalformedOutput)?;
    Ok(message)
}
