//! 用户模拟器：依据场景扮演客户，决定何时结束对话

pub mod simulator;

use async_trait::async_trait;

use crate::core::{GenerationError, HarnessError};
use crate::data::{AssistantMessage, Message, UserMessage};

pub use simulator::{LlmUserSimulator, USER_SIM_GUIDELINES};

pub const STOP: &str = "###STOP###";
pub const TRANSFER: &str = "###TRANSFER###";
pub const OUT_OF_SCOPE: &str = "###OUT-OF-SCOPE###";

/// 用户模拟器的对话状态（以用户视角记录：user = 自己，assistant = Agent）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserState {
    pub system_messages: Vec<Message>,
    pub messages: Vec<Message>,
}

impl UserState {
    /// 翻转角色供 LLM 扮演用户：Agent 的文本变为 user，用户自己的发言变为 assistant。
    /// 工具调用与工具结果对用户不可见。
    pub fn flip_roles(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::User(u) => Some(Message::Assistant(AssistantMessage {
                    content: Some(u.content.clone()),
                    tool_calls: Vec::new(),
                    usage: None,
                    turn_idx: u.turn_idx,
                    timestamp: u.timestamp.clone(),
                })),
                Message::Assistant(a) if a.has_text_content() => {
                    let mut flipped = UserMessage::new(a.content.clone().unwrap_or_default());
                    flipped.turn_idx = a.turn_idx;
                    flipped.timestamp = a.timestamp.clone();
                    Some(Message::User(flipped))
                }
                _ => None,
            })
            .collect()
    }

    pub fn llm_messages(&self) -> Vec<Message> {
        let mut messages = self.system_messages.clone();
        messages.extend(self.flip_roles());
        messages
    }
}

#[async_trait]
pub trait UserSimulator: Send + Sync {
    fn get_init_state(&self, message_history: Option<&[Message]>)
        -> Result<UserState, HarnessError>;

    /// incoming 为 Agent 发给用户的文本消息
    async fn generate_next_message(
        &self,
        incoming: &AssistantMessage,
        state: &UserState,
    ) -> Result<(UserMessage, UserState), GenerationError>;

    /// 含 STOP / TRANSFER / OUT_OF_SCOPE 任一标记即结束
    fn is_stop(&self, message: &UserMessage) -> bool {
        is_stop_content(&message.content)
    }

    fn set_seed(&mut self, seed: u64);
}

pub fn is_stop_content(content: &str) -> bool {
    [STOP, TRANSFER, OUT_OF_SCOPE]
        .iter()
        .any(|token| content.contains(token))
}
