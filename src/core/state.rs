//! 编排状态：轮次阶段
//!
//! AGENT_TURN → (TOOL_EXECUTION → AGENT_TURN)* → USER_TURN → AGENT_TURN … → DONE

use std::fmt;

use serde::Serialize;

use crate::data::Message;

/// 编排器当前阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    AgentTurn,
    ToolExecution,
    UserTurn,
    Done,
}

impl Phase {
    /// 从已有对话的最后一条消息推出下一阶段（续跑时用）
    pub fn after(last: &Message, solo_mode: bool) -> Phase {
        match last {
            Message::Assistant(m) if m.is_tool_call() => Phase::ToolExecution,
            Message::Assistant(_) if solo_mode => Phase::Done,
            Message::Assistant(_) => Phase::UserTurn,
            Message::User(_) | Message::Tool(_) | Message::System(_) => Phase::AgentTurn,
        }
    }

    pub fn is_done(self) -> bool {
        self == Phase::Done
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::AgentTurn => "AGENT_TURN",
            Phase::ToolExecution => "TOOL_EXECUTION",
            Phase::UserTurn => "USER_TURN",
            Phase::Done => "DONE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AssistantMessage, ToolCall, ToolMessage};
    use serde_json::json;

    #[test]
    fn test_phase_after_last_message() {
        let call = AssistantMessage::tool_calls(vec![ToolCall::new("1", "get_users", json!({}))]);
        assert_eq!(Phase::after(&call.into(), false), Phase::ToolExecution);
        assert_eq!(Phase::after(&Message::assistant("hi"), false), Phase::UserTurn);
        assert_eq!(Phase::after(&Message::assistant("hi"), true), Phase::Done);
        assert_eq!(Phase::after(&Message::user("hi"), false), Phase::AgentTurn);
        assert_eq!(
            Phase::after(&ToolMessage::ok("1", "[]").into(), false),
            Phase::AgentTurn
        );
    }
}
