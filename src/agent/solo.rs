//! Solo 模式 Agent：不与用户对话，凭工单（ticket）独立完成任务
//!
//! 每轮必须调用工具；调用 `done` 工具表示结束，此时消息被改写为 STOP_TOKEN 文本。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{agent_history, to_assistant_message, Agent, AgentState};
use crate::core::{GenerationError, HarnessError};
use crate::data::{AssistantMessage, Message, Task};
use crate::environment::ToolSchema;
use crate::llm::{LlmClient, LlmRequest, ToolChoice};

pub const STOP_TOKEN: &str = "###STOP###";
pub const STOP_FUNCTION_NAME: &str = "done";

pub const AGENT_SOLO_INSTRUCTION: &str = "\
You are a customer service agent that helps the user according to the <policy> provided below.
You will be provided with a ticket that contains the user's request.
You will need to plan and call the appropriate tools to solve the ticket.

You cannot communicate with the user, only make tool calls.
Stop when you consider that you have solved the ticket.
To do so, send a message containing a single tool call to the `done` tool. Do not include any other tool calls in this last message.

Always follow the policy.";

pub struct LlmSoloAgent {
    client: Arc<dyn LlmClient>,
    tools: Vec<ToolSchema>,
    domain_policy: String,
    ticket: String,
    seed: Option<u64>,
    temperature: Option<f32>,
}

impl LlmSoloAgent {
    /// 任务不满足 solo 条件时返回 InvalidTask
    pub fn new(
        client: Arc<dyn LlmClient>,
        tools: Vec<ToolSchema>,
        domain_policy: &str,
        task: &Task,
    ) -> Result<Self, HarnessError> {
        let ticket = Self::check_valid_task(task)?;
        let mut tools = tools;
        tools.push(stop_tool());
        Ok(Self {
            client,
            tools,
            domain_policy: domain_policy.to_string(),
            ticket,
            seed: None,
            temperature: None,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// 需要工单和至少一个期望动作；历史只能包含工具调用与工具结果
    pub fn check_valid_task(task: &Task) -> Result<String, HarnessError> {
        let invalid = |reason: &str| HarnessError::InvalidTask(format!("{}: {reason}", task.id));
        let only_tool_exchanges = task.message_history().iter().all(|m| match m {
            Message::Tool(_) => true,
            Message::Assistant(a) => a.is_tool_call() && !a.has_text_content(),
            _ => false,
        });
        if !only_tool_exchanges {
            return Err(invalid(
                "solo mode history may only contain tool calls and tool results",
            ));
        }
        let ticket = task
            .ticket
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| invalid("solo mode requires a ticket"))?;
        if task.expected_actions().is_empty() {
            return Err(invalid("solo mode requires at least one expected action"));
        }
        Ok(ticket.to_string())
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "<instructions>\n{AGENT_SOLO_INSTRUCTION}\n</instructions>\n<policy>\n{}\n</policy>\n<ticket>\n{}\n</ticket>",
            self.domain_policy, self.ticket
        )
    }
}

fn stop_tool() -> ToolSchema {
    ToolSchema {
        name: STOP_FUNCTION_NAME.to_string(),
        description: "Call this function when you are done with the task.".to_string(),
        parameters: json!({"type": "object", "properties": {}, "required": []}),
    }
}

#[async_trait]
impl Agent for LlmSoloAgent {
    fn get_init_state(
        &self,
        message_history: Option<&[Message]>,
    ) -> Result<AgentState, HarnessError> {
        Ok(AgentState {
            system_messages: vec![Message::system(self.system_prompt())],
            messages: agent_history(message_history),
        })
    }

    async fn generate_next_message(
        &self,
        incoming: &[Message],
        state: &AgentState,
    ) -> Result<(AssistantMessage, AgentState), GenerationError> {
        let mut state = state.clone();
        state.messages.extend(
            incoming
                .iter()
                .filter(|m| !matches!(m, Message::User(_)))
                .cloned(),
        );

        let mut request = LlmRequest::new(state.llm_messages());
        request.tools = self.tools.clone();
        request.tool_choice = Some(ToolChoice::Required);
        request.seed = self.seed;
        request.temperature = self.temperature;

        let response = self.client.generate(&request).await?;
        let mut message = to_assistant_message(response)?;

        if message.has_text_content() && !message.is_tool_call() {
            return Err(GenerationError::MalformedOutput(
                "solo agent must answer with tool calls".to_string(),
            ));
        }
        if message
            .tool_calls
            .iter()
            .any(|c| c.name == STOP_FUNCTION_NAME)
        {
            if message.tool_calls.len() > 1 {
                return Err(GenerationError::MalformedOutput(format!(
                    "`{STOP_FUNCTION_NAME}` must be the only tool call"
                )));
            }
            message.tool_calls.clear();
            message.content = Some(STOP_TOKEN.to_string());
        }

        state.messages.push(message.clone().into());
        Ok((message, state))
    }

    fn is_stop(&self, message: &AssistantMessage) -> bool {
        message
            .content
            .as_deref()
            .map(|c| c.contains(STOP_TOKEN))
            .unwrap_or(false)
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_tasks;
    use crate::llm::ScriptedLlmClient;

    fn task_with_ticket() -> Task {
        let raw = r#"[{
            "id": "t1",
            "user_scenario": {"instructions": "n/a"},
            "ticket": "Mark task_1 as completed.",
            "evaluation_criteria": {
                "actions": [{"action_id": "a", "name": "update_task_status",
                             "arguments": {"task_id": "task_1", "status": "completed"}}]
            }
        }]"#;
        parse_tasks(raw).unwrap().remove(0)
    }

    #[test]
    fn test_check_valid_task() {
        let task = task_with_ticket();
        assert_eq!(
            LlmSoloAgent::check_valid_task(&task).unwrap(),
            "Mark task_1 as completed."
        );

        let mut no_ticket = task.clone();
        no_ticket.ticket = None;
        assert!(LlmSoloAgent::check_valid_task(&no_ticket).is_err());

        let mut no_actions = task;
        no_actions.evaluation_criteria = None;
        assert!(LlmSoloAgent::check_valid_task(&no_actions).is_err());
    }

    #[tokio::test]
    async fn test_done_becomes_stop_token() {
        let client = Arc::new(
            ScriptedLlmClient::new("scripted").with_tool_call(STOP_FUNCTION_NAME, json!({})),
        );
        let agent = LlmSoloAgent::new(client.clone(), vec![], "p", &task_with_ticket()).unwrap();
        let state = agent.get_init_state(None).unwrap();
        let (msg, _) = agent.generate_next_message(&[], &state).await.unwrap();

        assert!(agent.is_stop(&msg));
        assert!(!msg.is_tool_call());
        let request = &client.requests()[0];
        assert_eq!(request.tool_choice, Some(ToolChoice::Required));
        assert!(request.tools.iter().any(|t| t.name == STOP_FUNCTION_NAME));
        assert!(request.messages[0].content().unwrap().contains("<ticket>"));
    }

    #[tokio::test]
    async fn test_text_reply_is_malformed() {
        let client = Arc::new(ScriptedLlmClient::new("scripted").with_text("Sure!"));
        let agent = LlmSoloAgent::new(client, vec![], "p", &task_with_ticket()).unwrap();
        let state = agent.get_init_state(None).unwrap();
        let err = agent.generate_next_message(&[], &state).await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedOutput(_)));
    }
}
