//! 对话模式 Agent：系统提示 = 指令 + 领域策略

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{agent_history, to_assistant_message, Agent, AgentState};
use crate::core::{GenerationError, HarnessError};
use crate::data::{AssistantMessage, Message};
use crate::environment::ToolSchema;
use crate::llm::{LlmClient, LlmRequest};

pub const AGENT_INSTRUCTION: &str = "\
You are a customer service agent that helps the user according to the <policy> provided below.
In each turn you can either:
- Send a message to the user.
- Make a tool call.
You cannot do both at the same time.

Try to be helpful and always follow the policy.";

pub struct LlmAgent {
    client: Arc<dyn LlmClient>,
    tools: Vec<ToolSchema>,
    domain_policy: String,
    seed: Option<u64>,
    temperature: Option<f32>,
}

impl LlmAgent {
    pub fn new(client: Arc<dyn LlmClient>, tools: Vec<ToolSchema>, domain_policy: &str) -> Self {
        Self {
            client,
            tools,
            domain_policy: domain_policy.to_string(),
            seed: None,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "<instructions>\n{AGENT_INSTRUCTION}\n</instructions>\n<policy>\n{}\n</policy>",
            self.domain_policy
        )
    }
}

#[async_trait]
impl Agent for LlmAgent {
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
        state.messages.extend(incoming.iter().cloned());

        let mut request = LlmRequest::new(state.llm_messages());
        request.tools = self.tools.clone();
        request.seed = self.seed;
        request.temperature = self.temperature;

        let response = self.client.generate(&request).await?;
        let message = to_assistant_message(response)?;
        state.messages.push(message.clone().into());
        Ok((message, state))
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, ScriptedLlmClient};
    use serde_json::json;

    #[tokio::test]
    async fn test_state_is_not_mutated_in_place() {
        let client = Arc::new(
            ScriptedLlmClient::new("scripted")
                .with_tool_call("get_users", json!({}))
                .with_text("Done"),
        );
        let mut agent = LlmAgent::new(client.clone(), vec![], "Be nice.");
        agent.set_seed(42);
        let state = agent.get_init_state(None).unwrap();

        let (msg, next) = agent
            .generate_next_message(&[Message::user("hello")], &state)
            .await
            .unwrap();
        assert!(msg.is_tool_call());
        assert!(state.messages.is_empty());
        assert_eq!(next.messages.len(), 2);

        let request = &client.requests()[0];
        assert_eq!(request.seed, Some(42));
        assert!(request.messages[0].content().unwrap().contains("Be nice."));
    }

    #[tokio::test]
    async fn test_empty_response_is_malformed() {
        let client = Arc::new(ScriptedLlmClient::new("scripted").with_response(LlmResponse::default()));
        let agent = LlmAgent::new(client, vec![], "p");
        let state = agent.get_init_state(None).unwrap();
        let err = agent.generate_next_message(&[], &state).await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedOutput(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_init_state_drops_system_messages() {
        let agent = LlmAgent::new(Arc::new(ScriptedLlmClient::new("s")), vec![], "p");
        let history = vec![Message::system("old"), Message::user("hi")];
        let state = agent.get_init_state(Some(&history)).unwrap();
        assert_eq!(state.messages, vec![history[1].clone()]);
        assert_eq!(state.system_messages.len(), 1);
    }
}
