//! 基于 LLM 的用户模拟器

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{GenerationError, HarnessError};
use crate::data::{AssistantMessage, Message, UserMessage, UserScenario};
use crate::llm::{LlmClient, LlmRequest};
use crate::user::{UserSimulator, UserState};

pub const USER_SIM_GUIDELINES: &str = include_str!("../../data/user_simulator/guidelines.md");

pub struct LlmUserSimulator {
    client: Arc<dyn LlmClient>,
    instructions: String,
    seed: Option<u64>,
    temperature: Option<f32>,
}

impl LlmUserSimulator {
    pub fn new(client: Arc<dyn LlmClient>, scenario: &UserScenario) -> Self {
        Self {
            client,
            instructions: scenario.to_string(),
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
            "{}\n\n<scenario>\n{}\n</scenario>",
            USER_SIM_GUIDELINES.trim(),
            self.instructions
        )
    }
}

#[async_trait]
impl UserSimulator for LlmUserSimulator {
    fn get_init_state(
        &self,
        message_history: Option<&[Message]>,
    ) -> Result<UserState, HarnessError> {
        Ok(UserState {
            system_messages: vec![Message::system(self.system_prompt())],
            messages: message_history
                .unwrap_or(&[])
                .iter()
                .filter(|m| !matches!(m, Message::System(_)))
                .cloned()
                .collect(),
        })
    }

    async fn generate_next_message(
        &self,
        incoming: &AssistantMessage,
        state: &UserState,
    ) -> Result<(UserMessage, UserState), GenerationError> {
        let mut state = state.clone();
        state.messages.push(incoming.clone().into());

        let mut request = LlmRequest::new(state.llm_messages());
        request.seed = self.seed;
        request.temperature = self.temperature;

        let response = self.client.generate(&request).await?;
        if !response.tool_calls.is_empty() {
            return Err(GenerationError::MalformedOutput(
                "user simulator must not call tools".to_string(),
            ));
        }
        let content = response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::MalformedOutput("user simulator returned no text".to_string())
            })?;

        let mut message = UserMessage::new(content);
        message.usage = response.usage;
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
    use crate::data::UserInstructions;
    use crate::llm::ScriptedLlmClient;
    use serde_json::json;

    fn scenario() -> UserScenario {
        UserScenario {
            persona: None,
            instructions: UserInstructions::Text("Ask for the list of users.".into()),
        }
    }

    #[tokio::test]
    async fn test_prompt_and_flipped_context() {
        let client = Arc::new(ScriptedLlmClient::new("user").with_text("Who are the users?"));
        let mut user = LlmUserSimulator::new(client.clone(), &scenario());
        user.set_seed(3);
        let state = user.get_init_state(None).unwrap();

        let greeting = AssistantMessage::text("Hi! How can I help you today?");
        let (msg, next) = user.generate_next_message(&greeting, &state).await.unwrap();
        assert_eq!(msg.content, "Who are the users?");
        assert!(!user.is_stop(&msg));
        assert_eq!(next.messages.len(), 2);

        let request = &client.requests()[0];
        let system = request.messages[0].content().unwrap();
        assert!(system.contains("<scenario>"));
        assert!(system.contains("Ask for the list of users."));
        assert_eq!(request.messages[1].role(), "user");
        assert_eq!(request.seed, Some(3));
    }

    #[tokio::test]
    async fn test_tool_call_is_malformed() {
        let client = Arc::new(ScriptedLlmClient::new("user").with_tool_call("get_users", json!({})));
        let user = LlmUserSimulator::new(client, &scenario());
        let state = user.get_init_state(None).unwrap();
        let err = user
            .generate_next_message(&AssistantMessage::text("hi"), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MalformedOutput(_)));
    }
}
