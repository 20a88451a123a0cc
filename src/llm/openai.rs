//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。请求体按 Chat Completions
//! 格式直接构造（含 tools / tool_choice / seed），响应解析为文本与工具调用。

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::data::{Message, TokenUsage, ToolCall};
use crate::llm::{LlmClient, LlmError, LlmRequest, LlmResponse};

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: None,
        }
    }

    /// 请求未指定温度时使用
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn request_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(to_wire_message).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            if let Some(choice) = request.tool_choice {
                body["tool_choice"] = json!(choice);
            }
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        if let Some(temperature) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = self.request_body(request);
        let response: ChatResponse = self
            .client
            .chat()
            .create_byot(body)
            .await
            .map_err(classify_openai_error)?;
        response.into_llm_response()
    }
}

fn to_wire_message(message: &Message) -> Value {
    match message {
        Message::System(m) => json!({"role": "system", "content": m.content}),
        Message::User(m) => json!({"role": "user", "content": m.content}),
        Message::Assistant(m) => {
            let mut wire = json!({"role": "assistant", "content": m.content});
            if !m.tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(
                    m.tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": Value::Object(c.arguments.clone()).to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            wire
        }
        Message::Tool(m) => json!({"role": "tool", "tool_call_id": m.id, "content": m.content}),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl ChatResponse {
    fn into_llm_response(self) -> Result<LlmResponse, LlmError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedOutput("response has no choices".to_string()))?;
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let arguments = parse_arguments(&c.function.name, &c.function.arguments)?;
                Ok(ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;
        Ok(LlmResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            usage: self.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

fn parse_arguments(name: &str, raw: &str) -> Result<Map<String, Value>, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(LlmError::MalformedOutput(format!(
            "arguments of {name} are not an object: {other}"
        ))),
        Err(e) => Err(LlmError::MalformedOutput(format!(
            "arguments of {name} are not valid JSON: {e}"
        ))),
    }
}

fn classify_openai_error(err: OpenAIError) -> LlmError {
    classify_error_message(&err.to_string())
}

/// 按错误文本归类（状态码 / 关键字）
pub fn classify_error_message(message: &str) -> LlmError {
    let upper = message.to_ascii_uppercase();
    let has = |keys: &[&str]| keys.iter().any(|k| upper.contains(k));
    let msg = message.to_string();
    if has(&["429", "RATE LIMIT", "RATE_LIMIT", "TOO MANY REQUESTS"]) {
        LlmError::RateLimited { retry_after_ms: None }
    } else if has(&["TIMED OUT", "TIMEOUT", "DEADLINE EXCEEDED"]) {
        LlmError::Timeout
    } else if has(&["401", "403", "INVALID API KEY", "INCORRECT API KEY", "AUTHENTICATION", "PERMISSION"]) {
        LlmError::Auth(msg)
    } else if has(&["500", "502", "503", "504", "SERVER ERROR", "UNAVAILABLE", "OVERLOADED"]) {
        LlmError::Server(msg)
    } else if has(&["ERROR SENDING REQUEST", "CONNECTION", "DNS"]) {
        LlmError::Connection(msg)
    } else if has(&["FAILED TO DESERIALIZE", "JSON"]) {
        LlmError::MalformedOutput(msg)
    } else if has(&["400", "INVALID"]) {
        LlmError::InvalidRequest(msg)
    } else {
        LlmError::Api(msg)
    }
}
