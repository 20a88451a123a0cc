//! 任务定义：用户场景、初始状态、评估条件
//!
//! 任务从各领域的 JSON 任务集加载，加载后不可变。

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::HarnessError;
use crate::data::message::{Message, ToolCall};

/// 结构化的用户指令
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredUserInstructions {
    pub domain: String,
    pub reason_for_call: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_info: Option<String>,
    pub task_instructions: String,
}

/// 用户指令：纯文本或结构化
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserInstructions {
    Text(String),
    Structured(StructuredUserInstructions),
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("\t{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl fmt::Display for UserInstructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserInstructions::Text(s) => write!(f, "{s}"),
            UserInstructions::Structured(s) => {
                writeln!(f, "Domain: {}", s.domain)?;
                writeln!(f, "Reason for call:\n{}", indent(&s.reason_for_call))?;
                if let Some(known) = &s.known_info {
                    writeln!(f, "Known info:\n{}", indent(known))?;
                }
                if let Some(unknown) = &s.unknown_info {
                    writeln!(f, "Unknown info:\n{}", indent(unknown))?;
                }
                write!(f, "Task instructions:\n{}", indent(&s.task_instructions))
            }
        }
    }
}

/// 发给用户模拟器的全部信息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserScenario {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub instructions: UserInstructions,
}

impl fmt::Display for UserScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(persona) = &self.persona {
            writeln!(f, "Persona:\n{}", indent(persona))?;
        }
        write!(f, "Instructions:\n{}", indent(&self.instructions.to_string()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Description {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_policies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// 期望的 Agent 动作（金标准工具调用）
///
/// 与 ToolCall 比较时：名称必须相同；`compare_args` 为空时比较调用的全部参数，
/// 否则只比较列出的参数。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_args: Option<Vec<String>>,
}

impl Action {
    pub fn compare_with_tool_call(&self, tool_call: &ToolCall) -> bool {
        if self.name != tool_call.name {
            return false;
        }
        let keys: Vec<&String> = match &self.compare_args {
            Some(args) => args.iter().collect(),
            None => tool_call.arguments.keys().collect(),
        };
        if keys.is_empty() {
            return true;
        }
        let pick = |map: &Map<String, Value>| -> Map<String, Value> {
            keys.iter()
                .filter_map(|k| map.get(k.as_str()).map(|v| ((*k).clone(), v.clone())))
                .collect()
        };
        pick(&tool_call.arguments) == pick(&self.arguments)
    }

    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.action_id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// 对环境函数的一次调用（初始化动作）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvFunctionCall {
    pub func_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// 对环境的断言：函数返回的 bool 需等于 assert_value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvAssertion {
    pub func_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default = "default_assert_value")]
    pub assert_value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn default_assert_value() -> bool {
    true
}

/// 奖励依据
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardType {
    Db,
    EnvAssertion,
    Action,
    Communicate,
}

fn default_reward_basis() -> Vec<RewardType> {
    vec![RewardType::Db, RewardType::Communicate]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub env_assertions: Vec<EnvAssertion>,
    #[serde(default)]
    pub communicate_info: Vec<String>,
    /// 为 true 时期望动作须按声明顺序出现
    #[serde(default)]
    pub ordered_actions: bool,
    #[serde(default = "default_reward_basis")]
    pub reward_basis: Vec<RewardType>,
}

impl Default for EvaluationCriteria {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            env_assertions: Vec::new(),
            communicate_info: Vec::new(),
            ordered_actions: false,
            reward_basis: default_reward_basis(),
        }
    }
}

impl EvaluationCriteria {
    pub fn reward_basis_set(&self) -> BTreeSet<RewardType> {
        self.reward_basis.iter().copied().collect()
    }
}

/// 任务初始状态：数据库补丁、初始化动作、已有对话
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    /// 深度合并进领域标准数据库的部分 JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_data: Option<Value>,
    #[serde(default)]
    pub initialization_actions: Vec<EnvFunctionCall>,
    #[serde(default)]
    pub message_history: Vec<Message>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Description>,
    pub user_scenario: UserScenario,
    /// 单人模式（solo）下直接交给 Agent 的工单
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<InitialState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_criteria: Option<EvaluationCriteria>,
}

impl Task {
    pub fn message_history(&self) -> &[Message] {
        self.initial_state
            .as_ref()
            .map(|s| s.message_history.as_slice())
            .unwrap_or(&[])
    }

    pub fn expected_actions(&self) -> &[Action] {
        self.evaluation_criteria
            .as_ref()
            .map(|c| c.actions.as_slice())
            .unwrap_or(&[])
    }
}

/// 读取 JSON 任务集文件
pub fn load_tasks(path: &Path) -> Result<Vec<Task>, HarnessError> {
    let raw = std::fs::read_to_string(path)?;
    parse_tasks(&raw)
}

pub fn parse_tasks(raw: &str) -> Result<Vec<Task>, HarnessError> {
    let tasks: Vec<Task> = serde_json::from_str(raw)?;
    let mut seen = BTreeSet::new();
    for task in &tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(HarnessError::InvalidTask(format!(
                "duplicate task id: {}",
                task.id
            )));
        }
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(compare_args: Option<Vec<&str>>) -> Action {
        Action {
            action_id: "create_task_1".into(),
            name: "create_task".into(),
            arguments: json!({"user_id": "user_1", "title": "Meeting"})
                .as_object()
                .cloned()
                .unwrap(),
            info: None,
            compare_args: compare_args.map(|a| a.into_iter().map(String::from).collect()),
        }
    }

    #[test]
    fn test_action_matches_all_args() {
        let call = ToolCall::new("x", "create_task", json!({"user_id": "user_1", "title": "Meeting"}));
        assert!(action(None).compare_with_tool_call(&call));

        let other = ToolCall::new("x", "create_task", json!({"user_id": "user_2", "title": "Meeting"}));
        assert!(!action(None).compare_with_tool_call(&other));
    }

    #[test]
    fn test_action_matches_selected_args() {
        let call = ToolCall::new("x", "create_task", json!({"user_id": "user_9", "title": "Meeting"}));
        assert!(action(Some(vec!["title"])).compare_with_tool_call(&call));
        assert!(action(Some(vec![])).compare_with_tool_call(&call));
    }

    #[test]
    fn test_action_name_mismatch() {
        let call = ToolCall::new("x", "get_users", json!({}));
        assert!(!action(Some(vec![])).compare_with_tool_call(&call));
    }

    #[test]
    fn test_parse_tasks_with_text_and_structured_instructions() {
        let raw = json!([
            {
                "id": "t1",
                "user_scenario": {"instructions": "Create a task"},
                "evaluation_criteria": {"actions": []}
            },
            {
                "id": "t2",
                "user_scenario": {
                    "persona": "Busy",
                    "instructions": {
                        "domain": "mock",
                        "reason_for_call": "Needs a task",
                        "task_instructions": "Ask politely"
                    }
                }
            }
        ])
        .to_string();
        let tasks = parse_tasks(&raw).unwrap();
        assert_eq!(tasks.len(), 2);
        let criteria = tasks[0].evaluation_criteria.as_ref().unwrap();
        assert_eq!(criteria.reward_basis, vec![RewardType::Db, RewardType::Communicate]);
        let scenario = tasks[1].user_scenario.to_string();
        assert!(scenario.contains("Persona:"));
        assert!(scenario.contains("Reason for call:"));
    }

    #[test]
    fn test_parse_tasks_rejects_duplicate_ids() {
        let raw = json!([
            {"id": "t1", "user_scenario": {"instructions": "a"}},
            {"id": "t1", "user_scenario": {"instructions": "b"}}
        ])
        .to_string();
        assert!(matches!(parse_tasks(&raw), Err(HarnessError::InvalidTask(_))));
    }

    #[test]
    fn test_reward_type_serialization() {
        assert_eq!(serde_json::to_value(RewardType::EnvAssertion).unwrap(), json!("ENV_ASSERTION"));
        assert_eq!(serde_json::to_value(RewardType::Db).unwrap(), json!("DB"));
    }
}
