//! 模拟运行结果：终止原因、奖励明细、单次运行与批量结果

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::HarnessError;
use crate::data::message::{now_timestamp, Message};
use crate::data::task::{Action, EnvAssertion, RewardType, Task};

/// 一次模拟为何结束
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    UserStop,
    AgentStop,
    MaxTurnsExceeded,
    TooManyErrors,
    TimedOut,
    InfraError,
}

impl TerminationReason {
    /// 提前终止：不参与正常评分，奖励记 0
    pub fn is_premature(self) -> bool {
        matches!(
            self,
            TerminationReason::MaxTurnsExceeded
                | TerminationReason::TooManyErrors
                | TerminationReason::TimedOut
                | TerminationReason::InfraError
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::UserStop => "user_stop",
            TerminationReason::AgentStop => "agent_stop",
            TerminationReason::MaxTurnsExceeded => "max_turns_exceeded",
            TerminationReason::TooManyErrors => "too_many_errors",
            TerminationReason::TimedOut => "timed_out",
            TerminationReason::InfraError => "infra_error",
        };
        f.write_str(s)
    }
}

/// 批量报告中每个任务的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed,
    MaxTurnsExceeded,
    InfraError,
    TimedOut,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Passed => "passed",
            RunOutcome::Failed => "failed",
            RunOutcome::MaxTurnsExceeded => "max_turns_exceeded",
            RunOutcome::InfraError => "infra_error",
            RunOutcome::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbCheck {
    pub db_match: bool,
    pub db_reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCheck {
    pub action: Action,
    pub action_match: bool,
    pub action_reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvAssertionCheck {
    pub env_assertion: EnvAssertion,
    pub met: bool,
    pub reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommunicateCheck {
    pub info: String,
    pub met: bool,
    pub justification: String,
}

/// 评估结果：总奖励与逐项明细（失败项逐条记录，不短路）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardInfo {
    pub reward: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_check: Option<DbCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_assertions: Option<Vec<EnvAssertionCheck>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_checks: Option<Vec<ActionCheck>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communicate_checks: Option<Vec<CommunicateCheck>>,
    #[serde(default)]
    pub reward_basis: Vec<RewardType>,
    #[serde(default)]
    pub reward_breakdown: BTreeMap<RewardType, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

impl RewardInfo {
    /// 仅带说明的奖励（无明细）
    pub fn with_note(reward: f64, note: impl Into<String>) -> Self {
        Self {
            reward,
            info: Some(serde_json::json!({ "note": note.into() })),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (self.reward - 1.0).abs() < 1e-6
    }
}

/// 单次模拟运行：完整轨迹与评估结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub start_time: String,
    pub end_time: String,
    /// 秒
    pub duration: f64,
    pub termination_reason: TerminationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_info: Option<RewardInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<Message>,
}

impl SimulationRun {
    pub fn outcome(&self) -> RunOutcome {
        match self.termination_reason {
            TerminationReason::MaxTurnsExceeded => RunOutcome::MaxTurnsExceeded,
            TerminationReason::TimedOut => RunOutcome::TimedOut,
            TerminationReason::InfraError => RunOutcome::InfraError,
            TerminationReason::TooManyErrors => RunOutcome::Failed,
            TerminationReason::UserStop | TerminationReason::AgentStop => {
                match &self.reward_info {
                    Some(info) if info.is_success() => RunOutcome::Passed,
                    _ => RunOutcome::Failed,
                }
            }
        }
    }

    pub fn reward(&self) -> f64 {
        self.reward_info.as_ref().map(|r| r.reward).unwrap_or(0.0)
    }
}

/// 运行元信息（写入结果文件，用于续跑时校验配置一致）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub domain: String,
    pub agent: String,
    pub llm_agent: String,
    pub llm_user: String,
    pub num_trials: usize,
    pub max_steps: usize,
    pub max_errors: usize,
    pub seed: Option<u64>,
    pub solo_mode: bool,
}

/// 批量运行结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Results {
    #[serde(default = "now_timestamp")]
    pub timestamp: String,
    pub info: RunInfo,
    pub tasks: Vec<Task>,
    pub simulations: Vec<SimulationRun>,
}

impl Results {
    pub fn new(info: RunInfo, tasks: Vec<Task>) -> Self {
        Self {
            timestamp: now_timestamp(),
            info,
            tasks,
            simulations: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), HarnessError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 各结果类别的计数
    pub fn outcome_counts(&self) -> BTreeMap<RunOutcome, usize> {
        let mut counts = BTreeMap::new();
        for sim in &self.simulations {
            *counts.entry(sim.outcome()).or_insert(0) += 1;
        }
        counts
    }

    pub fn average_reward(&self) -> f64 {
        if self.simulations.is_empty() {
            return 0.0;
        }
        self.simulations.iter().map(SimulationRun::reward).sum::<f64>()
            / self.simulations.len() as f64
    }
}
