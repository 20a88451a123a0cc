//! 评估器：对完成的轨迹打分
//!
//! 纯比较逻辑（不调用 LLM），同一轨迹多次评估结果相同。每项检查都单独记录，不短路。

pub mod action;
pub mod communicate;
pub mod environment;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::HarnessError;
use crate::data::{RewardInfo, RewardType, SimulationRun, Task};
use crate::environment::Environment;

pub use action::evaluate_actions;
pub use communicate::evaluate_communicate;
pub use environment::evaluate_environment;

/// 按 solo 标志新建一个全新环境
pub type EnvironmentConstructor = dyn Fn(bool) -> Result<Environment, HarnessError> + Send + Sync;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationType {
    Env,
    Action,
    Communicate,
    #[default]
    All,
}

impl FromStr for EvaluationType {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "env" => Ok(EvaluationType::Env),
            "action" => Ok(EvaluationType::Action),
            "communicate" => Ok(EvaluationType::Communicate),
            "all" => Ok(EvaluationType::All),
            other => Err(HarnessError::Config(format!(
                "unknown evaluation type: {other}"
            ))),
        }
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvaluationType::Env => "env",
            EvaluationType::Action => "action",
            EvaluationType::Communicate => "communicate",
            EvaluationType::All => "all",
        };
        f.write_str(s)
    }
}

/// 评估一次模拟运行
///
/// 提前终止的运行奖励为 0；没有评估条件的任务奖励为 1。
/// `All` 时奖励为任务 reward_basis 涉及的各项奖励之积。
pub fn evaluate_simulation(
    simulation: &SimulationRun,
    task: &Task,
    evaluation_type: EvaluationType,
    solo_mode: bool,
    env_constructor: &EnvironmentConstructor,
) -> Result<RewardInfo, HarnessError> {
    if simulation.termination_reason.is_premature() {
        return Ok(RewardInfo::with_note(
            0.0,
            format!(
                "Simulation terminated prematurely. Termination reason: {}",
                simulation.termination_reason
            ),
        ));
    }
    let Some(criteria) = &task.evaluation_criteria else {
        return Ok(RewardInfo::with_note(1.0, "No evaluation criteria"));
    };
    let trajectory = &simulation.messages;

    let reward_info = match evaluation_type {
        EvaluationType::Env => evaluate_environment(env_constructor, task, trajectory, solo_mode)?,
        EvaluationType::Action => evaluate_actions(task, trajectory),
        EvaluationType::Communicate => evaluate_communicate(task, trajectory),
        EvaluationType::All => {
            let env_info = evaluate_environment(env_constructor, task, trajectory, solo_mode)?;
            let action_info = evaluate_actions(task, trajectory);
            let communicate_info = evaluate_communicate(task, trajectory);

            let basis = criteria.reward_basis_set();
            let mut reward = 1.0;
            let mut reward_breakdown = BTreeMap::new();
            let mut combine = |types: &[RewardType], sub: &RewardInfo| {
                if types.iter().any(|t| basis.contains(t)) {
                    extend_breakdown(&mut reward_breakdown, sub);
                    reward *= sub.reward;
                }
            };
            combine(&[RewardType::Db, RewardType::EnvAssertion], &env_info);
            combine(&[RewardType::Action], &action_info);
            combine(&[RewardType::Communicate], &communicate_info);

            RewardInfo {
                reward,
                db_check: env_info.db_check,
                env_assertions: env_info.env_assertions,
                action_checks: action_info.action_checks,
                communicate_checks: communicate_info.communicate_checks,
                reward_basis: criteria.reward_basis.clone(),
                reward_breakdown,
                info: Some(json!({
                    "env": env_info.info,
                    "action": action_info.info,
                    "communicate": communicate_info.info,
                })),
            }
        }
    };
    Ok(reward_info)
}

fn extend_breakdown(target: &mut BTreeMap<RewardType, f64>, sub: &RewardInfo) {
    target.extend(sub.reward_breakdown.iter().map(|(k, v)| (*k, *v)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        now_timestamp, AssistantMessage, EvaluationCriteria, Message, TerminationReason, ToolCall,
        ToolMessage,
    };
    use crate::domains::mock;
    use serde_json::json;

    fn task(id: &str) -> Task {
        mock::get_tasks()
            .unwrap()
            .into_iter()
            .find(|t| t.id == id)
            .unwrap()
    }

    fn constructor() -> Box<EnvironmentConstructor> {
        Box::new(|solo: bool| mock::get_environment(None, solo))
    }

    /// 在真实环境中执行调用，得到与运行时一致的工具结果
    fn simulation(calls: Vec<ToolCall>, reason: TerminationReason) -> SimulationRun {
        let mut env = mock::get_environment(None, false).unwrap();
        let mut messages = vec![Message::assistant("Hi! How can I help you today?")];
        for call in calls {
            let response = env.get_response(&call);
            messages.push(AssistantMessage::tool_calls(vec![call]).into());
            messages.push(Message::Tool(response));
        }
        messages.push(Message::assistant("Done."));
        SimulationRun {
            id: "sim".into(),
            task_id: "t".into(),
            trial: None,
            seed: None,
            start_time: now_timestamp(),
            end_time: now_timestamp(),
            duration: 0.0,
            termination_reason: reason,
            reward_info: None,
            error: None,
            messages,
        }
    }

    #[test]
    fn test_create_task_passes() {
        let sim = simulation(
            vec![ToolCall::new(
                "c1",
                "create_task",
                json!({"user_id": "user_1", "title": "Important Meeting"}),
            )],
            TerminationReason::UserStop,
        );
        let info = evaluate_simulation(
            &sim,
            &task("create_task_1"),
            EvaluationType::All,
            false,
            constructor().as_ref(),
        )
        .unwrap();
        assert_eq!(info.reward, 1.0);
        assert!(info.env_assertions.unwrap().iter().all(|c| c.met));
        assert_eq!(info.reward_breakdown[&RewardType::EnvAssertion], 1.0);
        assert!(info.action_checks.unwrap()[0].action_match);
    }

    #[test]
    fn test_nonexistent_task_update_fails() {
        let sim = simulation(
            vec![ToolCall::new(
                "c1",
                "update_task_status",
                json!({"task_id": "nonexistent", "status": "completed"}),
            )],
            TerminationReason::UserStop,
        );
        assert!(matches!(&sim.messages[2], Message::Tool(t) if t.error));

        let info = evaluate_simulation(
            &sim,
            &task("update_task_status_1"),
            EvaluationType::All,
            false,
            constructor().as_ref(),
        )
        .unwrap();
        assert_eq!(info.reward, 0.0);
        assert!(!info.db_check.as_ref().unwrap().db_match);
        assert!(!info.env_assertions.as_ref().unwrap()[0].met);
        assert!(!info.is_success());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let sim = simulation(
            vec![ToolCall::new(
                "c1",
                "update_task_status",
                json!({"task_id": "task_1", "status": "completed"}),
            )],
            TerminationReason::UserStop,
        );
        let t = task("update_task_status_1");
        let ctor = constructor();
        let first = evaluate_simulation(&sim, &t, EvaluationType::All, false, ctor.as_ref()).unwrap();
        let second = evaluate_simulation(&sim, &t, EvaluationType::All, false, ctor.as_ref()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.reward, 1.0);
    }

    #[test]
    fn test_premature_termination_scores_zero() {
        let sim = simulation(vec![], TerminationReason::MaxTurnsExceeded);
        let info = evaluate_simulation(
            &sim,
            &task("create_task_1"),
            EvaluationType::All,
            false,
            constructor().as_ref(),
        )
        .unwrap();
        assert_eq!(info.reward, 0.0);
        assert!(info.info.unwrap()["note"]
            .as_str()
            .unwrap()
            .contains("max_turns_exceeded"));
    }

    #[test]
    fn test_tampered_trajectory_scores_zero() {
        let mut sim = simulation(
            vec![ToolCall::new("c1", "get_users", json!({}))],
            TerminationReason::AgentStop,
        );
        sim.messages[2] = ToolMessage::ok("c1", "[]").into();
        let info = evaluate_simulation(
            &sim,
            &task("update_task_status_1"),
            EvaluationType::Env,
            false,
            constructor().as_ref(),
        )
        .unwrap();
        assert_eq!(info.reward, 0.0);
    }

    #[test]
    fn test_no_criteria_scores_one() {
        let mut t = task("create_task_1");
        t.evaluation_criteria = None;
        let sim = simulation(vec![], TerminationReason::UserStop);
        let info =
            evaluate_simulation(&sim, &t, EvaluationType::All, false, constructor().as_ref()).unwrap();
        assert_eq!(info.reward, 1.0);
    }

    #[test]
    fn test_communicate_only_task_keeps_db_in_breakdown() {
        let mut t = task("create_task_1");
        t.evaluation_criteria = Some(EvaluationCriteria {
            communicate_info: vec!["Done".into()],
            reward_basis: vec![RewardType::Db, RewardType::Communicate],
            ..EvaluationCriteria::default()
        });
        let sim = simulation(vec![], TerminationReason::UserStop);
        let info =
            evaluate_simulation(&sim, &t, EvaluationType::All, false, constructor().as_ref()).unwrap();
        assert_eq!(info.reward, 1.0);
        assert_eq!(info.reward_breakdown.get(&RewardType::Db), Some(&1.0));
        assert_eq!(info.reward_breakdown.get(&RewardType::Communicate), Some(&1.0));

        let env_only = evaluate_environment(constructor().as_ref(), &t, &sim.messages, false).unwrap();
        assert_eq!(env_only.reward_basis, vec![RewardType::Db, RewardType::Communicate]);
        assert!(!env_only.reward_breakdown.contains_key(&RewardType::Communicate));
    }

    #[test]
    fn test_evaluation_type_parsing() {
        assert_eq!("ENV".parse::<EvaluationType>().unwrap(), EvaluationType::Env);
        assert_eq!(EvaluationType::default().to_string(), "all");
        assert!("nl_assertions".parse::<EvaluationType>().is_err());
    }
}
