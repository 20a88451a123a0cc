//! 环境评估：比较最终数据库状态，并在预测环境上执行断言
//!
//! - predicted：在全新环境中回放整条轨迹中的工具调用
//! - gold：在全新环境中执行任务的期望动作
//!
//! 两边数据库哈希一致则 DB 检查通过。

use serde_json::json;

use crate::core::HarnessError;
use crate::data::{DbCheck, EnvAssertionCheck, Message, RewardInfo, RewardType, Task};
use crate::environment::Environment;
use crate::evaluator::EnvironmentConstructor;

pub fn evaluate_environment(
    env_constructor: &EnvironmentConstructor,
    task: &Task,
    trajectory: &[Message],
    solo_mode: bool,
) -> Result<RewardInfo, HarnessError> {
    let Some(criteria) = &task.evaluation_criteria else {
        return Ok(RewardInfo::with_note(1.0, "No evaluation criteria"));
    };
    if criteria.actions.is_empty() && criteria.env_assertions.is_empty() {
        let mut info = RewardInfo::with_note(1.0, "No expected actions or env assertions");
        info.db_check = Some(DbCheck {
            db_match: true,
            db_reward: 1.0,
        });
        for reward_type in criteria.reward_basis_set() {
            if matches!(reward_type, RewardType::Db | RewardType::EnvAssertion) {
                info.reward_breakdown.insert(reward_type, 1.0);
            }
        }
        info.reward_basis = criteria.reward_basis.clone();
        return Ok(info);
    }

    let (init_data, init_actions) = match &task.initial_state {
        Some(state) => (
            state.initialization_data.as_ref(),
            state.initialization_actions.as_slice(),
        ),
        None => (None, &[][..]),
    };

    let mut predicted = env_constructor(solo_mode)?;
    if let Err(e) = predicted.set_state(init_data, init_actions, trajectory) {
        return match e {
            HarnessError::Environment(msg) => Ok(RewardInfo::with_note(
                0.0,
                format!("Trajectory could not be replayed: {msg}"),
            )),
            other => Err(other),
        };
    }

    let mut gold = env_constructor(solo_mode)?;
    gold.set_state(init_data, init_actions, task.message_history())?;
    for action in &criteria.actions {
        if let Err(e) = gold.use_tool(&action.name, &action.arguments) {
            tracing::warn!(task_id = %task.id, action = %action.name, error = %e, "Gold action failed");
        }
    }

    let db_match = same_db(&gold, &predicted)?;
    let db_reward = if db_match { 1.0 } else { 0.0 };

    let mut env_assertion_reward = 1.0;
    let mut env_assertions = Vec::with_capacity(criteria.env_assertions.len());
    for assertion in &criteria.env_assertions {
        let met = match predicted.run_env_assertion(assertion) {
            Ok(met) => met,
            Err(e) => {
                tracing::warn!(task_id = %task.id, assertion = %assertion.func_name, error = %e, "Env assertion failed to run");
                false
            }
        };
        let reward = if met { 1.0 } else { 0.0 };
        env_assertion_reward *= reward;
        env_assertions.push(EnvAssertionCheck {
            env_assertion: assertion.clone(),
            met,
            reward,
        });
    }

    let basis = criteria.reward_basis_set();
    let mut reward = 1.0;
    let mut info = RewardInfo::default();
    if basis.contains(&RewardType::Db) {
        info.reward_breakdown.insert(RewardType::Db, db_reward);
        reward *= db_reward;
    }
    if basis.contains(&RewardType::EnvAssertion) {
        info.reward_breakdown
            .insert(RewardType::EnvAssertion, env_assertion_reward);
        reward *= env_assertion_reward;
    }
    info.reward = reward;
    info.db_check = Some(DbCheck {
        db_match,
        db_reward,
    });
    info.env_assertions = Some(env_assertions);
    info.reward_basis = criteria.reward_basis.clone();
    if !db_match {
        info.info = Some(json!({ "note": "Final database differs from the expected one" }));
    }
    Ok(info)
}

fn same_db(gold: &Environment, predicted: &Environment) -> Result<bool, HarnessError> {
    Ok(gold.db_hash()? == predicted.db_hash()? && gold.user_db_hash()? == predicted.user_db_hash()?)
}
