//! 动作评估：期望动作是否都出现在 Agent 的工具调用中
//!
//! 默认与顺序无关，按多重集合匹配（每个工具调用最多匹配一个期望动作）；
//! `ordered_actions` 为 true 时要求期望动作作为子序列按顺序出现。

use crate::data::{collect_tool_calls, Action, ActionCheck, Message, RewardInfo, RewardType, Task, ToolCall};

pub fn evaluate_actions(task: &Task, trajectory: &[Message]) -> RewardInfo {
    let Some(criteria) = &task.evaluation_criteria else {
        return RewardInfo::with_note(1.0, "No evaluation criteria");
    };
    if criteria.actions.is_empty() {
        return RewardInfo::with_note(1.0, "No actions to evaluate");
    }

    let calls = collect_tool_calls(trajectory);
    let matched = if criteria.ordered_actions {
        match_in_order(&criteria.actions, &calls)
    } else {
        match_unordered(&criteria.actions, &calls)
    };

    let action_checks: Vec<ActionCheck> = criteria
        .actions
        .iter()
        .zip(matched)
        .map(|(action, action_match)| ActionCheck {
            action: action.clone(),
            action_match,
            action_reward: if action_match { 1.0 } else { 0.0 },
        })
        .collect();
    let reward = if action_checks.iter().all(|c| c.action_match) {
        1.0
    } else {
        0.0
    };

    let mut info = RewardInfo {
        reward,
        action_checks: Some(action_checks),
        reward_basis: criteria.reward_basis.clone(),
        ..RewardInfo::default()
    };
    info.reward_breakdown.insert(RewardType::Action, reward);
    info
}

/// 贪心子序列匹配
fn match_in_order(actions: &[Action], calls: &[&ToolCall]) -> Vec<bool> {
    let mut next_call = 0;
    actions
        .iter()
        .map(|action| {
            match calls[next_call..]
                .iter()
                .position(|c| action.compare_with_tool_call(c))
            {
                Some(offset) => {
                    next_call += offset + 1;
                    true
                }
                None => false,
            }
        })
        .collect()
}

/// 二分图最大匹配（增广路）
fn match_unordered(actions: &[Action], calls: &[&ToolCall]) -> Vec<bool> {
    let edges: Vec<Vec<usize>> = actions
        .iter()
        .map(|a| {
            calls
                .iter()
                .enumerate()
                .filter(|(_, c)| a.compare_with_tool_call(c))
                .map(|(i, _)| i)
                .collect()
        })
        .collect();

    let mut call_owner: Vec<Option<usize>> = vec![None; calls.len()];
    for action in 0..actions.len() {
        let mut visited = vec![false; calls.len()];
        augment(action, &edges, &mut call_owner, &mut visited);
    }

    let mut matched = vec![false; actions.len()];
    for owner in call_owner.into_iter().flatten() {
        matched[owner] = true;
    }
    matched
}

fn augment(
    action: usize,
    edges: &[Vec<usize>],
    call_owner: &mut [Option<usize>],
    visited: &mut [bool],
) -> bool {
    for &call in &edges[action] {
        if visited[call] {
            continue;
        }
        visited[call] = true;
        let free = match call_owner[call] {
            None => true,
            Some(other) => augment(other, edges, call_owner, visited),
        };
        if free {
            call_owner[call] = Some(action);
            return true;
        }
    }
    false
}
