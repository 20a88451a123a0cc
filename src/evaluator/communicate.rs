//! 沟通评估：要求告知用户的信息是否出现在 Agent 的文本回复中（忽略大小写与逗号）

use crate::data::{CommunicateCheck, Message, RewardInfo, RewardType, Task};

pub fn evaluate_communicate(task: &Task, trajectory: &[Message]) -> RewardInfo {
    let Some(criteria) = &task.evaluation_criteria else {
        return RewardInfo::with_note(1.0, "No evaluation criteria");
    };
    if criteria.communicate_info.is_empty() {
        let mut info = RewardInfo::with_note(1.0, "No communicate_info to evaluate");
        info.reward_breakdown.insert(RewardType::Communicate, 1.0);
        return info;
    }

    let replies: Vec<String> = trajectory
        .iter()
        .filter_map(Message::as_assistant)
        .filter(|m| m.has_text_content())
        .filter_map(|m| m.content.as_deref())
        .map(normalize)
        .collect();

    let checks: Vec<CommunicateCheck> = criteria
        .communicate_info
        .iter()
        .map(|info| {
            let needle = normalize(info);
            let met = replies.iter().any(|r| r.contains(&needle));
            CommunicateCheck {
                info: info.clone(),
                met,
                justification: if met {
                    "Information communicated to the user".to_string()
                } else {
                    "Information not communicated to the user".to_string()
                },
            }
        })
        .collect();
    let reward = if checks.iter().all(|c| c.met) { 1.0 } else { 0.0 };

    let mut info = RewardInfo {
        reward,
        communicate_checks: Some(checks),
        reward_basis: criteria.reward_basis.clone(),
        ..RewardInfo::default()
    };
    info.reward_breakdown.insert(RewardType::Communicate, reward);
    info
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(',', "")
}
