//! Role scoring and duration estimates.
//!
//! `score = 10 * skill matches + 5 if preferred + weight`. The estimate is a
//! coarse heuristic for display and simulation, not a scheduling promise.

use serde::{Deserialize, Serialize};

use super::roles::RoleDescriptor;
use super::task::TaskContext;

const SKILL_POINTS: i64 = 10;
const PREFERRED_BONUS: i64 = 5;
const MIN_ESTIMATE_SECS: f64 = 10.0;
const SECS_PER_SKILL: f64 = 5.0;

/// Outcome of [`RoleArbiter::evaluate`](super::RoleArbiter::evaluate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nomination {
    pub role: Option<String>,
    pub score: i64,
    pub estimated_seconds: Option<u64>,
    /// True when the task needs network access and no role could take it.
    pub needs_network: bool,
    pub reason: String,
    /// Roles excluded because they lack network permission the task needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_blocked: Vec<String>,
}

impl Nomination {
    pub(crate) fn selected(role: &RoleDescriptor, score: i64, task: &TaskContext) -> Self {
        Self {
            role: Some(role.name.clone()),
            score,
            estimated_seconds: Some(estimate_seconds(role, task)),
            needs_network: false,
            reason: "nomination".to_string(),
            network_blocked: Vec::new(),
        }
    }

    pub(crate) fn needs_network(network_blocked: Vec<String>) -> Self {
        Self {
            role: None,
            score: 0,
            estimated_seconds: None,
            needs_network: true,
            reason: "no role allowed network or matching skills".to_string(),
            network_blocked,
        }
    }

    pub(crate) fn no_match() -> Self {
        Self {
            role: None,
            score: 0,
            estimated_seconds: None,
            needs_network: false,
            reason: "no matching role".to_string(),
            network_blocked: Vec::new(),
        }
    }
}

/// Number of the task's required skills the role has (duplicates count once).
pub fn skill_matches(role: &RoleDescriptor, task: &TaskContext) -> usize {
    let mut required: Vec<&str> = task.required_skills.iter().map(String::as_str).collect();
    required.sort_unstable();
    required.dedup();
    required
        .into_iter()
        .filter(|s| role.skills.contains(*s))
        .count()
}

/// Saturates at the `i64` bounds; `weight` comes straight from roles files.
pub fn score_role(role: &RoleDescriptor, task: &TaskContext) -> i64 {
    let matches = i64::try_from(skill_matches(role, task)).unwrap_or(i64::MAX);
    let mut score = matches.saturating_mul(SKILL_POINTS);
    if role.preferred {
        score = score.saturating_add(PREFERRED_BONUS);
    }
    score.saturating_add(role.weight)
}

/// `max(10, 5 * max(1, matches) * complexity)` seconds, truncated.
pub fn estimate_seconds(role: &RoleDescriptor, task: &TaskContext) -> u64 {
    let matches = skill_matches(role, task).max(1) as f64;
    let est = (SECS_PER_SKILL * matches * task.effective_complexity()).max(MIN_ESTIMATE_SECS);
    est as u64
}
