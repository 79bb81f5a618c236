use std::collections::BTreeSet;

use tracing::debug;

use crate::model::{Intent, Proposal};

/// A live proposal tagged with the agent that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub agent_id: String,
    pub agent_name: String,
    pub capabilities: BTreeSet<String>,
    pub proposal: Proposal,
    /// Set by [`filter`] when the agent survives only through capability fallback.
    pub goal_mismatch: bool,
}

impl Candidate {
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
        proposal: Proposal,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            capabilities: capabilities.into_iter().collect(),
            proposal,
            goal_mismatch: false,
        }
    }

    pub fn is_capable_of(&self, goal: &str) -> bool {
        self.capabilities.contains(goal)
    }
}

pub fn within_budget(proposal: &Proposal, intent: &Intent) -> bool {
    intent
        .budget_max_usd()
        .map_or(true, |max_usd| proposal.est_cost_usd <= max_usd)
}

pub fn within_deadline(proposal: &Proposal, intent: &Intent) -> bool {
    intent
        .deadline_ms()
        .map_or(true, |deadline| proposal.est_latency_ms <= deadline)
}

/// Drops proposals over budget or past the deadline, then applies capability fit.
///
/// `goal_mapped` states whether any known agent declares `intent.goal`. When it
/// does and at least one surviving proposal comes from a capable agent, every
/// other proposal is dropped. When none does, all survivors are kept and marked
/// as goal mismatches. An unmapped goal imposes no capability filtering.
pub fn filter(candidates: Vec<Candidate>, intent: &Intent, goal_mapped: bool) -> Vec<Candidate> {
    let mut survivors: Vec<Candidate> = candidates
        .into_iter()
        .filter(|candidate| {
            if !within_budget(&candidate.proposal, intent) {
                debug!(
                    agent = %candidate.agent_id,
                    cost = candidate.proposal.est_cost_usd,
                    "proposal exceeds budget"
                );
                return false;
            }
            if !within_deadline(&candidate.proposal, intent) {
                debug!(
                    agent = %candidate.agent_id,
                    latency_ms = candidate.proposal.est_latency_ms,
                    "proposal misses deadline"
                );
                return false;
            }
            true
        })
        .collect();

    if !goal_mapped {
        for candidate in &mut survivors {
            candidate.goal_mismatch = false;
        }
        return survivors;
    }

    let any_capable = survivors
        .iter()
        .any(|candidate| candidate.is_capable_of(&intent.goal));
    if any_capable {
        survivors.retain(|candidate| candidate.is_capable_of(&intent.goal));
        for candidate in &mut survivors {
            candidate.goal_mismatch = false;
        }
    } else {
        for candidate in &mut survivors {
            candidate.goal_mismatch = true;
        }
    }
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn candidate(id: &str, caps: &[&str], cost: f64, latency: u64) -> Candidate {
        Candidate::new(
            id,
            id,
            caps.iter().map(|cap| cap.to_string()),
            Proposal::new(cost, latency, 0.8),
        )
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.agent_id.as_str()).collect()
    }

    #[test]
    fn drops_proposals_over_budget() {
        let intent = Intent::new("a", Map::new()).with_budget(0.02);
        let kept = filter(
            vec![candidate("x", &[], 0.01, 100), candidate("y", &[], 0.05, 100)],
            &intent,
            false,
        );
        assert_eq!(ids(&kept), vec!["x"]);
    }

    #[test]
    fn budget_ceiling_is_inclusive() {
        let intent = Intent::new("a", Map::new()).with_budget(0.02);
        let kept = filter(vec![candidate("x", &[], 0.02, 100)], &intent, false);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn drops_proposals_past_deadline() {
        let intent = Intent::new("a", Map::new()).with_deadline(1_000);
        let kept = filter(
            vec![
                candidate("x", &[], 0.01, 1_000),
                candidate("y", &[], 0.01, 1_001),
            ],
            &intent,
            false,
        );
        assert_eq!(ids(&kept), vec!["x"]);
    }

    #[test]
    fn capable_agents_win_over_others() {
        let intent = Intent::new("a", Map::new());
        let kept = filter(
            vec![candidate("x", &["a"], 0.01, 100), candidate("y", &["b"], 0.01, 100)],
            &intent,
            true,
        );
        assert_eq!(ids(&kept), vec!["x"]);
        assert!(!kept[0].goal_mismatch);
    }

    #[test]
    fn unmapped_goal_keeps_everyone() {
        let intent = Intent::new("c", Map::new());
        let kept = filter(
            vec![candidate("x", &["a"], 0.01, 100), candidate("y", &["b"], 0.01, 100)],
            &intent,
            false,
        );
        assert_eq!(ids(&kept), vec!["x", "y"]);
        assert!(kept.iter().all(|c| !c.goal_mismatch));
    }

    #[test]
    fn falls_back_to_mismatched_agents_when_no_capable_one_survives() {
        let intent = Intent::new("a", Map::new()).with_budget(0.02);
        let kept = filter(
            vec![candidate("x", &["a"], 0.05, 100), candidate("y", &["b"], 0.01, 100)],
            &intent,
            true,
        );
        assert_eq!(ids(&kept), vec!["y"]);
        assert!(kept[0].goal_mismatch);
    }

    #[test]
    fn filtering_is_idempotent() {
        let intent = Intent::new("a", Map::new()).with_budget(0.03).with_deadline(900);
        let input = vec![
            candidate("x", &["a"], 0.01, 100),
            candidate("y", &["b"], 0.01, 100),
            candidate("z", &["a"], 0.05, 100),
            candidate("w", &["a"], 0.01, 1_000),
        ];
        let once = filter(input, &intent, true);
        let twice = filter(once.clone(), &intent, true);
        assert_eq!(once, twice);

        let degraded = filter(vec![candidate("y", &["b"], 0.01, 100)], &intent, true);
        assert_eq!(filter(degraded.clone(), &intent, true), degraded);
    }
}
