use serde::{Deserialize, Serialize};

use crate::explain::Explanation;
use crate::filter::Candidate;
use crate::model::{Intent, Proposal};

/// Latency at which the effective cost of a proposal doubles.
pub const LATENCY_DAMPENING_MS: f64 = 5_000.0;
/// Multiplier applied to agents kept only through capability fallback.
pub const GOAL_MISMATCH_PENALTY: f64 = 0.2;
pub const SCORE_FORMULA: &str = "confidence / (est_cost_usd * (1 + est_latency_ms / 5000))";

pub fn latency_factor(proposal: &Proposal) -> f64 {
    1.0 + proposal.est_latency_ms as f64 / LATENCY_DAMPENING_MS
}

/// Desirability of a proposal. Free or negative-cost bids are unscored (0).
pub fn score(proposal: &Proposal) -> f64 {
    if proposal.est_cost_usd <= 0.0 {
        return 0.0;
    }
    proposal.confidence / (proposal.est_cost_usd * latency_factor(proposal))
}

pub fn effective_score(proposal: &Proposal, goal_mismatch: bool) -> f64 {
    let base = score(proposal);
    if goal_mismatch {
        base * GOAL_MISMATCH_PENALTY
    } else {
        base
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredProposal {
    #[serde(rename = "_agent")]
    pub agent_id: String,
    #[serde(rename = "_agent_name")]
    pub agent_name: String,
    #[serde(rename = "_score")]
    pub score: f64,
    #[serde(rename = "_goal_mismatch", default)]
    pub goal_mismatch: bool,
    #[serde(flatten)]
    pub proposal: Proposal,
    pub explanation: Explanation,
}

pub fn score_candidate(candidate: Candidate, intent: &Intent) -> ScoredProposal {
    let score = effective_score(&candidate.proposal, candidate.goal_mismatch);
    let explanation = Explanation::for_candidate(&candidate, intent, score);
    ScoredProposal {
        agent_id: candidate.agent_id,
        agent_name: candidate.agent_name,
        score,
        goal_mismatch: candidate.goal_mismatch,
        proposal: candidate.proposal,
        explanation,
    }
}
