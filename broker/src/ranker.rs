use std::cmp::Ordering;

use crate::filter::{self, Candidate};
use crate::model::Intent;
use crate::scorer::{score_candidate, ScoredProposal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankKey {
    Score,
    Cost,
    Latency,
    Confidence,
    AgentId,
    Identical,
}

impl RankKey {
    fn describe(self) -> &'static str {
        match self {
            RankKey::Score => "score",
            RankKey::Cost => "lower est_cost_usd",
            RankKey::Latency => "lower est_latency_ms",
            RankKey::Confidence => "higher confidence",
            RankKey::AgentId => "agent id",
            RankKey::Identical => "input order",
        }
    }
}

/// Higher score first, then cheaper, faster, more confident, then agent id.
pub fn compare(a: &ScoredProposal, b: &ScoredProposal) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.proposal.est_cost_usd.total_cmp(&b.proposal.est_cost_usd))
        .then_with(|| a.proposal.est_latency_ms.cmp(&b.proposal.est_latency_ms))
        .then_with(|| b.proposal.confidence.total_cmp(&a.proposal.confidence))
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}

fn deciding_key(a: &ScoredProposal, b: &ScoredProposal) -> RankKey {
    if a.score.total_cmp(&b.score) != Ordering::Equal {
        RankKey::Score
    } else if a
        .proposal
        .est_cost_usd
        .total_cmp(&b.proposal.est_cost_usd)
        != Ordering::Equal
    {
        RankKey::Cost
    } else if a.proposal.est_latency_ms != b.proposal.est_latency_ms {
        RankKey::Latency
    } else if a.proposal.confidence.total_cmp(&b.proposal.confidence) != Ordering::Equal {
        RankKey::Confidence
    } else if a.agent_id != b.agent_id {
        RankKey::AgentId
    } else {
        RankKey::Identical
    }
}

/// Sorts best-first and records rank plus tie-break notes in each explanation.
pub fn rank(mut proposals: Vec<ScoredProposal>) -> Vec<ScoredProposal> {
    proposals.sort_by(compare);

    for idx in 0..proposals.len() {
        proposals[idx].explanation.rank = idx + 1;
        if idx == 0 {
            continue;
        }
        let key = deciding_key(&proposals[idx - 1], &proposals[idx]);
        if key == RankKey::Score {
            continue;
        }
        let above = proposals[idx - 1].agent_id.clone();
        let below = proposals[idx].agent_id.clone();
        proposals[idx - 1].explanation.notes.push(format!(
            "tied on score with {below}; ranked ahead by {}",
            key.describe()
        ));
        proposals[idx].explanation.notes.push(format!(
            "tied on score with {above}; ranked behind by {}",
            key.describe()
        ));
    }

    proposals
}

/// Filter, score and rank a set of candidates for one intent.
pub fn evaluate(candidates: Vec<Candidate>, intent: &Intent, goal_mapped: bool) -> Vec<ScoredProposal> {
    let scored = filter::filter(candidates, intent, goal_mapped)
        .into_iter()
        .map(|candidate| score_candidate(candidate, intent))
        .collect();
    rank(scored)
}
