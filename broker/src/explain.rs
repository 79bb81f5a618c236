//! Human-auditable account of how a proposal was scored and placed.

use serde::{Deserialize, Serialize};

use crate::filter::{within_budget, within_deadline, Candidate};
use crate::model::Intent;
use crate::scorer::{latency_factor, score, GOAL_MISMATCH_PENALTY, SCORE_FORMULA};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreInputs {
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub confidence: f64,
    pub latency_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintReport {
    pub budget_max_usd: Option<f64>,
    pub sla_deadline_ms: Option<u64>,
    pub budget_ok: bool,
    pub sla_ok: bool,
    pub capability_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Explanation {
    pub formula: String,
    pub inputs: ScoreInputs,
    pub base_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_factor: Option<f64>,
    pub score: f64,
    pub constraints: ConstraintReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_headroom_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_headroom_ms: Option<i64>,
    /// 1-based position after ranking; 0 until ranked.
    #[serde(default)]
    pub rank: usize,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Explanation {
    pub fn for_candidate(candidate: &Candidate, intent: &Intent, final_score: f64) -> Self {
        let proposal = &candidate.proposal;
        let budget_max_usd = intent.budget_max_usd();
        let sla_deadline_ms = intent.deadline_ms();

        let mut notes = Vec::new();
        if proposal.est_cost_usd <= 0.0 {
            notes.push("non-positive est_cost_usd: proposal left unscored (0)".to_string());
        }
        if candidate.goal_mismatch {
            notes.push(format!(
                "goal mismatch: agent does not declare '{}'; kept because no capable agent survived filtering, score x{}",
                intent.goal, GOAL_MISMATCH_PENALTY
            ));
        }

        Self {
            formula: SCORE_FORMULA.to_string(),
            inputs: ScoreInputs {
                cost_usd: proposal.est_cost_usd,
                latency_ms: proposal.est_latency_ms,
                confidence: proposal.confidence,
                latency_factor: latency_factor(proposal),
            },
            base_score: score(proposal),
            penalty_factor: candidate.goal_mismatch.then_some(GOAL_MISMATCH_PENALTY),
            score: final_score,
            constraints: ConstraintReport {
                budget_max_usd,
                sla_deadline_ms,
                budget_ok: within_budget(proposal, intent),
                sla_ok: within_deadline(proposal, intent),
                capability_ok: !candidate.goal_mismatch,
            },
            budget_headroom_usd: budget_max_usd.map(|max_usd| max_usd - proposal.est_cost_usd),
            deadline_headroom_ms: sla_deadline_ms
                .map(|deadline| headroom_ms(deadline, proposal.est_latency_ms)),
            rank: 0,
            notes,
        }
    }
}

/// Signed gap between deadline and estimated latency, clamped to the `i64` range.
fn headroom_ms(deadline_ms: u64, latency_ms: u64) -> i64 {
    let gap = i128::from(deadline_ms) - i128::from(latency_ms);
    i64::try_from(gap).unwrap_or(if gap < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Proposal;
    use serde_json::Map;

    #[test]
    fn reports_headroom_and_constraints() {
        let intent = Intent::new("a", Map::new())
            .with_budget(0.05)
            .with_deadline(1_000);
        let candidate = Candidate::new("x", "X", Vec::new(), Proposal::new(0.01, 400, 0.7));
        let explanation = Explanation::for_candidate(&candidate, &intent, 1.0);
        assert!((explanation.budget_headroom_usd.unwrap() - 0.04).abs() < 1e-12);
        assert_eq!(explanation.deadline_headroom_ms, Some(600));
        assert!(explanation.constraints.budget_ok);
        assert!(explanation.constraints.sla_ok);
        assert!(explanation.constraints.capability_ok);
        assert!(explanation.penalty_factor.is_none());
        assert!(explanation.notes.is_empty());
    }

    #[test]
    fn mismatch_is_noted() {
        let intent = Intent::new("a", Map::new());
        let mut candidate = Candidate::new("y", "Y", vec!["b".to_string()], Proposal::new(0.01, 0, 0.5));
        candidate.goal_mismatch = true;
        let explanation = Explanation::for_candidate(&candidate, &intent, 10.0);
        assert_eq!(explanation.penalty_factor, Some(GOAL_MISMATCH_PENALTY));
        assert!(!explanation.constraints.capability_ok);
        assert!(explanation.notes[0].starts_with("goal mismatch"));
        assert!(explanation.budget_headroom_usd.is_none());
    }

    #[test]
    fn headroom_saturates_instead_of_wrapping() {
        assert_eq!(headroom_ms(u64::MAX, 0), i64::MAX);
        assert_eq!(headroom_ms(0, u64::MAX), i64::MIN);
        assert_eq!(headroom_ms(100, 400), -300);

        let intent = Intent::new("a", Map::new()).with_deadline(u64::MAX);
        let candidate = Candidate::new("x", "X", Vec::new(), Proposal::new(0.01, 1, 0.7));
        let explanation = Explanation::for_candidate(&candidate, &intent, 1.0);
        assert_eq!(explanation.deadline_headroom_ms, Some(i64::MAX));
    }
}
