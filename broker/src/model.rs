use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{BrokerError, Result};

pub const DEFAULT_SLA_MS: u64 = 120_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Budget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Sla {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// A caller's request for work, independent of which agent ends up doing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub goal: String,
    pub inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<Sla>,
}

impl Intent {
    pub fn new(goal: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            goal: goal.into(),
            inputs,
            constraints: None,
            budget: None,
            sla: None,
        }
    }

    pub fn with_budget(mut self, max_usd: f64) -> Self {
        self.budget = Some(Budget {
            max_usd: Some(max_usd),
        });
        self
    }

    pub fn with_deadline(mut self, deadline_ms: u64) -> Self {
        self.sla = Some(Sla {
            deadline_ms: Some(deadline_ms),
        });
        self
    }

    pub fn budget_max_usd(&self) -> Option<f64> {
        self.budget.as_ref().and_then(|budget| budget.max_usd)
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.sla.as_ref().and_then(|sla| sla.deadline_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.goal.trim().is_empty() {
            return Err(BrokerError::InvalidIntent(
                "goal must not be empty".to_string(),
            ));
        }
        if let Some(max_usd) = self.budget_max_usd() {
            if !max_usd.is_finite() || max_usd < 0.0 {
                return Err(BrokerError::InvalidIntent(format!(
                    "budget.max_usd must be a non-negative number, got {max_usd}"
                )));
            }
        }
        Ok(())
    }
}

/// An agent's bid for handling an intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub est_cost_usd: f64,
    pub est_latency_ms: u64,
    pub confidence: f64,
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub needs: Map<String, Value>,
}

impl Proposal {
    pub fn new(est_cost_usd: f64, est_latency_ms: u64, confidence: f64) -> Self {
        Self {
            est_cost_usd,
            est_latency_ms,
            confidence,
            plan: Vec::new(),
            needs: Map::new(),
        }
    }

    pub fn with_plan(mut self, plan: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.plan = plan.into_iter().map(Into::into).collect();
        self
    }

    /// Rejects payloads the scorer cannot order (NaN, negative cost, confidence outside [0,1]).
    pub fn validate(&self) -> Result<()> {
        if !self.est_cost_usd.is_finite() || self.est_cost_usd < 0.0 {
            return Err(BrokerError::MalformedResponse(format!(
                "est_cost_usd must be a non-negative number, got {}",
                self.est_cost_usd
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(BrokerError::MalformedResponse(format!(
                "confidence must lie in [0, 1], got {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Execution-time counterpart of an [`Intent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub goal: String,
    pub inputs: Map<String, Value>,
    pub sla_ms: u64,
}

impl Task {
    pub fn from_intent(intent: &Intent, default_sla_ms: u64) -> Self {
        Self {
            goal: intent.goal.clone(),
            inputs: intent.inputs.clone(),
            sla_ms: intent.deadline_ms().unwrap_or(default_sla_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultStatus {
    Ok,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResultMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What an agent hands back after executing a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metrics: ResultMetrics,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn ok(data: Map<String, Value>) -> Self {
        Self {
            status: ResultStatus::Ok,
            data,
            metrics: ResultMetrics::default(),
            evidence: Evidence::default(),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            data: Map::new(),
            metrics: ResultMetrics::default(),
            evidence: Evidence::default(),
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, ResultStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intent_accepts_minimal_payload() {
        let intent: Intent =
            serde_json::from_value(json!({ "goal": "extract_event", "inputs": {} })).unwrap();
        assert!(intent.validate().is_ok());
        assert_eq!(intent.budget_max_usd(), None);
        assert_eq!(intent.deadline_ms(), None);
    }

    #[test]
    fn intent_requires_inputs() {
        let parsed = serde_json::from_value::<Intent>(json!({ "goal": "extract_event" }));
        assert!(parsed.is_err());
    }

    #[test]
    fn blank_goal_is_rejected() {
        let intent = Intent::new("  ", Map::new());
        let err = intent.validate().unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn negative_budget_is_rejected() {
        let intent = Intent::new("a", Map::new()).with_budget(-1.0);
        assert!(matches!(
            intent.validate(),
            Err(BrokerError::InvalidIntent(_))
        ));
    }

    #[test]
    fn task_falls_back_to_default_sla() {
        let intent = Intent::new("a", Map::new());
        assert_eq!(Task::from_intent(&intent, DEFAULT_SLA_MS).sla_ms, 120_000);
        let intent = intent.with_deadline(5_000);
        assert_eq!(Task::from_intent(&intent, DEFAULT_SLA_MS).sla_ms, 5_000);
    }

    #[test]
    fn proposal_validation_rejects_out_of_range_confidence() {
        assert!(Proposal::new(0.01, 100, 1.2).validate().is_err());
        assert!(Proposal::new(-0.01, 100, 0.5).validate().is_err());
        assert!(Proposal::new(f64::NAN, 100, 0.5).validate().is_err());
        assert!(Proposal::new(0.0, 0, 0.0).validate().is_ok());
    }

    #[test]
    fn result_parses_agent_payload() {
        let result: TaskResult = serde_json::from_value(json!({
            "status": "PARTIAL",
            "data": { "title": "Hackathon" },
            "metrics": { "latency_ms": 12, "cost_usd": 0.01, "tokens": 40 },
            "evidence": { "artifacts": [{ "type": "ocr.txt", "hash": "abc" }], "root": "def" }
        }))
        .unwrap();
        assert_eq!(result.status, ResultStatus::Partial);
        assert!(result.is_success());
        assert_eq!(result.metrics.latency_ms, Some(12));
        assert_eq!(result.metrics.extra.get("tokens"), Some(&json!(40)));
        assert_eq!(result.evidence.artifacts[0].kind, "ocr.txt");
        assert_eq!(result.evidence.root.as_deref(), Some("def"));
    }
}
