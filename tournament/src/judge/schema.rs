//! Structured judge response shapes, one per prompt kind.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::{lenient_optional_score, Criterion, CriterionScore, ScoreScale};
use crate::prompts::PromptKind;

/// A response type the judge can be asked for.
pub trait JudgeResponse: DeserializeOwned + JsonSchema + Send + 'static {
    /// Prompt kind whose template, model and timeout are used
    const KIND: PromptKind;

    /// Semantic checks beyond deserialization.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// JSON schema of `R`, embedded in the repair prompt.
pub fn schema_text<R: JudgeResponse>() -> String {
    let schema = schemars::schema_for!(R);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

fn check_finite(label: &str, value: f64) -> Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("{label} is not a finite number"))
    }
}

/// Match evaluation reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchEvaluation {
    /// Scores per criterion name
    pub criteria_scores: BTreeMap<String, CriterionScore>,
    #[serde(default, deserialize_with = "lenient_optional_score")]
    pub contender1_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_optional_score")]
    pub contender2_score: Option<f64>,
    /// Winning contender id, null for a tie
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

impl JudgeResponse for MatchEvaluation {
    const KIND: PromptKind = PromptKind::MatchEvaluation;

    fn check(&self) -> Result<(), String> {
        for (name, score) in &self.criteria_scores {
            check_finite(&format!("{name}.contender1"), score.contender1)?;
            check_finite(&format!("{name}.contender2"), score.contender2)?;
        }
        Ok(())
    }
}

impl MatchEvaluation {
    /// Every framework criterion must be scored.
    pub fn check_against(&self, criteria: &[Criterion]) -> Result<(), String> {
        let missing: Vec<&str> = criteria
            .iter()
            .filter(|c| !self.criteria_scores.contains_key(&c.name))
            .map(|c| c.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("criteria_scores is missing: {}", missing.join(", ")))
        }
    }

    /// Clamp out-of-scale criterion scores, returning one note per change.
    pub fn clamp_to(&mut self, scale: ScoreScale) -> Vec<String> {
        let mut notes = Vec::new();
        for (name, score) in self.criteria_scores.iter_mut() {
            for (side, value) in [
                ("contender1", &mut score.contender1),
                ("contender2", &mut score.contender2),
            ] {
                if !scale.contains(*value) {
                    let clamped = scale.clamp(*value);
                    notes.push(format!("{name}.{side} {value} -> {clamped}"));
                    *value = clamped;
                }
            }
        }
        notes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CriterionComparison {
    pub criterion: String,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

/// Contender comparison reply (per-criterion verdicts, no scores).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonResponse {
    pub comparisons: Vec<CriterionComparison>,
    #[serde(default)]
    pub overall_winner: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

impl JudgeResponse for ComparisonResponse {
    const KIND: PromptKind = PromptKind::ContenderComparison;
}

/// Scoring reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoringResponse {
    pub scores: BTreeMap<String, CriterionScore>,
    #[serde(default)]
    pub overall_scores: Option<CriterionScore>,
    #[serde(default)]
    pub winner: Option<String>,
}

impl JudgeResponse for ScoringResponse {
    const KIND: PromptKind = PromptKind::Scoring;

    fn check(&self) -> Result<(), String> {
        for (name, score) in &self.scores {
            check_finite(&format!("{name}.contender1"), score.contender1)?;
            check_finite(&format!("{name}.contender2"), score.contender2)?;
        }
        Ok(())
    }
}

/// Validation/repair reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,
    /// The original response corrected into the expected shape
    #[serde(default)]
    pub corrected_response: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JudgeResponse for ValidationResponse {
    const KIND: PromptKind = PromptKind::Validation;
}
