//! Core tournament data model
//!
//! Contenders and the assessment framework are loaded once and stay
//! immutable for the whole run. Matchups come out of the scheduler, match
//! results are append-only and carry the scheduling `sequence` so the match
//! log can be restored to scheduling order after concurrent execution.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, TournamentError, TournamentResult};

/// Allowed deviation of the criteria weight sum from 1.0
pub const WEIGHT_TOLERANCE: f64 = 1e-3;

/// A text candidate entered into the tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contender {
    /// Unique identifier
    pub id: String,
    /// The text being judged
    pub content: String,
    /// Opaque key-value metadata carried through to the output document
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Contender {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Input document: `{contenders: [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContendersDocument {
    pub contenders: Vec<Contender>,
}

/// One weighted evaluation criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub description: String,
    pub weight: f64,
}

/// Inclusive numeric range the judge scores on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 10.0,
        }
    }
}

impl ScoreScale {
    /// Whether a score lies inside the scale.
    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }

    /// Clamp a score into the scale.
    pub fn clamp(&self, score: f64) -> f64 {
        score.clamp(self.min, self.max)
    }
}

/// Named band inside the scale (e.g. "Excellent": 8..10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCategory {
    pub name: String,
    pub range: [f64; 2],
}

/// How the judge is asked to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringSystem {
    #[serde(rename = "type", default = "default_scoring_type")]
    pub kind: String,
    #[serde(default)]
    pub scale: ScoreScale,
    #[serde(default)]
    pub categories: Vec<ScoreCategory>,
}

fn default_scoring_type() -> String {
    "points".to_string()
}

impl Default for ScoringSystem {
    fn default() -> Self {
        Self {
            kind: default_scoring_type(),
            scale: ScoreScale::default(),
            categories: Vec::new(),
        }
    }
}

/// The weighted rubric every match is judged against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentFramework {
    pub id: String,
    pub description: String,
    #[serde(rename = "evaluation_criteria")]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub comparison_rules: Vec<String>,
    #[serde(default)]
    pub scoring_system: ScoringSystem,
}

/// Input document: `{assessment_framework: {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkDocument {
    pub assessment_framework: AssessmentFramework,
}

impl AssessmentFramework {
    /// Reject frameworks that cannot produce meaningful weighted totals.
    pub fn validate(&self) -> TournamentResult<()> {
        if self.criteria.is_empty() {
            return Err(TournamentError::config(format!(
                "framework '{}' has no evaluation criteria",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if criterion.name.trim().is_empty() {
                return Err(TournamentError::config("criterion with empty name"));
            }
            if !seen.insert(criterion.name.as_str()) {
                return Err(TournamentError::config(format!(
                    "duplicate criterion name '{}'",
                    criterion.name
                )));
            }
            if !criterion.weight.is_finite() || criterion.weight < 0.0 {
                return Err(TournamentError::config(format!(
                    "criterion '{}' has invalid weight {}",
                    criterion.name, criterion.weight
                )));
            }
        }

        let total = self.total_weight();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(TournamentError::config(format!(
                "criteria weights must sum to 1.0, got {total:.4}"
            )));
        }

        let scale = self.scoring_system.scale;
        if !(scale.min.is_finite() && scale.max.is_finite() && scale.min < scale.max) {
            return Err(TournamentError::config(format!(
                "invalid score scale {}..{}",
                scale.min, scale.max
            )));
        }

        Ok(())
    }

    /// Sum of all criterion weights.
    pub fn total_weight(&self) -> f64 {
        self.criteria.iter().map(|c| c.weight).sum()
    }

    pub fn scale(&self) -> ScoreScale {
        self.scoring_system.scale
    }

    /// Criteria block embedded in prompts.
    pub fn formatted_criteria(&self) -> String {
        let mut text = String::from("# Evaluation Criteria\n\n");
        for criterion in &self.criteria {
            text.push_str(&format!(
                "## {} (Weight: {:.2})\n{}\n\n",
                criterion.name, criterion.weight, criterion.description
            ));
        }
        text
    }

    /// Numbered comparison rules embedded in prompts.
    pub fn formatted_rules(&self) -> String {
        let mut text = String::from("# Comparison Rules\n\n");
        for (i, rule) in self.comparison_rules.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, rule));
        }
        text
    }

    /// Scoring system description embedded in prompts.
    pub fn formatted_scoring(&self) -> String {
        let system = &self.scoring_system;
        let mut text = String::from("# Scoring System\n\n");
        text.push_str(&format!("Type: {}\n", system.kind));
        text.push_str(&format!(
            "Scale: {} to {}\n\n",
            system.scale.min, system.scale.max
        ));
        if !system.categories.is_empty() {
            text.push_str("Categories:\n");
            for category in &system.categories {
                text.push_str(&format!(
                    "- {}: {} to {}\n",
                    category.name, category.range[0], category.range[1]
                ));
            }
        }
        text
    }
}

/// Which side of a pairing is listed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "fwd"),
            Self::Reverse => write!(f, "rev"),
        }
    }
}

/// One scheduled pairing for one round in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Matchup {
    /// Position in the schedule; unique within a tournament
    pub sequence: usize,
    pub contender1_id: String,
    pub contender2_id: String,
    pub round_index: u32,
    pub direction: Direction,
}

impl Matchup {
    /// Whether the contender takes part in this matchup.
    pub fn involves(&self, contender_id: &str) -> bool {
        self.contender1_id == contender_id || self.contender2_id == contender_id
    }

    /// Unordered pair key, lexicographically sorted.
    pub fn pair_key(&self) -> (String, String) {
        if self.contender1_id <= self.contender2_id {
            (self.contender1_id.clone(), self.contender2_id.clone())
        } else {
            (self.contender2_id.clone(), self.contender1_id.clone())
        }
    }
}

impl fmt::Display for Matchup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} vs {} (r{}, {})",
            self.sequence, self.contender1_id, self.contender2_id, self.round_index, self.direction
        )
    }
}

/// Per-criterion scores, keyed the way the judge reports them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CriterionScore {
    #[serde(deserialize_with = "lenient_score")]
    pub contender1: f64,
    #[serde(deserialize_with = "lenient_score")]
    pub contender2: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScore {
    Number(f64),
    Text(String),
}

impl RawScore {
    fn into_number<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Self::Number(value) => Ok(value),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected a number, got string {text:?}"))),
        }
    }
}

/// A score given as a number or a numeric string (`8`, `"8"`, `" 6.5 "`).
pub(crate) fn lenient_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    RawScore::deserialize(deserializer)?.into_number()
}

/// Optional [`lenient_score`]; `null` stays `None`.
pub(crate) fn lenient_optional_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<RawScore>::deserialize(deserializer)?
        .map(RawScore::into_number)
        .transpose()
}

/// Why a match has no scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// How the judge's structured answer was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrigin {
    /// Parsed and validated on the first response
    FirstTry,
    /// Recovered through the validation/repair prompt
    Repaired,
}

/// What the judge claimed, kept for audit only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReported {
    pub contender1_score: f64,
    pub contender2_score: f64,
    pub winner: Option<String>,
}

/// Outcome of one matchup. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matchup: Matchup,
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, CriterionScore>,
    pub overall_score1: Option<f64>,
    pub overall_score2: Option<f64>,
    /// Winning contender id; `None` for a draw or a failed match
    pub winner: Option<String>,
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
    /// Judge call attempts spent on the match evaluation
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ResponseOrigin>,
    /// At least one criterion score was outside the scale and clamped
    #[serde(default)]
    pub clamped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_reported: Option<JudgeReported>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<MatchFailure>,
}

impl MatchResult {
    /// Sentinel result for a match the judge could not score.
    pub fn failed(matchup: Matchup, kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            matchup,
            criteria_scores: BTreeMap::new(),
            overall_score1: None,
            overall_score2: None,
            winner: None,
            rationale: format!("match failed ({kind}): {message}"),
            timestamp: Utc::now(),
            attempts: 0,
            origin: None,
            clamped: false,
            judge_reported: None,
            failure: Some(MatchFailure { kind, message }),
        }
    }

    pub fn sequence(&self) -> usize {
        self.matchup.sequence
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Scored and no winner.
    pub fn is_draw(&self) -> bool {
        !self.is_failed() && self.winner.is_none()
    }

    /// Both weighted totals, if the match was scored.
    pub fn scores(&self) -> Option<(f64, f64)> {
        match (self.overall_score1, self.overall_score2) {
            (Some(s1), Some(s2)) if !self.is_failed() => Some((s1, s2)),
            _ => None,
        }
    }

    /// `(own, opponent)` totals from the given contender's side.
    pub fn scores_for(&self, contender_id: &str) -> Option<(f64, f64)> {
        let (s1, s2) = self.scores()?;
        if self.matchup.contender1_id == contender_id {
            Some((s1, s2))
        } else if self.matchup.contender2_id == contender_id {
            Some((s2, s1))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framework(weights: &[f64]) -> AssessmentFramework {
        AssessmentFramework {
            id: "fw".to_string(),
            description: "test framework".to_string(),
            criteria: weights
                .iter()
                .enumerate()
                .map(|(i, w)| Criterion {
                    name: format!("c{i}"),
                    description: format!("criterion {i}"),
                    weight: *w,
                })
                .collect(),
            comparison_rules: vec!["Be fair".to_string(), "Be terse".to_string()],
            scoring_system: ScoringSystem::default(),
        }
    }

    #[test]
    fn test_weights_summing_to_one_accepted() {
        assert!(framework(&[0.5, 0.3, 0.2]).validate().is_ok());
        assert!(framework(&[0.3334, 0.3333, 0.3333]).validate().is_ok());
    }

    #[test]
    fn test_weights_outside_tolerance_rejected() {
        let err = framework(&[0.5, 0.3]).validate().unwrap_err();
        assert!(matches!(err, TournamentError::Config { .. }));

        let err = framework(&[0.6, 0.41]).validate().unwrap_err();
        assert!(matches!(err, TournamentError::Config { .. }));
    }

    #[test]
    fn test_duplicate_criterion_rejected() {
        let mut fw = framework(&[0.5, 0.5]);
        fw.criteria[1].name = "c0".to_string();
        assert!(fw.validate().is_err());
    }

    #[test]
    fn test_inverted_scale_rejected() {
        let mut fw = framework(&[1.0]);
        fw.scoring_system.scale = ScoreScale { min: 10.0, max: 0.0 };
        assert!(fw.validate().is_err());
    }

    #[test]
    fn test_framework_document_format() {
        let json = r#"{
            "assessment_framework": {
                "id": "essay",
                "description": "Essay quality",
                "evaluation_criteria": [
                    {"name": "clarity", "description": "Is it clear", "weight": 0.6},
                    {"name": "depth", "description": "Is it deep", "weight": 0.4}
                ],
                "comparison_rules": ["Compare directly"],
                "scoring_system": {
                    "type": "points",
                    "scale": {"min": 1, "max": 5},
                    "categories": [{"name": "Good", "range": [4, 5]}]
                }
            }
        }"#;
        let doc: FrameworkDocument = serde_json::from_str(json).unwrap();
        let fw = doc.assessment_framework;
        assert_eq!(fw.criteria.len(), 2);
        assert_eq!(fw.scale(), ScoreScale { min: 1.0, max: 5.0 });
        assert!(fw.validate().is_ok());
        assert!(fw.formatted_scoring().contains("- Good: 4 to 5"));
    }

    #[test]
    fn test_formatted_blocks() {
        let fw = framework(&[0.25, 0.75]);
        let criteria = fw.formatted_criteria();
        assert!(criteria.contains("## c0 (Weight: 0.25)"));
        assert!(criteria.contains("## c1 (Weight: 0.75)"));
        let rules = fw.formatted_rules();
        assert!(rules.contains("1. Be fair"));
        assert!(rules.contains("2. Be terse"));
    }

    #[test]
    fn test_failed_result_has_no_scores() {
        let matchup = Matchup {
            sequence: 4,
            contender1_id: "a".to_string(),
            contender2_id: "b".to_string(),
            round_index: 0,
            direction: Direction::Forward,
        };
        let result = MatchResult::failed(matchup, FailureKind::JudgeUnavailable, "timeout");
        assert!(result.is_failed());
        assert!(!result.is_draw());
        assert_eq!(result.scores(), None);
        assert_eq!(result.scores_for("a"), None);
        assert!(result.rationale.contains("judge_unavailable"));
    }

    #[test]
    fn test_pair_key_is_unordered() {
        let fwd = Matchup {
            sequence: 0,
            contender1_id: "b".to_string(),
            contender2_id: "a".to_string(),
            round_index: 0,
            direction: Direction::Reverse,
        };
        assert_eq!(fwd.pair_key(), ("a".to_string(), "b".to_string()));
        assert!(fwd.involves("a"));
        assert!(!fwd.involves("c"));
    }
}
