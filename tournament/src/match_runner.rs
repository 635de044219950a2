//! Single-match execution
//!
//! Renders the match prompt, asks the judge, and turns the evaluation into
//! a [`MatchResult`]. Weighted totals are always recomputed from the
//! per-criterion scores; the judge's own totals are kept only for audit.
//! Judge failures become a failed sentinel result instead of an error.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::FailureKind;
use crate::judge::{ClampedEvaluation, JudgeClient, JudgeOutcome, MatchEvaluation};
use crate::model::{AssessmentFramework, Contender, JudgeReported, MatchResult, Matchup};
use crate::prompts::{PromptError, PromptKind, PromptRenderer, PromptVars};

/// Variables for the match evaluation template.
pub fn match_prompt_vars(
    first: &Contender,
    second: &Contender,
    framework: &AssessmentFramework,
) -> PromptVars {
    let mut vars = PromptVars::new();
    vars.insert("framework_description", framework.description.clone());
    vars.insert("formatted_criteria", framework.formatted_criteria());
    vars.insert("formatted_rules", framework.formatted_rules());
    vars.insert("formatted_scoring", framework.formatted_scoring());
    vars.insert("contender1_id", first.id.clone());
    vars.insert("contender1_content", first.content.clone());
    vars.insert("contender2_id", second.id.clone());
    vars.insert("contender2_content", second.content.clone());
    vars
}

/// Weighted totals `(overall1, overall2)` over the framework criteria.
pub fn weighted_totals(
    evaluation: &MatchEvaluation,
    framework: &AssessmentFramework,
) -> (f64, f64) {
    framework
        .criteria
        .iter()
        .filter_map(|c| {
            evaluation
                .criteria_scores
                .get(&c.name)
                .map(|s| (s.contender1 * c.weight, s.contender2 * c.weight))
        })
        .fold((0.0, 0.0), |(a, b), (x, y)| (a + x, b + y))
}

/// Runs matchups against a shared judge client.
#[derive(Clone)]
pub struct MatchRunner {
    judge: Arc<JudgeClient>,
    renderer: Arc<dyn PromptRenderer>,
    /// Totals closer than this are a draw
    draw_epsilon: f64,
}

impl MatchRunner {
    pub fn new(judge: Arc<JudgeClient>, renderer: Arc<dyn PromptRenderer>, draw_epsilon: f64) -> Self {
        Self {
            judge,
            renderer,
            draw_epsilon: draw_epsilon.max(0.0),
        }
    }

    /// Render the match prompt for a pairing.
    pub fn render_prompt(
        &self,
        first: &Contender,
        second: &Contender,
        framework: &AssessmentFramework,
    ) -> Result<String, PromptError> {
        self.renderer.render(
            PromptKind::MatchEvaluation.template_name(),
            &match_prompt_vars(first, second, framework),
        )
    }

    /// Run one matchup. Never fails: judge problems yield a failed result.
    pub async fn run(
        &self,
        matchup: &Matchup,
        first: &Contender,
        second: &Contender,
        framework: &AssessmentFramework,
    ) -> MatchResult {
        let prompt = match self.render_prompt(first, second, framework) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(sequence = matchup.sequence, error = %err, "could not render match prompt");
                return MatchResult::failed(matchup.clone(), FailureKind::Prompt, err.to_string());
            }
        };

        let outcome = self.judge.evaluate_match(&prompt, framework).await;
        let origin = outcome.origin();
        let (value, attempts) = match outcome {
            JudgeOutcome::FirstTry { value, attempts } => (value, attempts),
            JudgeOutcome::Repaired {
                value,
                attempts,
                original_error,
            } => {
                debug!(sequence = matchup.sequence, %original_error, "judge response repaired");
                (value, attempts)
            }
            JudgeOutcome::Failed { error, attempts } => {
                let kind = error.failure_kind();
                warn!(sequence = matchup.sequence, %kind, attempts, %error, "match failed");
                return MatchResult {
                    attempts,
                    ..MatchResult::failed(matchup.clone(), kind, error.to_string())
                };
            }
        };

        let ClampedEvaluation {
            evaluation,
            clamped,
        } = value;
        let (overall1, overall2) = weighted_totals(&evaluation, framework);
        let winner = if (overall1 - overall2).abs() <= self.draw_epsilon {
            None
        } else if overall1 > overall2 {
            Some(matchup.contender1_id.clone())
        } else {
            Some(matchup.contender2_id.clone())
        };

        let judge_reported = match (evaluation.contender1_score, evaluation.contender2_score) {
            (Some(s1), Some(s2)) => Some(JudgeReported {
                contender1_score: s1,
                contender2_score: s2,
                winner: evaluation.winner.clone(),
            }),
            _ => None,
        };

        debug!(
            sequence = matchup.sequence,
            overall1,
            overall2,
            winner = winner.as_deref().unwrap_or("draw"),
            "match scored"
        );

        MatchResult {
            matchup: matchup.clone(),
            criteria_scores: evaluation.criteria_scores,
            overall_score1: Some(overall1),
            overall_score2: Some(overall2),
            winner,
            rationale: evaluation.rationale,
            timestamp: Utc::now(),
            attempts,
            origin,
            clamped: !clamped.is_empty(),
            judge_reported,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::transport::MockJudgeTransport;
    use crate::judge::{JudgeSettings, TransportError};
    use crate::model::{Criterion, Direction, ScoringSystem};
    use crate::prompts::TemplateLibrary;
    use crate::resilience::{RecordingSleeper, RetryPolicy};
    use std::time::Duration;

    fn framework() -> AssessmentFramework {
        AssessmentFramework {
            id: "fw".into(),
            description: "two criteria".into(),
            criteria: vec![
                Criterion {
                    name: "clarity".into(),
                    description: "clear".into(),
                    weight: 0.7,
                },
                Criterion {
                    name: "style".into(),
                    description: "stylish".into(),
                    weight: 0.3,
                },
            ],
            comparison_rules: vec!["Compare directly".into()],
            scoring_system: ScoringSystem::default(),
        }
    }

    fn matchup() -> Matchup {
        Matchup {
            sequence: 7,
            contender1_id: "a".into(),
            contender2_id: "b".into(),
            round_index: 0,
            direction: Direction::Forward,
        }
    }

    fn runner(mock: MockJudgeTransport, epsilon: f64) -> MatchRunner {
        let library: Arc<TemplateLibrary> = Arc::new(TemplateLibrary::builtin());
        let settings = JudgeSettings {
            retry: RetryPolicy::new(2, Duration::from_millis(1)),
            ..JudgeSettings::default()
        };
        let judge = JudgeClient::new(Arc::new(mock), library.clone(), settings)
            .with_sleeper(Arc::new(RecordingSleeper::new()));
        MatchRunner::new(Arc::new(judge), library, epsilon)
    }

    fn reply(c1: (f64, f64), c2: (f64, f64), judge_winner: &str) -> String {
        format!(
            r#"{{"criteria_scores": {{"clarity": {{"contender1": {}, "contender2": {}}}, "style": {{"contender1": {}, "contender2": {}}}}},
               "contender1_score": 9, "contender2_score": 1, "winner": "{}", "rationale": "because"}}"#,
            c1.0, c1.1, c2.0, c2.1, judge_winner
        )
    }

    #[tokio::test]
    async fn test_weighted_totals_decide_winner_not_judge() {
        let mut mock = MockJudgeTransport::new();
        // clarity favours b, style favours a; weights make b the winner
        let text = reply((5.0, 8.0), (9.0, 4.0), "a");
        mock.expect_call().times(1).returning(move |_, _| Ok(text.clone()));

        let result = runner(mock, 0.0)
            .run(&matchup(), &Contender::new("a", "x"), &Contender::new("b", "y"), &framework())
            .await;

        let (s1, s2) = result.scores().unwrap();
        assert!((s1 - (5.0 * 0.7 + 9.0 * 0.3)).abs() < 1e-9);
        assert!((s2 - (8.0 * 0.7 + 4.0 * 0.3)).abs() < 1e-9);
        assert_eq!(result.winner.as_deref(), Some("b"));
        assert_eq!(result.judge_reported.unwrap().winner.as_deref(), Some("a"));
        assert_eq!(result.origin, Some(crate::model::ResponseOrigin::FirstTry));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_equal_totals_is_draw() {
        let mut mock = MockJudgeTransport::new();
        let text = reply((6.0, 6.0), (3.0, 3.0), "a");
        mock.expect_call().times(1).returning(move |_, _| Ok(text.clone()));

        let result = runner(mock, 0.0)
            .run(&matchup(), &Contender::new("a", "x"), &Contender::new("b", "y"), &framework())
            .await;
        assert!(result.is_draw());
        assert_eq!(result.winner, None);
    }

    #[tokio::test]
    async fn test_epsilon_widens_draw_band() {
        let mut mock = MockJudgeTransport::new();
        let text = reply((6.0, 6.1), (3.0, 3.0), "b");
        mock.expect_call().times(1).returning(move |_, _| Ok(text.clone()));

        let result = runner(mock, 0.1)
            .run(&matchup(), &Contender::new("a", "x"), &Contender::new("b", "y"), &framework())
            .await;
        assert!(result.is_draw());
    }

    #[tokio::test]
    async fn test_unavailable_judge_yields_failed_result() {
        let mut mock = MockJudgeTransport::new();
        mock.expect_call()
            .times(2)
            .returning(|_, _| Err(TransportError::Request("refused".into())));

        let result = runner(mock, 0.0)
            .run(&matchup(), &Contender::new("a", "x"), &Contender::new("b", "y"), &framework())
            .await;
        assert!(result.is_failed());
        assert_eq!(result.winner, None);
        assert_eq!(result.overall_score1, None);
        assert_eq!(result.failure.unwrap().kind, FailureKind::JudgeUnavailable);
        assert_eq!(result.matchup.sequence, 7);
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn test_prompt_contains_both_contenders() {
        let runner = runner(MockJudgeTransport::new(), 0.0);
        let prompt = runner
            .render_prompt(
                &Contender::new("a", "first essay"),
                &Contender::new("b", "second essay"),
                &framework(),
            )
            .unwrap();
        assert!(prompt.contains("first essay"));
        assert!(prompt.contains("second essay"));
        assert!(prompt.contains("## clarity (Weight: 0.70)"));
    }
}
