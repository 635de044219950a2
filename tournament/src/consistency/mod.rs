//! Cross-run consistency analysis
//!
//! Quantifies how stable a judge is across repeated tournaments over the
//! same contenders.
//!
//! # Design
//!
//! ```text
//! sealed Tournament documents
//!        │
//!        ▼
//!   GroupBy key (dotted config path, e.g. llm.default_model)
//!        │
//!        ├── group "phi4"  ──▶ ConsistencyReport
//!        └── group "llama" ──▶ ConsistencyReport
//!                                ├── ranking stability   (pairwise Spearman)
//!                                ├── win-rate consistency (std-dev per contender)
//!                                ├── matchup consistency  (winner agreement per pair)
//!                                └── score consistency    (std-dev of match totals)
//! ```
//!
//! The analyzer only reads sealed documents. Groups with fewer than two
//! runs, and metrics without enough overlapping data, are reported as
//! [`Metric::InsufficientData`] rather than computed. Failed matches never
//! enter any sample.
//!
//! # Usage
//!
//! ```ignore
//! let analyzer = ConsistencyAnalyzer::new(GroupBy::path("llm.default_model"));
//! let reports = analyzer.analyze(&tournaments);
//! let summary = ConsistencySummary::from_reports(&reports, "20250101_120000");
//! ```

pub mod report;
pub mod stats;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::engine::Tournament;
use stats::{spearman, Spread};

pub use report::{export_reports, sanitize_filename, BestGroup, ConsistencySummary, ExportPaths, SummaryRow};

/// Group key used when no grouping is requested
pub const ALL_GROUP: &str = "all";
/// Group key for tournaments whose config lacks the grouping path
pub const UNKNOWN_GROUP: &str = "unknown";

/// A metric that is either computed or explicitly marked as unsupported by
/// the available data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Metric<T> {
    Computed(T),
    InsufficientData { reason: String },
}

impl<T> Metric<T> {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Computed(value) => Some(value),
            Self::InsufficientData { .. } => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }
}

/// How tournaments are partitioned into groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupBy {
    /// Everything in one group named `all`
    #[default]
    All,
    /// Dotted path into each tournament's config snapshot
    ConfigPath(String),
}

impl GroupBy {
    pub fn path(path: impl Into<String>) -> Self {
        Self::ConfigPath(path.into())
    }

    pub fn key_for(&self, tournament: &Tournament) -> String {
        match self {
            Self::All => ALL_GROUP.to_string(),
            Self::ConfigPath(path) => match tournament.config_value(path) {
                None | Some(Value::Null) => UNKNOWN_GROUP.to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            },
        }
    }
}

/// Rank positions of one contender across the group's runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankSpread {
    pub ranks: Vec<usize>,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingStability {
    /// Mean pairwise Spearman correlation; 1.0 means identical rankings
    pub mean_correlation: f64,
    pub min_correlation: f64,
    pub max_correlation: f64,
    pub pairs_compared: usize,
    pub contenders: BTreeMap<String, RankSpread>,
    /// Mean of the per-contender rank std-devs
    pub avg_rank_std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinRateConsistency {
    pub contenders: BTreeMap<String, Spread>,
    pub mean_std_dev: f64,
    pub max_std_dev: f64,
    pub avg_coefficient_of_variation: Option<f64>,
}

/// Outcome of one match relative to the sorted pair key `(first, second)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairOutcome {
    FirstWin,
    SecondWin,
    Draw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairAgreement {
    pub first: String,
    pub second: String,
    /// Scored matches of this pair across the group
    pub occurrences: usize,
    /// Runs in which the pair was scored at least once
    pub tournaments: usize,
    pub outcome_counts: BTreeMap<PairOutcome, usize>,
    pub dominant_outcome: PairOutcome,
    /// Share of occurrences with the dominant outcome
    pub agreement_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupConsistency {
    /// Keyed by `"<first> vs <second>"`
    pub pairs: BTreeMap<String, PairAgreement>,
    pub mean_agreement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreConsistency {
    pub contenders: BTreeMap<String, Spread>,
    pub mean_std_dev: f64,
    pub avg_coefficient_of_variation: Option<f64>,
}

/// All consistency metrics for one group of runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub group_key: String,
    pub n_runs: usize,
    pub tournament_ids: Vec<String>,
    pub ranking_stability: Metric<RankingStability>,
    pub win_rate_consistency: Metric<WinRateConsistency>,
    pub matchup_consistency: Metric<MatchupConsistency>,
    pub score_consistency: Metric<ScoreConsistency>,
}

/// Read-only analyzer over sealed tournament documents.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyAnalyzer {
    group_by: GroupBy,
}

impl ConsistencyAnalyzer {
    pub fn new(group_by: GroupBy) -> Self {
        Self { group_by }
    }

    pub fn group<'a>(&self, tournaments: &'a [Tournament]) -> BTreeMap<String, Vec<&'a Tournament>> {
        let mut groups: BTreeMap<String, Vec<&Tournament>> = BTreeMap::new();
        for tournament in tournaments {
            groups
                .entry(self.group_by.key_for(tournament))
                .or_default()
                .push(tournament);
        }
        groups
    }

    /// One report per group key.
    pub fn analyze(&self, tournaments: &[Tournament]) -> BTreeMap<String, ConsistencyReport> {
        let reports: BTreeMap<String, ConsistencyReport> = self
            .group(tournaments)
            .into_iter()
            .map(|(key, runs)| {
                let report = analyze_group(&key, &runs);
                (key, report)
            })
            .collect();
        info!(
            tournaments = tournaments.len(),
            groups = reports.len(),
            "consistency analysis complete"
        );
        reports
    }
}

/// Compute every metric for one group.
pub fn analyze_group(group_key: &str, runs: &[&Tournament]) -> ConsistencyReport {
    let tournament_ids = runs.iter().map(|t| t.id.clone()).collect();
    debug!(group = group_key, runs = runs.len(), "analyzing group");

    if runs.len() < 2 {
        let reason = format!("group has {} run(s), at least 2 required", runs.len());
        return ConsistencyReport {
            group_key: group_key.to_string(),
            n_runs: runs.len(),
            tournament_ids,
            ranking_stability: Metric::insufficient(reason.clone()),
            win_rate_consistency: Metric::insufficient(reason.clone()),
            matchup_consistency: Metric::insufficient(reason.clone()),
            score_consistency: Metric::insufficient(reason),
        };
    }

    ConsistencyReport {
        group_key: group_key.to_string(),
        n_runs: runs.len(),
        tournament_ids,
        ranking_stability: ranking_stability(runs),
        win_rate_consistency: win_rate_consistency(runs),
        matchup_consistency: matchup_consistency(runs),
        score_consistency: score_consistency(runs),
    }
}

pub fn ranking_stability(runs: &[&Tournament]) -> Metric<RankingStability> {
    let orders: Vec<Vec<&str>> = runs.iter().map(|t| t.standings.order()).collect();

    let mut correlations = Vec::new();
    for (i, first) in orders.iter().enumerate() {
        for second in &orders[i + 1..] {
            if let Some(rho) = spearman(first, second) {
                correlations.push(rho);
            }
        }
    }
    if correlations.is_empty() {
        return Metric::insufficient("no pair of runs shares at least 2 contenders");
    }

    let mut ranks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for run in runs {
        for entry in &run.standings.entries {
            ranks.entry(entry.contender_id.clone()).or_default().push(entry.rank);
        }
    }
    let contenders: BTreeMap<String, RankSpread> = ranks
        .into_iter()
        .filter_map(|(id, ranks)| {
            let spread = Spread::of(ranks.iter().map(|r| *r as f64).collect())?;
            Some((
                id,
                RankSpread {
                    min: ranks.iter().copied().min()?,
                    max: ranks.iter().copied().max()?,
                    ranks,
                    mean: spread.mean,
                    median: spread.median,
                    std_dev: spread.std_dev,
                },
            ))
        })
        .collect();
    let rank_std_devs: Vec<f64> = contenders.values().map(|s| s.std_dev).collect();

    Metric::Computed(RankingStability {
        mean_correlation: stats::mean(&correlations).unwrap_or_default(),
        min_correlation: correlations.iter().copied().fold(f64::INFINITY, f64::min),
        max_correlation: correlations.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        pairs_compared: correlations.len(),
        contenders,
        avg_rank_std_dev: stats::mean(&rank_std_devs),
    })
}

pub fn win_rate_consistency(runs: &[&Tournament]) -> Metric<WinRateConsistency> {
    let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for run in runs {
        for entry in &run.standings.entries {
            if let Some(rate) = entry.record.win_rate() {
                samples.entry(entry.contender_id.clone()).or_default().push(rate);
            }
        }
    }
    let contenders = spreads(samples);
    if contenders.is_empty() {
        return Metric::insufficient("no contender has scored matches in at least 2 runs");
    }

    let std_devs: Vec<f64> = contenders.values().map(|s| s.std_dev).collect();
    Metric::Computed(WinRateConsistency {
        mean_std_dev: stats::mean(&std_devs).unwrap_or_default(),
        max_std_dev: std_devs.iter().copied().fold(0.0, f64::max),
        avg_coefficient_of_variation: average_cv(&contenders),
        contenders,
    })
}

pub fn matchup_consistency(runs: &[&Tournament]) -> Metric<MatchupConsistency> {
    // (first, second) -> (outcomes, runs seen in)
    let mut seen: BTreeMap<(String, String), (Vec<PairOutcome>, usize)> = BTreeMap::new();
    for run in runs {
        let mut in_this_run: BTreeMap<(String, String), Vec<PairOutcome>> = BTreeMap::new();
        for result in run.scored_matches() {
            let key = result.matchup.pair_key();
            let outcome = match result.winner.as_deref() {
                None => PairOutcome::Draw,
                Some(winner) if winner == key.0.as_str() => PairOutcome::FirstWin,
                Some(_) => PairOutcome::SecondWin,
            };
            in_this_run.entry(key).or_default().push(outcome);
        }
        for (key, outcomes) in in_this_run {
            let slot = seen.entry(key).or_default();
            slot.0.extend(outcomes);
            slot.1 += 1;
        }
    }

    let pairs: BTreeMap<String, PairAgreement> = seen
        .into_iter()
        .filter(|(_, (_, tournaments))| *tournaments >= 2)
        .map(|((first, second), (outcomes, tournaments))| {
            let mut outcome_counts: BTreeMap<PairOutcome, usize> = BTreeMap::new();
            for outcome in &outcomes {
                *outcome_counts.entry(*outcome).or_default() += 1;
            }
            // ties between outcomes resolve to the first in enum order
            let (dominant_outcome, dominant_count) = outcome_counts
                .iter()
                .fold((PairOutcome::Draw, 0), |best, (outcome, count)| {
                    if *count > best.1 {
                        (*outcome, *count)
                    } else {
                        best
                    }
                });
            let agreement = PairAgreement {
                agreement_rate: dominant_count as f64 / outcomes.len() as f64,
                occurrences: outcomes.len(),
                tournaments,
                outcome_counts,
                dominant_outcome,
                first: first.clone(),
                second: second.clone(),
            };
            (format!("{first} vs {second}"), agreement)
        })
        .collect();

    if pairs.is_empty() {
        return Metric::insufficient("no contender pair was scored in at least 2 runs");
    }
    let rates: Vec<f64> = pairs.values().map(|p| p.agreement_rate).collect();
    Metric::Computed(MatchupConsistency {
        mean_agreement: stats::mean(&rates).unwrap_or_default(),
        pairs,
    })
}

pub fn score_consistency(runs: &[&Tournament]) -> Metric<ScoreConsistency> {
    let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for run in runs {
        for result in run.scored_matches() {
            for id in [&result.matchup.contender1_id, &result.matchup.contender2_id] {
                if let Some((own, _)) = result.scores_for(id) {
                    samples.entry(id.clone()).or_default().push(own);
                }
            }
        }
    }
    let contenders = spreads(samples);
    if contenders.is_empty() {
        return Metric::insufficient("no contender has at least 2 scored matches");
    }

    let std_devs: Vec<f64> = contenders.values().map(|s| s.std_dev).collect();
    Metric::Computed(ScoreConsistency {
        mean_std_dev: stats::mean(&std_devs).unwrap_or_default(),
        avg_coefficient_of_variation: average_cv(&contenders),
        contenders,
    })
}

fn spreads(samples: BTreeMap<String, Vec<f64>>) -> BTreeMap<String, Spread> {
    samples
        .into_iter()
        .filter_map(|(id, values)| Spread::of(values).map(|spread| (id, spread)))
        .collect()
}

fn average_cv(contenders: &BTreeMap<String, Spread>) -> Option<f64> {
    let cvs: Vec<f64> = contenders
        .values()
        .filter_map(|s| s.coefficient_of_variation)
        .filter(|cv| cv.is_finite())
        .collect();
    stats::mean(&cvs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TournamentStatistics;
    use crate::error::FailureKind;
    use crate::events::TournamentStatus;
    use crate::model::{
        AssessmentFramework, Contender, Criterion, Direction, MatchResult, Matchup, ScoringSystem,
    };
    use crate::resilience::JudgeHealth;
    use crate::standings::{PointSystem, Standings};
    use chrono::Utc;

    fn scored(sequence: usize, a: &str, b: &str, s1: f64, s2: f64) -> MatchResult {
        let matchup = Matchup {
            sequence,
            contender1_id: a.into(),
            contender2_id: b.into(),
            round_index: 0,
            direction: Direction::Forward,
        };
        let winner = if s1 > s2 {
            Some(a.to_string())
        } else if s2 > s1 {
            Some(b.to_string())
        } else {
            None
        };
        MatchResult {
            overall_score1: Some(s1),
            overall_score2: Some(s2),
            winner,
            failure: None,
            ..MatchResult::failed(matchup, FailureKind::JudgeUnavailable, "")
        }
    }

    fn framework() -> AssessmentFramework {
        AssessmentFramework {
            id: "fw".into(),
            description: "single criterion".into(),
            criteria: vec![Criterion {
                name: "quality".into(),
                description: "overall quality".into(),
                weight: 1.0,
            }],
            comparison_rules: Vec::new(),
            scoring_system: ScoringSystem::default(),
        }
    }

    fn tournament(id: &str, model: &str, ids: &[&str], matches: Vec<MatchResult>) -> Tournament {
        let contenders: Vec<Contender> = ids.iter().map(|i| Contender::new(*i, "text")).collect();
        let standings =
            Standings::from_matches(ids.iter().copied(), PointSystem::default(), &matches).unwrap();
        let statistics =
            TournamentStatistics::from_results(ids.len(), matches.len(), &matches, JudgeHealth::new());
        Tournament {
            id: id.into(),
            status: TournamentStatus::Completed,
            incomplete: false,
            abort_reason: None,
            config: serde_json::json!({"llm": {"default_model": model}}),
            point_system: PointSystem::default(),
            contenders,
            framework: framework(),
            matches,
            standings,
            statistics,
            transitions: Vec::new(),
            start_time: Utc::now(),
            end_time: Utc::now(),
        }
    }

    fn abc_run(id: &str, model: &str, c_score: f64) -> Tournament {
        tournament(
            id,
            model,
            &["a", "b", "c"],
            vec![
                scored(0, "a", "b", 8.0, 5.0),
                scored(1, "a", "c", 7.0, c_score),
                scored(2, "b", "c", 6.0, 4.0),
            ],
        )
    }

    #[test]
    fn test_group_by_config_path() {
        let runs = vec![
            abc_run("1", "phi4", 3.0),
            abc_run("2", "llama", 3.0),
            abc_run("3", "phi4", 3.0),
        ];
        let analyzer = ConsistencyAnalyzer::new(GroupBy::path("llm.default_model"));
        let groups = analyzer.group(&runs);
        assert_eq!(groups["phi4"].len(), 2);
        assert_eq!(groups["llama"].len(), 1);

        let missing = ConsistencyAnalyzer::new(GroupBy::path("llm.nope")).group(&runs);
        assert_eq!(missing[UNKNOWN_GROUP].len(), 3);
        assert_eq!(ConsistencyAnalyzer::default().group(&runs)[ALL_GROUP].len(), 3);
    }

    #[test]
    fn test_single_run_group_is_insufficient() {
        let runs = vec![abc_run("1", "phi4", 3.0), abc_run("2", "llama", 3.0)];
        let reports = ConsistencyAnalyzer::new(GroupBy::path("llm.default_model")).analyze(&runs);
        let report = &reports["llama"];
        assert_eq!(report.n_runs, 1);
        assert!(!report.ranking_stability.is_computed());
        assert!(!report.win_rate_consistency.is_computed());
        assert!(!report.matchup_consistency.is_computed());
        assert!(!report.score_consistency.is_computed());
    }

    #[test]
    fn test_identical_runs_are_perfectly_stable() {
        let runs = vec![
            abc_run("1", "phi4", 3.0),
            abc_run("2", "phi4", 3.0),
            abc_run("3", "phi4", 3.0),
        ];
        let report = &ConsistencyAnalyzer::default().analyze(&runs)[ALL_GROUP];

        let ranking = report.ranking_stability.value().unwrap();
        assert_eq!(ranking.mean_correlation, 1.0);
        assert_eq!(ranking.min_correlation, 1.0);
        assert_eq!(ranking.pairs_compared, 3);
        assert_eq!(ranking.contenders["a"].ranks, vec![1, 1, 1]);
        assert_eq!(ranking.avg_rank_std_dev, Some(0.0));

        let win_rates = report.win_rate_consistency.value().unwrap();
        assert_eq!(win_rates.max_std_dev, 0.0);

        let matchups = report.matchup_consistency.value().unwrap();
        assert_eq!(matchups.pairs.len(), 3);
        assert_eq!(matchups.mean_agreement, 1.0);
        let ab = &matchups.pairs["a vs b"];
        assert_eq!(ab.dominant_outcome, PairOutcome::FirstWin);
        assert_eq!(ab.occurrences, 3);
    }

    #[test]
    fn test_flipped_result_lowers_agreement() {
        // run 2: c beats a, which reorders the standings too
        let runs = vec![abc_run("1", "m", 3.0), abc_run("2", "m", 9.0)];
        let report = &ConsistencyAnalyzer::default().analyze(&runs)[ALL_GROUP];

        let matchups = report.matchup_consistency.value().unwrap();
        let ac = &matchups.pairs["a vs c"];
        assert_eq!(ac.agreement_rate, 0.5);
        assert_eq!(ac.outcome_counts[&PairOutcome::FirstWin], 1);
        assert_eq!(ac.outcome_counts[&PairOutcome::SecondWin], 1);
        assert!(matchups.mean_agreement < 1.0);

        let scores = report.score_consistency.value().unwrap();
        // c scored 3 and 4 in run 1, 9 and 4 in run 2
        assert_eq!(scores.contenders["c"].samples.len(), 4);
        assert!(scores.contenders["c"].std_dev > 0.0);
        assert_eq!(scores.contenders["a"].samples, vec![8.0, 7.0, 8.0, 7.0]);
    }

    #[test]
    fn test_disjoint_contenders_are_insufficient() {
        let runs = vec![
            tournament("1", "m", &["a", "b"], vec![scored(0, "a", "b", 6.0, 5.0)]),
            tournament("2", "m", &["c", "d"], vec![scored(0, "c", "d", 6.0, 5.0)]),
        ];
        let report = &ConsistencyAnalyzer::default().analyze(&runs)[ALL_GROUP];
        assert!(matches!(report.matchup_consistency, Metric::InsufficientData { .. }));
        assert!(matches!(report.ranking_stability, Metric::InsufficientData { .. }));
    }

    #[test]
    fn test_failed_matches_are_excluded() {
        let mut first = abc_run("1", "m", 3.0);
        let mut second = abc_run("2", "m", 3.0);
        for run in [&mut first, &mut second] {
            let matchup = run.matches[0].matchup.clone();
            run.matches[0] = MatchResult::failed(matchup, FailureKind::InvalidResponse, "bad");
        }
        let report = &ConsistencyAnalyzer::default().analyze(&[first, second])[ALL_GROUP];
        let matchups = report.matchup_consistency.value().unwrap();
        assert!(!matchups.pairs.contains_key("a vs b"));
        assert_eq!(matchups.pairs.len(), 2);
    }

    #[test]
    fn test_metric_serializes_with_status_tag() {
        let metric: Metric<WinRateConsistency> = Metric::insufficient("too few");
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["status"], "insufficient_data");
        assert_eq!(json["reason"], "too few");
    }
}
