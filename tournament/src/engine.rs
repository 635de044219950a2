//! Tournament engine: end-to-end run of one tournament.
//!
//! ```text
//! Pending ──validate + schedule──▶ Running ──all matchups──▶ Completed
//!    │                               │
//!    └──setup error──▶ Aborted ◀──cancel / deadline──┘
//! ```
//!
//! Matchups fan out over a `JoinSet` bounded by the worker count. The run
//! loop is the single writer: it folds each finished result into the
//! standings aggregator and publishes a progress event, then re-sorts the
//! match log into scheduling order before sealing the document.
//! Cancellation and the optional deadline are checked before each matchup
//! is started; in-flight matches always run to completion.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FailureKind, TournamentError, TournamentResult};
use crate::events::{
    EventBus, ProgressEvent, ProgressSubscription, SharedEventBus, TournamentEvent,
    TournamentStatus,
};
use crate::judge::JudgeClient;
use crate::match_runner::MatchRunner;
use crate::model::{AssessmentFramework, Contender, MatchResult, Matchup, ResponseOrigin};
use crate::prompts::PromptRenderer;
use crate::resilience::{HealthLevel, JudgeHealth};
use crate::scheduler::{ScheduleSettings, Scheduler};
use crate::standings::{Applied, PointSystem, Standings, StandingsAggregator};

/// Engine knobs, passed in explicitly by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub schedule: ScheduleSettings,
    pub points: PointSystem,
    /// Concurrent judge calls
    pub workers: usize,
    /// Weighted totals closer than this are a draw
    pub draw_epsilon: f64,
    /// Whole-tournament deadline, treated like cancellation
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            schedule: ScheduleSettings::default(),
            points: PointSystem::default(),
            workers: 2,
            draw_epsilon: 0.0,
            deadline: None,
        }
    }
}

/// Why a running tournament stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    DeadlineExceeded,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

/// A single recorded lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: TournamentStatus,
    pub to: TournamentStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracks the lifecycle state and enforces legal transitions.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    current: TournamentStatus,
    transitions: Vec<StatusTransition>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            current: TournamentStatus::Pending,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> TournamentStatus {
        self.current
    }

    pub fn transitions(&self) -> &[StatusTransition] {
        &self.transitions
    }

    pub fn advance(&mut self, to: TournamentStatus, reason: Option<&str>) -> TournamentResult<()> {
        if !self.current.can_transition_to(to) {
            return Err(TournamentError::IllegalTransition {
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }
        debug!(from = %self.current, to = %to, "tournament status transition");
        self.transitions.push(StatusTransition {
            from: self.current,
            to,
            at: Utc::now(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }
}

/// Counts written into the sealed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentStatistics {
    pub total_contenders: usize,
    /// Matchups scheduled
    pub total_matches: usize,
    /// Matchups that produced a result (scored or failed)
    pub completed_matches: usize,
    pub failed_matches: usize,
    /// Scheduled but never started
    pub remaining_matches: usize,
    pub progress_percent: f64,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub repaired_matches: usize,
    pub clamped_matches: usize,
    pub judge_health: JudgeHealth,
}

/// The persisted tournament document. Sealed once returned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub id: String,
    pub status: TournamentStatus,
    /// True when the run stopped before every matchup was played
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    /// Snapshot of the configuration the run used
    #[serde(default)]
    pub config: Value,
    pub point_system: PointSystem,
    pub contenders: Vec<Contender>,
    pub framework: AssessmentFramework,
    /// Match log in scheduling order
    pub matches: Vec<MatchResult>,
    pub standings: Standings,
    pub statistics: TournamentStatistics,
    #[serde(default)]
    pub transitions: Vec<StatusTransition>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Tournament {
    /// Recompute standings from the match log alone.
    pub fn rerank(&self) -> TournamentResult<Standings> {
        Standings::from_matches(
            self.contenders.iter().map(|c| c.id.as_str()),
            self.point_system,
            &self.matches,
        )
    }

    /// Scored (non-failed) matches.
    pub fn scored_matches(&self) -> impl Iterator<Item = &MatchResult> {
        self.matches.iter().filter(|m| !m.is_failed())
    }

    /// Value at a dotted path in the config snapshot (`llm.default_model`).
    pub fn config_value(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.config, |value, segment| value.get(segment))
    }
}

/// Drives one tournament from validated inputs to a sealed document.
pub struct TournamentEngine {
    runner: MatchRunner,
    judge: Arc<JudgeClient>,
    settings: EngineSettings,
    events: SharedEventBus,
    cancel: CancellationToken,
    config_snapshot: Option<Value>,
}

impl TournamentEngine {
    pub fn new(
        judge: Arc<JudgeClient>,
        renderer: Arc<dyn PromptRenderer>,
        settings: EngineSettings,
    ) -> Self {
        let runner = MatchRunner::new(judge.clone(), renderer, settings.draw_epsilon);
        Self {
            runner,
            judge,
            settings,
            events: EventBus::new().shared(),
            cancel: CancellationToken::new(),
            config_snapshot: None,
        }
    }

    /// Publish progress on an existing bus.
    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record this value as the run's config snapshot instead of the
    /// engine and judge settings.
    pub fn with_config_snapshot(mut self, config: Value) -> Self {
        self.config_snapshot = Some(config);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> SharedEventBus {
        self.events.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn snapshot(&self) -> Value {
        if let Some(config) = &self.config_snapshot {
            return config.clone();
        }
        serde_json::json!({
            "tournament": serde_json::to_value(&self.settings).unwrap_or(Value::Null),
            "llm": serde_json::to_value(self.judge.settings()).unwrap_or(Value::Null),
        })
    }

    /// Validate inputs and build the schedule (the `Pending` phase).
    fn prepare(
        &self,
        contenders: &[Contender],
        framework: &AssessmentFramework,
    ) -> TournamentResult<Vec<Matchup>> {
        framework.validate()?;
        let matchups = Scheduler::new(self.settings.schedule).generate(contenders)?;
        // Catch template problems once instead of failing every match
        self.runner
            .render_prompt(&contenders[0], &contenders[1], framework)?;
        Ok(matchups)
    }

    /// Run a full tournament.
    ///
    /// Setup errors (bad framework, too few or duplicate contenders, a
    /// broken match template) abort before any matchup is scheduled and are
    /// returned as errors. Everything after that ends in a sealed document.
    pub async fn run(
        &self,
        contenders: Vec<Contender>,
        framework: AssessmentFramework,
    ) -> TournamentResult<Tournament> {
        let mut lifecycle = Lifecycle::new();
        let matchups = match self.prepare(&contenders, &framework) {
            Ok(matchups) => matchups,
            Err(err) => {
                let reason = err.to_string();
                lifecycle.advance(TournamentStatus::Aborted, Some(&reason))?;
                warn!(error = %err, "tournament setup failed, aborting");
                return Err(err);
            }
        };

        let id = Uuid::new_v4().to_string();
        let start_time = Utc::now();
        let total = matchups.len();
        lifecycle.advance(TournamentStatus::Running, None)?;
        info!(
            tournament_id = %id,
            contenders = contenders.len(),
            matches = total,
            workers = self.settings.workers,
            "tournament started"
        );
        self.events.publish(TournamentEvent::Started {
            tournament_id: id.clone(),
            matches_total: total,
            timestamp: start_time,
        });

        let deadline = self.settings.deadline.map(|d| Instant::now() + d);
        let by_id: HashMap<String, Arc<Contender>> = contenders
            .iter()
            .map(|c| (c.id.clone(), Arc::new(c.clone())))
            .collect();
        let shared_framework = Arc::new(framework.clone());
        let workers = self.settings.workers.max(1);

        let mut fold = Fold {
            tournament_id: &id,
            total,
            events: &self.events,
            aggregator: StandingsAggregator::new(
                contenders.iter().map(|c| c.id.as_str()),
                self.settings.points,
            ),
            health: JudgeHealth::new(),
            results: Vec::with_capacity(total),
        };
        let mut pending = matchups.into_iter();
        let mut in_flight: BTreeMap<usize, Matchup> = BTreeMap::new();
        let mut join_set: JoinSet<MatchResult> = JoinSet::new();
        let mut abort_reason = None;

        loop {
            while abort_reason.is_none() && join_set.len() < workers && pending.len() > 0 {
                let reason = if self.cancel.is_cancelled() {
                    Some(AbortReason::Cancelled)
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    Some(AbortReason::DeadlineExceeded)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    info!(tournament_id = %id, %reason, in_flight = join_set.len(), "stopping, no further matchups will start");
                    abort_reason = Some(reason);
                    break;
                }

                let Some(matchup) = pending.next() else { break };
                let (Some(first), Some(second)) = (
                    by_id.get(&matchup.contender1_id).cloned(),
                    by_id.get(&matchup.contender2_id).cloned(),
                ) else {
                    continue;
                };

                let runner = self.runner.clone();
                let framework = shared_framework.clone();
                let task_matchup = matchup.clone();
                join_set.spawn(async move {
                    runner
                        .run(&task_matchup, &first, &second, &framework)
                        .await
                });
                in_flight.insert(matchup.sequence, matchup);
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok(result) => {
                    in_flight.remove(&result.sequence());
                    fold.apply(result);
                }
                Err(err) => warn!(tournament_id = %id, error = %err, "match worker panicked"),
            }
        }

        // Matchups whose worker panicked never reported back
        for (_, matchup) in std::mem::take(&mut in_flight) {
            fold.apply(MatchResult::failed(
                matchup,
                FailureKind::JudgeUnavailable,
                "match worker panicked",
            ));
        }

        let Fold {
            aggregator,
            health,
            mut results,
            ..
        } = fold;
        results.sort_by_key(MatchResult::sequence);
        let standings = aggregator.rank();

        let status = match abort_reason {
            Some(reason) => {
                let reason_text = reason.to_string();
                lifecycle.advance(TournamentStatus::Aborted, Some(&reason_text))?;
                warn!(
                    tournament_id = %id,
                    %reason,
                    completed = results.len(),
                    total,
                    "tournament aborted, partial results kept"
                );
                TournamentStatus::Aborted
            }
            None => {
                lifecycle.advance(TournamentStatus::Completed, None)?;
                TournamentStatus::Completed
            }
        };

        let statistics =
            TournamentStatistics::from_results(contenders.len(), total, &results, health);
        let end_time = Utc::now();
        info!(
            tournament_id = %id,
            %status,
            completed = statistics.completed_matches,
            failed = statistics.failed_matches,
            "tournament finished"
        );
        self.events.publish(TournamentEvent::Finished {
            tournament_id: id.clone(),
            status,
            matches_completed: statistics.completed_matches,
            matches_failed: statistics.failed_matches,
            timestamp: end_time,
        });

        Ok(Tournament {
            id,
            status,
            incomplete: statistics.remaining_matches > 0,
            abort_reason,
            config: self.snapshot(),
            point_system: self.settings.points,
            contenders,
            framework,
            matches: results,
            standings,
            statistics,
            transitions: lifecycle.transitions().to_vec(),
            start_time,
            end_time,
        })
    }
}

/// Single-writer accumulator owned by the run loop.
struct Fold<'a> {
    tournament_id: &'a str,
    total: usize,
    events: &'a EventBus,
    aggregator: StandingsAggregator,
    health: JudgeHealth,
    results: Vec<MatchResult>,
}

impl Fold<'_> {
    fn apply(&mut self, result: MatchResult) {
        let id = self.tournament_id;
        let change = match self.aggregator.apply(&result) {
            Ok(Applied::Scored) => self.health.record_success(
                result.origin == Some(ResponseOrigin::Repaired),
                result.clamped,
            ),
            Ok(Applied::SkippedFailed) => self.health.record_failure(
                result
                    .failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unknown failure"),
            ),
            Err(err) => {
                warn!(tournament_id = %id, sequence = result.sequence(), error = %err, "match result rejected");
                return;
            }
        };
        match change {
            Some(HealthLevel::Healthy) => {
                info!(tournament_id = %id, level = %HealthLevel::Healthy, "judge health changed")
            }
            Some(level) => warn!(tournament_id = %id, %level, "judge health changed"),
            None => {}
        }

        self.results.push(result.clone());
        info!(
            tournament_id = %id,
            sequence = result.sequence(),
            completed = self.results.len(),
            total = self.total,
            failed = result.is_failed(),
            "match completed"
        );
        self.events.publish(TournamentEvent::Progress(ProgressEvent {
            matches_completed: self.results.len(),
            matches_total: self.total,
            latest_result: result,
        }));
    }
}

impl TournamentStatistics {
    /// Tally a (possibly partial) match log.
    pub fn from_results(
        total_contenders: usize,
        total_matches: usize,
        results: &[MatchResult],
        judge_health: JudgeHealth,
    ) -> Self {
        let mut failures_by_kind = BTreeMap::new();
        for failure in results.iter().filter_map(|r| r.failure.as_ref()) {
            *failures_by_kind.entry(failure.kind).or_insert(0) += 1;
        }
        let completed = results.len();
        TournamentStatistics {
            total_contenders,
            total_matches,
            completed_matches: completed,
            failed_matches: failures_by_kind.values().sum(),
            remaining_matches: total_matches.saturating_sub(completed),
            progress_percent: if total_matches == 0 {
                100.0
            } else {
                completed as f64 * 100.0 / total_matches as f64
            },
            failures_by_kind,
            repaired_matches: results
                .iter()
                .filter(|r| r.origin == Some(ResponseOrigin::Repaired))
                .count(),
            clamped_matches: results.iter().filter(|r| r.clamped).count(),
            judge_health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(TournamentStatus::Running, None).unwrap();
        lifecycle.advance(TournamentStatus::Completed, None).unwrap();
        assert_eq!(lifecycle.current(), TournamentStatus::Completed);
        assert_eq!(lifecycle.transitions().len(), 2);
    }

    #[test]
    fn test_lifecycle_rejects_illegal_transition() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle
            .advance(TournamentStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, TournamentError::IllegalTransition { .. }));

        lifecycle
            .advance(TournamentStatus::Aborted, Some("bad weights"))
            .unwrap();
        assert!(lifecycle.advance(TournamentStatus::Running, None).is_err());
        assert_eq!(
            lifecycle.transitions()[0].reason.as_deref(),
            Some("bad weights")
        );
    }

    #[test]
    fn test_abort_reason_serde() {
        assert_eq!(
            serde_json::to_string(&AbortReason::DeadlineExceeded).unwrap(),
            "\"deadline_exceeded\""
        );
        assert_eq!(AbortReason::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_statistics_counts_failures_by_kind() {
        let matchup = |seq| Matchup {
            sequence: seq,
            contender1_id: "a".into(),
            contender2_id: "b".into(),
            round_index: 0,
            direction: crate::model::Direction::Forward,
        };
        let results = vec![
            MatchResult::failed(matchup(0), FailureKind::JudgeUnavailable, "down"),
            MatchResult::failed(matchup(1), FailureKind::JudgeUnavailable, "down"),
            MatchResult::failed(matchup(2), FailureKind::InvalidResponse, "junk"),
        ];
        let stats = TournamentStatistics::from_results(2, 4, &results, JudgeHealth::new());
        assert_eq!(stats.failed_matches, 3);
        assert_eq!(stats.remaining_matches, 1);
        assert_eq!(stats.failures_by_kind[&FailureKind::JudgeUnavailable], 2);
        assert!((stats.progress_percent - 75.0).abs() < 1e-9);
    }
}
