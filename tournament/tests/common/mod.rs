//! Shared fixtures for integration tests: a scripted judge transport and
//! small input builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tournament::judge::{JudgeTransport, TransportError};
use tournament::model::ScoringSystem;
use tournament::resilience::{RecordingSleeper, RetryPolicy};
use tournament::{
    AssessmentFramework, Contender, Criterion, EngineSettings, JudgeClient, JudgeSettings,
    ScheduleSettings, TemplateLibrary, TournamentEngine,
};

/// Per-criterion scores `(contender1, contender2)` for a pairing.
pub type ScoreFn = dyn Fn(&str, &str) -> (f64, f64) + Send + Sync;

/// Judge that scores by contender ids parsed out of the match prompt.
///
/// Queued failures are returned before any scripted answer.
pub struct ScriptedJudge {
    scores: Box<ScoreFn>,
    failures: Mutex<VecDeque<TransportError>>,
    calls: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedJudge {
    pub fn new(scores: impl Fn(&str, &str) -> (f64, f64) + Send + Sync + 'static) -> Self {
        Self {
            scores: Box::new(scores),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            cancel_after: Mutex::new(None),
        }
    }

    /// Judge that prefers the lexicographically smaller id.
    pub fn alphabetical() -> Self {
        Self::new(|first, second| if first < second { (8.0, 5.0) } else { (5.0, 8.0) })
    }

    pub fn fail_next(self, errors: impl IntoIterator<Item = TransportError>) -> Self {
        self.failures.lock().unwrap().extend(errors);
        self
    }

    /// Cancel `token` once `calls` judge calls have been made.
    pub fn cancel_after(self, calls: usize, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((calls, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn contender_id<'a>(prompt: &'a str, marker: &str) -> &'a str {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(marker))
        .map(str::trim)
        .unwrap_or("")
}

#[async_trait]
impl JudgeTransport for ScriptedJudge {
    async fn call(&self, _model: &str, prompt: &str) -> Result<String, TransportError> {
        let made = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if made >= *after {
                token.cancel();
            }
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let first = contender_id(prompt, "### Contender 1:");
        let second = contender_id(prompt, "### Contender 2:");
        let (s1, s2) = (self.scores)(first, second);
        Ok(format!(
            "Here is my evaluation.\n```json\n{{\"criteria_scores\": {{\"quality\": {{\"contender1\": {s1}, \"contender2\": {s2}}}}}, \
             \"contender1_score\": {s1}, \"contender2_score\": {s2}, \"winner\": null, \"rationale\": \"{first} vs {second}\"}}\n```"
        ))
    }
}

pub fn contenders(ids: &[&str]) -> Vec<Contender> {
    ids.iter()
        .map(|id| Contender::new(*id, format!("essay by {id}")))
        .collect()
}

pub fn framework() -> AssessmentFramework {
    AssessmentFramework {
        id: "essay".into(),
        description: "Judge short essays".into(),
        criteria: vec![Criterion {
            name: "quality".into(),
            description: "Overall quality".into(),
            weight: 1.0,
        }],
        comparison_rules: vec!["Compare the essays directly".into()],
        scoring_system: ScoringSystem::default(),
    }
}

pub fn settings(rounds: u32, reverse: bool) -> EngineSettings {
    EngineSettings {
        schedule: ScheduleSettings {
            rounds_per_matchup: rounds,
            reverse_matchups: reverse,
        },
        workers: 1,
        ..EngineSettings::default()
    }
}

/// Route library logs to the test harness; `RUST_LOG` overrides `warn`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Engine over `judge` with instant backoff; returns the sleeper too.
pub fn engine(
    judge: Arc<ScriptedJudge>,
    settings: EngineSettings,
) -> (TournamentEngine, Arc<RecordingSleeper>) {
    init_tracing();
    let library = Arc::new(TemplateLibrary::builtin());
    let sleeper = Arc::new(RecordingSleeper::new());
    let judge_settings = JudgeSettings {
        retry: RetryPolicy::new(3, Duration::from_secs(5)),
        ..JudgeSettings::default()
    };
    let client = JudgeClient::new(judge, library.clone(), judge_settings).with_sleeper(sleeper.clone());
    (
        TournamentEngine::new(Arc::new(client), library, settings),
        sleeper,
    )
}
