//! LLM Tournament Library
//!
//! Round-robin tournaments between text contenders, judged pairwise by a
//! language model against a weighted assessment framework.
//!
//! This library provides:
//! - Deterministic round-robin scheduling with rounds and reverse matchups
//! - A judge client with per-call timeouts, bounded retry/backoff and a
//!   repair pass for malformed responses
//! - Exactly-once standings aggregation with a total tie-break order
//! - A tournament engine with a bounded worker pool, cooperative
//!   cancellation and a broadcast progress stream
//! - Cross-run consistency analysis of judge behaviour
//!
//! The judge itself sits behind [`judge::JudgeTransport`]; this crate does
//! no network I/O.
//!
//! # Usage
//!
//! ```ignore
//! let library = Arc::new(TemplateLibrary::builtin());
//! let judge = Arc::new(JudgeClient::new(transport, library.clone(), JudgeSettings::default()));
//! let engine = TournamentEngine::new(judge, library, EngineSettings::default());
//! let tournament = engine.run(contenders, framework).await?;
//! save_document(&path, &tournament)?;
//! ```

pub mod consistency;
pub mod engine;
pub mod error;
pub mod events;
pub mod judge;
pub mod match_runner;
pub mod model;
pub mod prompts;
pub mod resilience;
pub mod scheduler;
pub mod standings;
pub mod store;

pub use consistency::{
    ConsistencyAnalyzer, ConsistencyReport, ConsistencySummary, GroupBy, Metric,
};
pub use engine::{
    AbortReason, EngineSettings, Tournament, TournamentEngine, TournamentStatistics,
};
pub use error::{FailureKind, TournamentError, TournamentResult};
pub use events::{EventBus, ProgressEvent, ProgressSubscription, TournamentEvent, TournamentStatus};
pub use judge::{JudgeClient, JudgeError, JudgeSettings, JudgeTransport, TransportError};
pub use match_runner::MatchRunner;
pub use model::{AssessmentFramework, Contender, Criterion, Direction, MatchResult, Matchup};
pub use prompts::{PromptKind, PromptRenderer, TemplateLibrary};
pub use resilience::{HealthLevel, JudgeHealth, RetryPolicy};
pub use scheduler::{ScheduleSettings, Scheduler};
pub use standings::{PointSystem, Record, Standings, StandingsAggregator};
pub use store::{load_contenders, load_document, load_framework, load_tournaments, save_document};
