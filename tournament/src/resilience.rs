//! Judge retry and health tracking
//!
//! Retry control flow is an explicit bounded state machine. Every backoff
//! sleep goes through a [`Sleeper`], so tests observe the delays without
//! waiting for them.
//!
//! # Design
//!
//! ```text
//! Attempting(1) ──ok──▶ Succeeded(1)
//!      │ err
//!      ▼ sleep d
//! Attempting(2) ──ok──▶ Succeeded(2)
//!      │ err
//!      ▼ sleep 2d
//! Attempting(n) ──err, n == max_attempts──▶ Exhausted(n)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tournament::resilience::{RetryPolicy, RetryState};
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(5));
//! let mut state = RetryState::start();
//! while let RetryState::Attempting(n) = state {
//!     match call().await {
//!         Ok(v) => return Ok(v),
//!         Err(_) => {
//!             let (next, delay) = state.fail(&policy);
//!             if let Some(d) = delay { sleeper.sleep(d).await; }
//!             state = next;
//!         }
//!     }
//! }
//! ```

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many times to call the judge and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn attempts_allowed(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff after the given (1-based) failed attempt: d, 2d, 4d, ...
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Where a retried call currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum RetryState {
    /// About to make (1-based) attempt n
    Attempting(u32),
    /// Attempt n succeeded
    Succeeded(u32),
    /// Attempt n failed and it was the last one allowed
    Exhausted(u32),
}

impl RetryState {
    pub fn start() -> Self {
        Self::Attempting(1)
    }

    /// Number of attempts made or in flight.
    pub fn attempts(&self) -> u32 {
        match *self {
            Self::Attempting(n) | Self::Succeeded(n) | Self::Exhausted(n) => n,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Attempting(_))
    }

    /// Current attempt succeeded.
    pub fn succeed(self) -> Self {
        match self {
            Self::Attempting(n) => Self::Succeeded(n),
            terminal => terminal,
        }
    }

    /// Current attempt failed.
    ///
    /// Returns the next state and, when another attempt follows, the delay
    /// to sleep before it.
    pub fn fail(self, policy: &RetryPolicy) -> (Self, Option<Duration>) {
        match self {
            Self::Attempting(n) if n < policy.attempts_allowed() => {
                (Self::Attempting(n + 1), Some(policy.backoff_after(n)))
            }
            Self::Attempting(n) => (Self::Exhausted(n), None),
            terminal => (terminal, None),
        }
    }
}

/// Injectable sleep capability used for retry backoff.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in call order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// How usable the judge currently looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    /// Recent matches failed but the judge still answers sometimes
    Degraded,
    /// Several matches in a row failed
    Unavailable,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Consecutive failed matches before the judge is reported unavailable
const UNAVAILABLE_AFTER: u32 = 3;
/// Consecutive successes needed to climb back to healthy
const RECOVER_AFTER: u32 = 3;

/// Per-tournament judge health, updated once per evaluated match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeHealth {
    pub level: HealthLevel,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    /// Matches evaluated (scored or failed)
    pub total_matches: u64,
    pub total_failures: u64,
    /// Scored matches whose response needed the repair prompt
    pub repaired: u64,
    /// Scored matches with at least one clamped criterion score
    pub clamped: u64,
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
}

impl Default for JudgeHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl JudgeHealth {
    pub fn new() -> Self {
        Self {
            level: HealthLevel::Healthy,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_matches: 0,
            total_failures: 0,
            repaired: 0,
            clamped: 0,
            last_error: None,
            last_change: Utc::now(),
        }
    }

    /// Record a scored match. Returns the new level if it changed.
    pub fn record_success(&mut self, repaired: bool, clamped: bool) -> Option<HealthLevel> {
        self.total_matches += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        if repaired {
            self.repaired += 1;
        }
        if clamped {
            self.clamped += 1;
        }

        if self.level != HealthLevel::Healthy && self.consecutive_successes >= RECOVER_AFTER {
            self.last_error = None;
            return self.set_level(HealthLevel::Healthy);
        }
        None
    }

    /// Record a failed match. Returns the new level if it changed.
    pub fn record_failure(&mut self, error: &str) -> Option<HealthLevel> {
        self.total_matches += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_error = Some(error.to_string());

        let level = if self.consecutive_failures >= UNAVAILABLE_AFTER {
            HealthLevel::Unavailable
        } else {
            HealthLevel::Degraded
        };
        self.set_level(level)
    }

    fn set_level(&mut self, level: HealthLevel) -> Option<HealthLevel> {
        if level == self.level {
            return None;
        }
        self.level = level;
        self.last_change = Utc::now();
        Some(level)
    }

    /// Failure rate as a fraction (0.0–1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_matches == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_matches as f64
        }
    }
}
