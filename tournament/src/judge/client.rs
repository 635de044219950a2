use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::extract::extract_json;
use super::schema::{schema_text, JudgeResponse, MatchEvaluation, ValidationResponse};
use super::transport::{JudgeTransport, TransportError};
use crate::error::FailureKind;
use crate::model::{AssessmentFramework, ResponseOrigin};
use crate::prompts::{PromptError, PromptKind, PromptRenderer, PromptVars};
use crate::resilience::{RetryPolicy, RetryState, Sleeper, TokioSleeper};

/// Errors that end a judge evaluation.
#[derive(Error, Debug)]
pub enum JudgeError {
    /// Every allowed attempt failed with a transient error
    #[error("Judge unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable {
        attempts: u32,
        last_error: TransportError,
    },

    /// Output unusable even after the repair attempt
    #[error("Invalid judge response: {0}")]
    InvalidResponse(String),

    /// Non-transient transport failure, not retried
    #[error("Transport error on attempt {attempts}: {error}")]
    Transport {
        attempts: u32,
        #[source]
        error: TransportError,
    },

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),
}

impl JudgeError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable { .. } | Self::Transport { .. } => FailureKind::JudgeUnavailable,
            Self::InvalidResponse(_) => FailureKind::InvalidResponse,
            Self::Prompt(_) => FailureKind::Prompt,
        }
    }

    /// Judge calls made before the error, when the error ended the call itself.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Unavailable { attempts, .. } | Self::Transport { attempts, .. } => Some(*attempts),
            Self::InvalidResponse(_) | Self::Prompt(_) => None,
        }
    }
}

/// Judge endpoint settings, resolved per prompt kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeSettings {
    pub default_model: String,
    /// Model override per prompt kind
    #[serde(default)]
    pub model_mapping: BTreeMap<PromptKind, String>,
    pub timeout: Duration,
    /// Timeout override per prompt kind
    #[serde(default)]
    pub timeouts: BTreeMap<PromptKind, Duration>,
    pub retry: RetryPolicy,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            default_model: "phi4".to_string(),
            model_mapping: BTreeMap::new(),
            timeout: Duration::from_secs(60),
            timeouts: BTreeMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl JudgeSettings {
    pub fn model_for(&self, kind: PromptKind) -> &str {
        self.model_mapping
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    pub fn timeout_for(&self, kind: PromptKind) -> Duration {
        self.timeouts.get(&kind).copied().unwrap_or(self.timeout)
    }
}

/// Raw judge text and how many calls it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeReply {
    pub text: String,
    pub attempts: u32,
}

/// Result of one structured evaluation.
///
/// Repaired successes are kept apart from first-try successes so callers
/// can report how often the judge needed fixing.
#[derive(Debug)]
pub enum JudgeOutcome<R> {
    FirstTry {
        value: R,
        attempts: u32,
    },
    Repaired {
        value: R,
        attempts: u32,
        original_error: String,
    },
    Failed {
        error: JudgeError,
        /// Calls spent on the evaluation itself, repair excluded
        attempts: u32,
    },
}

impl<R> JudgeOutcome<R> {
    pub fn origin(&self) -> Option<ResponseOrigin> {
        match self {
            Self::FirstTry { .. } => Some(ResponseOrigin::FirstTry),
            Self::Repaired { .. } => Some(ResponseOrigin::Repaired),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_repaired(&self) -> bool {
        matches!(self, Self::Repaired { .. })
    }

    pub fn into_result(self) -> Result<R, JudgeError> {
        match self {
            Self::FirstTry { value, .. } | Self::Repaired { value, .. } => Ok(value),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// A validated match evaluation plus the clamping it needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedEvaluation {
    pub evaluation: MatchEvaluation,
    /// One entry per score pulled back into the scale
    pub clamped: Vec<String>,
}

/// Calls the judge with timeout, retry/backoff and response repair.
///
/// Holds no mutable state, so one client is shared by every worker.
pub struct JudgeClient {
    transport: Arc<dyn JudgeTransport>,
    renderer: Arc<dyn PromptRenderer>,
    sleeper: Arc<dyn Sleeper>,
    settings: JudgeSettings,
}

impl JudgeClient {
    pub fn new(
        transport: Arc<dyn JudgeTransport>,
        renderer: Arc<dyn PromptRenderer>,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            transport,
            renderer,
            sleeper: Arc::new(TokioSleeper),
            settings,
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(&self) -> &JudgeSettings {
        &self.settings
    }

    /// Call the judge for `kind`, retrying transient failures.
    pub async fn call_with_retry(
        &self,
        kind: PromptKind,
        prompt: &str,
    ) -> Result<JudgeReply, JudgeError> {
        let model = self.settings.model_for(kind);
        let timeout = self.settings.timeout_for(kind);
        let policy = self.settings.retry;
        let mut state = RetryState::start();

        loop {
            let attempt = state.attempts();
            let result =
                match tokio::time::timeout(timeout, self.transport.call(model, prompt)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(timeout)),
                };

            let error = match result {
                Ok(text) => {
                    state = state.succeed();
                    debug!(%kind, model, attempt, "judge call succeeded");
                    return Ok(JudgeReply {
                        text,
                        attempts: state.attempts(),
                    });
                }
                Err(error) if !error.is_transient() => {
                    warn!(%kind, model, attempt, %error, "judge call failed permanently");
                    return Err(JudgeError::Transport {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => error,
            };

            let (next, delay) = state.fail(&policy);
            state = next;
            match delay {
                Some(delay) => {
                    warn!(
                        %kind,
                        model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "judge call failed, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
                None => {
                    warn!(%kind, model, attempts = state.attempts(), %error, "judge retries exhausted");
                    return Err(JudgeError::Unavailable {
                        attempts: state.attempts(),
                        last_error: error,
                    });
                }
            }
        }
    }

    /// `evaluate(kind, prompt)`; the kind comes from `R`.
    pub async fn evaluate<R: JudgeResponse>(&self, prompt: &str) -> JudgeOutcome<R> {
        self.evaluate_with(prompt, |_: &R| Ok(())).await
    }

    /// Evaluate with an extra semantic check applied to both the first
    /// response and any repaired one.
    pub async fn evaluate_with<R, F>(&self, prompt: &str, validate: F) -> JudgeOutcome<R>
    where
        R: JudgeResponse,
        F: Fn(&R) -> Result<(), String> + Send + Sync,
    {
        let reply = match self.call_with_retry(R::KIND, prompt).await {
            Ok(reply) => reply,
            Err(error) => {
                return JudgeOutcome::Failed {
                    attempts: error.attempts().unwrap_or_default(),
                    error,
                }
            }
        };

        match parse_response::<R, _>(&reply.text, &validate) {
            Ok(value) => JudgeOutcome::FirstTry {
                value,
                attempts: reply.attempts,
            },
            Err(problem) => {
                info!(kind = %R::KIND, error = %problem, "judge response invalid, attempting repair");
                match self.repair::<R, _>(&reply.text, &problem, &validate).await {
                    Ok(value) => JudgeOutcome::Repaired {
                        value,
                        attempts: reply.attempts,
                        original_error: problem,
                    },
                    Err(error) => JudgeOutcome::Failed {
                        error,
                        attempts: reply.attempts,
                    },
                }
            }
        }
    }

    /// One repair round trip through the validation prompt.
    async fn repair<R, F>(&self, raw: &str, problem: &str, validate: &F) -> Result<R, JudgeError>
    where
        R: JudgeResponse,
        F: Fn(&R) -> Result<(), String> + Send + Sync,
    {
        let mut vars = PromptVars::new();
        vars.insert("response", raw.to_string());
        vars.insert("expected_format", schema_text::<R>());
        vars.insert("error_message", problem.to_string());
        let prompt = self
            .renderer
            .render(PromptKind::Validation.template_name(), &vars)?;

        let reply = self
            .call_with_retry(PromptKind::Validation, &prompt)
            .await
            .map_err(|e| JudgeError::InvalidResponse(format!("{problem}; repair call failed: {e}")))?;

        let verdict: ValidationResponse = parse_response(&reply.text, &|_: &ValidationResponse| Ok(()))
            .map_err(|e| JudgeError::InvalidResponse(format!("{problem}; repair reply unusable: {e}")))?;

        let corrected = match verdict.corrected_response {
            Some(value) if value.is_object() => value,
            _ => {
                let reason = verdict
                    .error_message
                    .unwrap_or_else(|| "no corrected response".to_string());
                return Err(JudgeError::InvalidResponse(format!(
                    "{problem}; repair declined: {reason}"
                )));
            }
        };

        let value: R = serde_json::from_value(corrected).map_err(|e| {
            JudgeError::InvalidResponse(format!("{problem}; repaired response invalid: {e}"))
        })?;
        value
            .check()
            .and_then(|_| validate(&value))
            .map_err(|e| JudgeError::InvalidResponse(format!("{problem}; repaired response invalid: {e}")))?;
        Ok(value)
    }

    /// Match evaluation with criteria coverage checked and out-of-scale
    /// scores clamped. Clamping is noted in the rationale.
    pub async fn evaluate_match(
        &self,
        prompt: &str,
        framework: &AssessmentFramework,
    ) -> JudgeOutcome<ClampedEvaluation> {
        let criteria = &framework.criteria;
        let outcome = self
            .evaluate_with(prompt, |eval: &MatchEvaluation| eval.check_against(criteria))
            .await;

        let clamp = |mut evaluation: MatchEvaluation| {
            let clamped = evaluation.clamp_to(framework.scale());
            if !clamped.is_empty() {
                debug!(count = clamped.len(), "clamped out-of-scale judge scores");
                evaluation.rationale = format!(
                    "{}\n\n[scores clamped to {}..{}: {}]",
                    evaluation.rationale.trim_end(),
                    framework.scale().min,
                    framework.scale().max,
                    clamped.join("; ")
                );
            }
            ClampedEvaluation {
                evaluation,
                clamped,
            }
        };

        match outcome {
            JudgeOutcome::FirstTry { value, attempts } => JudgeOutcome::FirstTry {
                value: clamp(value),
                attempts,
            },
            JudgeOutcome::Repaired {
                value,
                attempts,
                original_error,
            } => JudgeOutcome::Repaired {
                value: clamp(value),
                attempts,
                original_error,
            },
            JudgeOutcome::Failed { error, attempts } => JudgeOutcome::Failed { error, attempts },
        }
    }
}

fn parse_response<R, F>(text: &str, validate: &F) -> Result<R, String>
where
    R: JudgeResponse,
    F: Fn(&R) -> Result<(), String>,
{
    let value = extract_json(text).ok_or_else(|| "no JSON object found in response".to_string())?;
    let parsed: R =
        serde_json::from_value(value).map_err(|e| format!("response does not match schema: {e}"))?;
    parsed.check()?;
    validate(&parsed)?;
    Ok(parsed)
}
