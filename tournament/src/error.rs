//! Tournament error types
//!
//! Setup-time failures (`Config`, `Validation`) abort a run before any
//! matchup is scheduled. Per-match judge failures never surface here: they
//! are folded into a failed `MatchResult` carrying a [`FailureKind`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompts::PromptError;

/// Result type alias for tournament operations
pub type TournamentResult<T> = Result<T, TournamentError>;

/// Errors that can occur while setting up or driving a tournament
#[derive(Error, Debug)]
pub enum TournamentError {
    /// Bad tournament or framework setup (fatal, aborts before any match)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed input document or contender set
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A match result was offered to the aggregator a second time
    #[error("Match result #{sequence} has already been applied")]
    DuplicateResult { sequence: usize },

    /// A match result references a contender outside the tournament
    #[error("Unknown contender: {contender_id}")]
    UnknownContender { contender_id: String },

    /// Invalid lifecycle transition
    #[error("Invalid state transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// Failed to read or write a document
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Prompt template problem discovered at setup time
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TournamentError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a document I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error belongs to the setup phase (config or input)
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::Validation { .. } | Self::Prompt(_)
        )
    }
}

/// Why a single match could not be scored.
///
/// Stored on failed match results so the sealed document explains every
/// failure without re-running anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Judge unreachable after all retry attempts
    JudgeUnavailable,
    /// Judge output unsalvageable even after the repair attempt
    InvalidResponse,
    /// The match prompt could not be rendered
    Prompt,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JudgeUnavailable => write!(f, "judge_unavailable"),
            Self::InvalidResponse => write!(f, "invalid_response"),
            Self::Prompt => write!(f, "prompt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_classification() {
        assert!(TournamentError::config("bad weights").is_setup_error());
        assert!(TournamentError::validation("dup ids").is_setup_error());
        assert!(!TournamentError::DuplicateResult { sequence: 3 }.is_setup_error());
    }

    #[test]
    fn test_failure_kind_serde() {
        let json = serde_json::to_string(&FailureKind::JudgeUnavailable).unwrap();
        assert_eq!(json, "\"judge_unavailable\"");
        let parsed: FailureKind = serde_json::from_str("\"invalid_response\"").unwrap();
        assert_eq!(parsed, FailureKind::InvalidResponse);
        assert_eq!(FailureKind::Prompt.to_string(), "prompt");
    }
}
