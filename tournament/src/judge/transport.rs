//! Raw judge transport seam.
//!
//! The library never talks HTTP itself; the binary plugs in a concrete
//! transport and tests plug in scripted ones.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a single judge call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection or protocol failure before a reply arrived
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Judge returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Judge call timed out after {0:?}")]
    Timeout(Duration),

    /// Reply arrived but its envelope could not be decoded
    #[error("Could not decode judge reply: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether retrying the same call can reasonably succeed.
    ///
    /// Client-side HTTP errors (bad model name, bad key) are not retried,
    /// except 408 and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::Decode(_) => false,
        }
    }
}

/// `call_judge(model, prompt) -> raw text`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JudgeTransport: Send + Sync {
    async fn call(&self, model: &str, prompt: &str) -> Result<String, TransportError>;
}
