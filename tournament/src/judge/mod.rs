//! Judge client
//!
//! Wraps an opaque judge transport with per-kind timeouts, bounded
//! retry/backoff and a one-shot repair pass for malformed output.
//!
//! # Design
//!
//! ```text
//! evaluate::<R>(prompt)
//!   ├─ call_with_retry(R::KIND)        timeout + backoff d, 2d, 4d, ...
//!   │    └─ exhausted                  → Failed(Unavailable)
//!   ├─ extract JSON → R → check        → FirstTry
//!   └─ invalid → validation prompt
//!        ├─ corrected R passes checks  → Repaired
//!        └─ otherwise                  → Failed(InvalidResponse)
//! ```

pub mod client;
pub mod extract;
pub mod schema;
pub mod transport;

pub use client::{
    ClampedEvaluation, JudgeClient, JudgeError, JudgeOutcome, JudgeReply, JudgeSettings,
};
pub use extract::extract_json;
pub use schema::{
    schema_text, ComparisonResponse, CriterionComparison, JudgeResponse, MatchEvaluation,
    ScoringResponse, ValidationResponse,
};
pub use transport::{JudgeTransport, TransportError};
