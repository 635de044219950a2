//! Tournament progress events
//!
//! Push-style progress over a Tokio broadcast channel. Each subscription
//! is independent and sees every event published after it subscribed; the
//! engine never assumes any particular consumer is listening.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::model::MatchResult;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of one tournament run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Inputs loaded, validation pending or done
    Pending,
    /// Matchups being executed
    Running,
    /// All matchups processed (terminal)
    Completed,
    /// Setup failure, cancellation or deadline (terminal)
    Aborted,
}

impl TournamentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// ```text
    /// Pending → Running | Aborted
    /// Running → Completed | Aborted
    /// ```
    pub fn can_transition_to(self, to: TournamentStatus) -> bool {
        use TournamentStatus::*;
        matches!(
            (self, to),
            (Pending, Running) | (Pending, Aborted) | (Running, Completed) | (Running, Aborted)
        )
    }
}

impl std::fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One completed match, as seen by a progress consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub matches_completed: usize,
    pub matches_total: usize,
    pub latest_result: MatchResult,
}

impl ProgressEvent {
    /// Completion percentage (0–100).
    pub fn percent(&self) -> f64 {
        if self.matches_total == 0 {
            100.0
        } else {
            self.matches_completed as f64 * 100.0 / self.matches_total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TournamentEvent {
    Started {
        tournament_id: String,
        matches_total: usize,
        timestamp: DateTime<Utc>,
    },
    Progress(ProgressEvent),
    Finished {
        tournament_id: String,
        status: TournamentStatus,
        matches_completed: usize,
        matches_failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl TournamentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress(_) => "progress",
            Self::Finished { .. } => "finished",
        }
    }
}

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for tournament events
pub struct EventBus {
    sender: broadcast::Sender<TournamentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: TournamentEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One consumer's view of the event stream.
pub struct ProgressSubscription {
    receiver: broadcast::Receiver<TournamentEvent>,
}

impl ProgressSubscription {
    /// Next event, or `None` once the bus is gone.
    ///
    /// A consumer that falls behind skips the events it missed.
    pub async fn next(&mut self) -> Option<TournamentEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<TournamentEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
