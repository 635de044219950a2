//! Round-robin matchup scheduling
//!
//! ```text
//! for pair (i, j), i < j, in contender order
//!   for round in 0..rounds_per_matchup
//!     emit (i, j, round, forward)
//!     if reverse: emit (j, i, round, reverse)
//! ```
//!
//! The order is a pure function of the inputs so repeated runs line up
//! matchup-for-matchup, which consistency analysis relies on.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{TournamentError, TournamentResult};
use crate::model::{Contender, Direction, Matchup};

/// Scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub rounds_per_matchup: u32,
    /// Also schedule every pairing with the sides swapped
    pub reverse_matchups: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            rounds_per_matchup: 1,
            reverse_matchups: true,
        }
    }
}

/// Number of matchups the scheduler emits for `n` contenders.
pub fn expected_matchups(n: usize, rounds_per_matchup: u32, reverse: bool) -> usize {
    let pairs = n * n.saturating_sub(1) / 2;
    pairs * rounds_per_matchup as usize * if reverse { 2 } else { 1 }
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    settings: ScheduleSettings,
}

impl Scheduler {
    pub fn new(settings: ScheduleSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> ScheduleSettings {
        self.settings
    }

    /// Generate the full ordered matchup list.
    ///
    /// Fails with `Config` for fewer than two contenders or zero rounds, and
    /// with `Validation` when two contenders share an id.
    pub fn generate(&self, contenders: &[Contender]) -> TournamentResult<Vec<Matchup>> {
        if contenders.len() < 2 {
            return Err(TournamentError::config(format!(
                "a tournament needs at least 2 contenders, got {}",
                contenders.len()
            )));
        }
        if self.settings.rounds_per_matchup == 0 {
            return Err(TournamentError::config("rounds_per_matchup must be at least 1"));
        }

        let mut seen = HashSet::with_capacity(contenders.len());
        for contender in contenders {
            if !seen.insert(contender.id.as_str()) {
                return Err(TournamentError::validation(format!(
                    "duplicate contender id '{}'",
                    contender.id
                )));
            }
        }

        let total = expected_matchups(
            contenders.len(),
            self.settings.rounds_per_matchup,
            self.settings.reverse_matchups,
        );
        let mut matchups = Vec::with_capacity(total);

        for (i, first) in contenders.iter().enumerate() {
            for second in &contenders[i + 1..] {
                for round_index in 0..self.settings.rounds_per_matchup {
                    matchups.push(Matchup {
                        sequence: matchups.len(),
                        contender1_id: first.id.clone(),
                        contender2_id: second.id.clone(),
                        round_index,
                        direction: Direction::Forward,
                    });
                    if self.settings.reverse_matchups {
                        matchups.push(Matchup {
                            sequence: matchups.len(),
                            contender1_id: second.id.clone(),
                            contender2_id: first.id.clone(),
                            round_index,
                            direction: Direction::Reverse,
                        });
                    }
                }
            }
        }

        debug_assert_eq!(matchups.len(), total);
        Ok(matchups)
    }
}
