//! Standings aggregation
//!
//! Folds match results into per-contender records exactly once per result
//! (guarded by the matchup sequence number) and ranks them:
//!
//! 1. points, descending
//! 2. total score differential, descending
//! 3. head-to-head wins, only when exactly two contenders are still tied
//! 4. contender id, ascending
//!
//! Accumulation is commutative, so any application order yields the same
//! standings. Differentials are compared after rounding to 1e-6 so that
//! float summation order cannot split a tie.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TournamentError, TournamentResult};
use crate::model::MatchResult;

/// Points awarded per outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSystem {
    pub win: i64,
    pub draw: i64,
    pub loss: i64,
}

impl Default for PointSystem {
    fn default() -> Self {
        Self {
            win: 3,
            draw: 1,
            loss: 0,
        }
    }
}

/// Running tally for one contender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub points: i64,
    pub matches_played: u32,
    pub total_score_for: f64,
    pub total_score_against: f64,
}

impl Record {
    pub fn score_differential(&self) -> f64 {
        self.total_score_for - self.total_score_against
    }

    /// wins / matches_played, `None` before the first scored match
    pub fn win_rate(&self) -> Option<f64> {
        (self.matches_played > 0).then(|| self.wins as f64 / self.matches_played as f64)
    }

    pub fn average_score(&self) -> Option<f64> {
        (self.matches_played > 0).then(|| self.total_score_for / self.matches_played as f64)
    }

    fn add(&mut self, own: f64, opponent: f64, outcome: Outcome, points: &PointSystem) {
        self.matches_played += 1;
        self.total_score_for += own;
        self.total_score_against += opponent;
        match outcome {
            Outcome::Win => {
                self.wins += 1;
                self.points += points.win;
            }
            Outcome::Draw => {
                self.draws += 1;
                self.points += points.draw;
            }
            Outcome::Loss => {
                self.losses += 1;
                self.points += points.loss;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Win,
    Draw,
    Loss,
}

/// What `apply` did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Folded into both contenders' records
    Scored,
    /// Failed match: marked as seen, records untouched
    SkippedFailed,
}

/// One row of the ranked table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub rank: usize,
    pub contender_id: String,
    #[serde(flatten)]
    pub record: Record,
}

/// Ranked table, best first. Serialized as a plain list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Standings {
    pub entries: Vec<StandingEntry>,
}

impl Standings {
    /// Rebuild standings from a match log.
    pub fn from_matches<'a, I>(
        contender_ids: I,
        points: PointSystem,
        matches: &[MatchResult],
    ) -> TournamentResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut aggregator = StandingsAggregator::new(contender_ids, points);
        for result in matches {
            aggregator.apply(result)?;
        }
        Ok(aggregator.rank())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Contender ids in rank order.
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.contender_id.as_str()).collect()
    }

    /// 1-based rank of a contender.
    pub fn rank_of(&self, contender_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.contender_id == contender_id)
            .map(|e| e.rank)
    }

    pub fn record_of(&self, contender_id: &str) -> Option<&Record> {
        self.entries
            .iter()
            .find(|e| e.contender_id == contender_id)
            .map(|e| &e.record)
    }
}

/// Exactly-once accumulator of match results into records.
#[derive(Debug, Clone)]
pub struct StandingsAggregator {
    points: PointSystem,
    records: BTreeMap<String, Record>,
    applied: BTreeSet<usize>,
    /// (winner, loser) -> number of wins
    head_to_head: BTreeMap<(String, String), u32>,
}

impl StandingsAggregator {
    pub fn new<'a, I>(contender_ids: I, points: PointSystem) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let records = contender_ids
            .into_iter()
            .map(|id| (id.to_string(), Record::default()))
            .collect();
        Self {
            points,
            records,
            applied: BTreeSet::new(),
            head_to_head: BTreeMap::new(),
        }
    }

    pub fn point_system(&self) -> PointSystem {
        self.points
    }

    pub fn records(&self) -> &BTreeMap<String, Record> {
        &self.records
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_applied(&self, sequence: usize) -> bool {
        self.applied.contains(&sequence)
    }

    /// Fold one result into the records.
    ///
    /// A result whose sequence was already applied is rejected with
    /// `DuplicateResult` and changes nothing.
    pub fn apply(&mut self, result: &MatchResult) -> TournamentResult<Applied> {
        let sequence = result.sequence();
        if self.applied.contains(&sequence) {
            return Err(TournamentError::DuplicateResult { sequence });
        }

        let first = &result.matchup.contender1_id;
        let second = &result.matchup.contender2_id;
        for id in [first, second] {
            if !self.records.contains_key(id) {
                return Err(TournamentError::UnknownContender {
                    contender_id: id.clone(),
                });
            }
        }
        if let Some(winner) = &result.winner {
            if winner != first && winner != second {
                return Err(TournamentError::validation(format!(
                    "match #{sequence} winner '{winner}' is not one of its contenders"
                )));
            }
        }

        let Some((score1, score2)) = result.scores() else {
            self.applied.insert(sequence);
            debug!(sequence, "failed match excluded from records");
            return Ok(Applied::SkippedFailed);
        };

        let (outcome1, outcome2) = match result.winner.as_deref() {
            None => (Outcome::Draw, Outcome::Draw),
            Some(w) if w == first.as_str() => (Outcome::Win, Outcome::Loss),
            Some(_) => (Outcome::Loss, Outcome::Win),
        };

        let points = self.points;
        if let Some(record) = self.records.get_mut(first) {
            record.add(score1, score2, outcome1, &points);
        }
        if let Some(record) = self.records.get_mut(second) {
            record.add(score2, score1, outcome2, &points);
        }
        if let Some(winner) = &result.winner {
            let loser = if winner == first { second } else { first };
            *self
                .head_to_head
                .entry((winner.clone(), loser.clone()))
                .or_insert(0) += 1;
        }

        self.applied.insert(sequence);
        Ok(Applied::Scored)
    }

    fn head_to_head_wins(&self, winner: &str, loser: &str) -> u32 {
        self.head_to_head
            .get(&(winner.to_string(), loser.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Rank the current records. A total order: no two entries tie.
    pub fn rank(&self) -> Standings {
        let mut rows: Vec<(&String, &Record)> = self.records.iter().collect();
        rows.sort_by(|(id_a, a), (id_b, b)| {
            b.points
                .cmp(&a.points)
                .then_with(|| quantize(b.score_differential()).cmp(&quantize(a.score_differential())))
                .then_with(|| id_a.cmp(id_b))
        });

        // Head-to-head only separates a tie group of exactly two
        let mut start = 0;
        while start < rows.len() {
            let key = tie_key(rows[start].1);
            let mut end = start + 1;
            while end < rows.len() && tie_key(rows[end].1) == key {
                end += 1;
            }
            if end - start == 2 {
                let (upper, lower) = (rows[start].0, rows[start + 1].0);
                if self.head_to_head_wins(lower, upper) > self.head_to_head_wins(upper, lower) {
                    rows.swap(start, start + 1);
                }
            }
            start = end;
        }

        let entries = rows
            .into_iter()
            .enumerate()
            .map(|(i, (id, record))| StandingEntry {
                rank: i + 1,
                contender_id: id.clone(),
                record: record.clone(),
            })
            .collect();
        Standings { entries }
    }
}

fn quantize(value: f64) -> i64 {
    (value * 1e6).round() as i64
}

fn tie_key(record: &Record) -> (i64, i64) {
    (record.points, quantize(record.score_differential()))
}
