//! Console rendering of standings, progress and run summaries.

use std::fmt::Write as _;

use tournament::{ProgressEvent, Standings, Tournament};

/// One line per finished match.
pub fn progress_line(event: &ProgressEvent) -> String {
    let result = &event.latest_result;
    let outcome = match (&result.failure, &result.winner, result.scores()) {
        (Some(failure), _, _) => format!("failed ({})", failure.kind),
        (None, Some(winner), Some((s1, s2))) => format!("{winner} wins {s1:.2}-{s2:.2}"),
        (None, None, Some((s1, s2))) => format!("draw {s1:.2}-{s2:.2}"),
        _ => "no result".to_string(),
    };
    format!(
        "[{}/{} {:.1}%] {}: {}",
        event.matches_completed,
        event.matches_total,
        event.percent(),
        result.matchup,
        outcome
    )
}

/// Ranked table with one row per contender.
pub fn standings_table(standings: &Standings) -> String {
    let width = standings
        .entries
        .iter()
        .map(|e| e.contender_id.chars().count())
        .max()
        .unwrap_or(0)
        .max("Contender".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:<width$}  {:>3}  {:>3}  {:>3}  {:>5}  {:>8}  {:>7}",
        "Rank", "Contender", "W", "D", "L", "Pts", "Diff", "Win%"
    );
    let _ = writeln!(out, "{}", "-".repeat(width + 44));
    for entry in &standings.entries {
        let record = &entry.record;
        let win_rate = record
            .win_rate()
            .map(|r| format!("{:.1}", r * 100.0))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>4}  {:<width$}  {:>3}  {:>3}  {:>3}  {:>5}  {:>+8.2}  {:>7}",
            entry.rank,
            entry.contender_id,
            record.wins,
            record.draws,
            record.losses,
            record.points,
            record.score_differential(),
            win_rate
        );
    }
    out
}

/// Status, match counts, failures and judge health.
pub fn tournament_summary(tournament: &Tournament) -> String {
    let stats = &tournament.statistics;
    let mut out = String::new();
    let _ = writeln!(out, "Tournament {} [{}]", tournament.id, tournament.status);
    if let Some(reason) = tournament.abort_reason {
        let _ = writeln!(out, "Stopped early: {reason} (results are incomplete)");
    }
    let _ = writeln!(
        out,
        "Matches: {}/{} completed, {} failed, {} not played",
        stats.completed_matches, stats.total_matches, stats.failed_matches, stats.remaining_matches
    );
    for (kind, count) in &stats.failures_by_kind {
        let _ = writeln!(out, "  {kind}: {count}");
    }
    let health = &stats.judge_health;
    let _ = writeln!(
        out,
        "Judge: {} (failure rate {:.1}%, {} repaired, {} clamped)",
        health.level,
        health.failure_rate() * 100.0,
        stats.repaired_matches,
        stats.clamped_matches
    );
    out
}
