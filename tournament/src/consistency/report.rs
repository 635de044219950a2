//! Cross-group summary and file exports for consistency reports.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ConsistencyReport;
use crate::error::{TournamentError, TournamentResult};
use crate::store::save_document;

static UNSAFE_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\\/*?:"<>|\s]"#).expect("UNSAFE_FILENAME_RE regex should compile")
});

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = UNSAFE_FILENAME_RE.replace_all(name, "_");
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.into_owned()
    }
}

const CSV_HEADER: [&str; 9] = [
    "Group",
    "Tournaments",
    "Ranking Stability",
    "Avg Rank StdDev",
    "Win Rate Consistency",
    "Avg Win Rate CV",
    "Matchup Consistency",
    "Score Consistency",
    "Avg Score CV",
];

/// Headline numbers for one group. Higher is more consistent for every
/// field except the raw std-dev / CV columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub tournaments: usize,
    pub ranking_stability: Option<f64>,
    pub avg_rank_std_dev: Option<f64>,
    /// `1 - avg win-rate CV`
    pub win_rate_consistency: Option<f64>,
    pub avg_win_rate_cv: Option<f64>,
    pub matchup_consistency: Option<f64>,
    /// `1 - avg score CV`
    pub score_consistency: Option<f64>,
    pub avg_score_cv: Option<f64>,
}

impl SummaryRow {
    pub fn from_report(report: &ConsistencyReport) -> Self {
        let ranking = report.ranking_stability.value();
        let win_rate_cv = report
            .win_rate_consistency
            .value()
            .map(|w| w.avg_coefficient_of_variation.unwrap_or(0.0));
        let score_cv = report
            .score_consistency
            .value()
            .map(|s| s.avg_coefficient_of_variation.unwrap_or(0.0));
        Self {
            tournaments: report.n_runs,
            ranking_stability: ranking.map(|r| r.mean_correlation),
            avg_rank_std_dev: ranking.and_then(|r| r.avg_rank_std_dev),
            win_rate_consistency: win_rate_cv.map(|cv| 1.0 - cv),
            avg_win_rate_cv: win_rate_cv,
            matchup_consistency: report.matchup_consistency.value().map(|m| m.mean_agreement),
            score_consistency: score_cv.map(|cv| 1.0 - cv),
            avg_score_cv: score_cv,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestGroup {
    pub group: String,
    pub value: f64,
}

/// Cross-group summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencySummary {
    pub timestamp: String,
    pub groups: BTreeMap<String, SummaryRow>,
    /// Best group per metric; only filled when there are two or more groups
    pub overall_comparison: BTreeMap<String, BestGroup>,
}

impl ConsistencySummary {
    pub fn from_reports(reports: &BTreeMap<String, ConsistencyReport>, timestamp: &str) -> Self {
        let groups: BTreeMap<String, SummaryRow> = reports
            .iter()
            .map(|(key, report)| (key.clone(), SummaryRow::from_report(report)))
            .collect();

        let mut overall_comparison = BTreeMap::new();
        if groups.len() > 1 {
            let metrics: [(&str, fn(&SummaryRow) -> Option<f64>); 4] = [
                ("best_ranking_stability", |r: &SummaryRow| r.ranking_stability),
                ("best_win_rate_consistency", |r: &SummaryRow| r.win_rate_consistency),
                ("best_matchup_consistency", |r: &SummaryRow| r.matchup_consistency),
                ("best_score_consistency", |r: &SummaryRow| r.score_consistency),
            ];
            for (name, pick) in metrics {
                if let Some(best) = best_group(&groups, pick) {
                    overall_comparison.insert(name.to_string(), best);
                }
            }
        }

        Self {
            timestamp: timestamp.to_string(),
            groups,
            overall_comparison,
        }
    }

    /// CSV with one row per group; unavailable metrics are empty cells.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> TournamentResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(CSV_HEADER)?;
        for (group, row) in &self.groups {
            wtr.write_record([
                group.clone(),
                row.tournaments.to_string(),
                cell(row.ranking_stability),
                cell(row.avg_rank_std_dev),
                cell(row.win_rate_consistency),
                cell(row.avg_win_rate_cv),
                cell(row.matchup_consistency),
                cell(row.score_consistency),
                cell(row.avg_score_cv),
            ])?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    /// [`write_csv`](Self::write_csv) into a string.
    pub fn to_csv(&self) -> TournamentResult<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Fixed-width table for terminal output.
    pub fn to_table(&self) -> String {
        let width = self
            .groups
            .keys()
            .map(|g| g.chars().count())
            .max()
            .unwrap_or(0)
            .max("Group".len());
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<width$}  {:>5}  {:>8}  {:>8}  {:>8}  {:>8}",
            "Group", "Runs", "Ranking", "WinRate", "Matchup", "Score"
        );
        let _ = writeln!(out, "{}", "-".repeat(width + 47));
        for (group, row) in &self.groups {
            let _ = writeln!(
                out,
                "{:<width$}  {:>5}  {:>8}  {:>8}  {:>8}  {:>8}",
                group,
                row.tournaments,
                fixed(row.ranking_stability),
                fixed(row.win_rate_consistency),
                fixed(row.matchup_consistency),
                fixed(row.score_consistency),
            );
        }
        for (metric, best) in &self.overall_comparison {
            let _ = writeln!(out, "{metric}: {} ({:.3})", best.group, best.value);
        }
        out
    }
}

fn best_group(
    groups: &BTreeMap<String, SummaryRow>,
    pick: fn(&SummaryRow) -> Option<f64>,
) -> Option<BestGroup> {
    groups
        .iter()
        .filter_map(|(group, row)| pick(row).map(|value| (group, value)))
        // first group wins on equal values
        .fold(None, |best: Option<BestGroup>, (group, value)| match best {
            Some(b) if b.value >= value => Some(b),
            _ => Some(BestGroup {
                group: group.clone(),
                value,
            }),
        })
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

fn fixed(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_else(|| "n/a".to_string())
}

/// Files written by [`export_reports`].
#[derive(Debug, Clone, Default)]
pub struct ExportPaths {
    pub reports: Vec<PathBuf>,
    pub summary_json: PathBuf,
    pub summary_csv: PathBuf,
}

/// Write one detailed JSON per group, a summary JSON and a summary CSV
/// into `dir`, all stamped with `timestamp`.
pub fn export_reports(
    dir: &Path,
    reports: &BTreeMap<String, ConsistencyReport>,
    timestamp: &str,
) -> TournamentResult<(ConsistencySummary, ExportPaths)> {
    std::fs::create_dir_all(dir).map_err(|e| TournamentError::io(dir, e))?;

    let mut paths = ExportPaths::default();
    for (group, report) in reports {
        let path = dir.join(format!(
            "consistency_{}_{timestamp}.json",
            sanitize_filename(group)
        ));
        save_document(&path, report)?;
        paths.reports.push(path);
    }

    let summary = ConsistencySummary::from_reports(reports, timestamp);
    paths.summary_json = dir.join(format!("consistency_summary_{timestamp}.json"));
    save_document(&paths.summary_json, &summary)?;

    paths.summary_csv = dir.join(format!("consistency_summary_{timestamp}.csv"));
    let file = std::fs::File::create(&paths.summary_csv)
        .map_err(|e| TournamentError::io(&paths.summary_csv, e))?;
    summary.write_csv(file)?;

    info!(
        dir = %dir.display(),
        groups = reports.len(),
        "consistency reports exported"
    );
    Ok((summary, paths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::{Metric, MatchupConsistency};

    fn report(key: &str, runs: usize, matchup: Option<f64>) -> ConsistencyReport {
        ConsistencyReport {
            group_key: key.into(),
            n_runs: runs,
            tournament_ids: Vec::new(),
            ranking_stability: Metric::insufficient("n/a"),
            win_rate_consistency: Metric::insufficient("n/a"),
            matchup_consistency: match matchup {
                Some(mean_agreement) => Metric::Computed(MatchupConsistency {
                    pairs: BTreeMap::new(),
                    mean_agreement,
                }),
                None => Metric::insufficient("n/a"),
            },
            score_consistency: Metric::insufficient("n/a"),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("org/model:7b"), "org_model_7b");
        assert_eq!(sanitize_filename("a b?c"), "a_b_c");
        assert_eq!(sanitize_filename("phi4"), "phi4");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_best_group_per_metric() {
        let mut reports = BTreeMap::new();
        reports.insert("llama".to_string(), report("llama", 3, Some(0.6)));
        reports.insert("phi4".to_string(), report("phi4", 3, Some(0.9)));
        reports.insert("solo".to_string(), report("solo", 1, None));

        let summary = ConsistencySummary::from_reports(&reports, "20250101_000000");
        let best = &summary.overall_comparison["best_matchup_consistency"];
        assert_eq!(best.group, "phi4");
        assert_eq!(best.value, 0.9);
        assert!(!summary.overall_comparison.contains_key("best_ranking_stability"));
    }

    #[test]
    fn test_single_group_has_no_comparison() {
        let mut reports = BTreeMap::new();
        reports.insert("all".to_string(), report("all", 2, Some(1.0)));
        let summary = ConsistencySummary::from_reports(&reports, "t");
        assert!(summary.overall_comparison.is_empty());
    }

    #[test]
    fn test_csv_has_header_and_empty_cells() {
        let mut reports = BTreeMap::new();
        reports.insert("a,b".to_string(), report("a,b", 2, Some(0.5)));
        let csv = ConsistencySummary::from_reports(&reports, "t").to_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].starts_with("Group,Tournaments,Ranking Stability"));
        assert_eq!(lines[1], "\"a,b\",2,,,,,0.500000,,");
    }

    #[test]
    fn test_csv_quotes_line_breaks_in_group_keys() {
        let mut reports = BTreeMap::new();
        reports.insert("model\rx".to_string(), report("model\rx", 2, None));
        reports.insert("multi\nline".to_string(), report("multi\nline", 2, Some(1.0)));
        let text = ConsistencySummary::from_reports(&reports, "t").to_csv().unwrap();

        assert!(text.contains("\"model\rx\",2,"));
        assert!(text.contains("\"multi\nline\",2,"));

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let groups: Vec<String> = reader
            .records()
            .map(|record| record.unwrap()[0].to_string())
            .collect();
        assert_eq!(groups, vec!["model\rx", "multi\nline"]);
    }

    #[test]
    fn test_export_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut reports = BTreeMap::new();
        reports.insert("org/model".to_string(), report("org/model", 2, Some(1.0)));

        let (summary, paths) = export_reports(dir.path(), &reports, "20250101_000000").unwrap();
        assert_eq!(summary.groups.len(), 1);
        assert_eq!(
            paths.reports[0].file_name().unwrap(),
            "consistency_org_model_20250101_000000.json"
        );
        assert!(paths.summary_json.exists());
        let csv = std::fs::read_to_string(&paths.summary_csv).unwrap();
        assert_eq!(csv.lines().count(), 2);

        let back: ConsistencyReport = crate::store::load_document(&paths.reports[0]).unwrap();
        assert_eq!(back, reports["org/model"]);
    }
}
