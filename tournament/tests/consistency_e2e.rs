//! Consistency analysis over real engine output.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{contenders, engine, framework, settings, ScriptedJudge};
use tournament::consistency::{export_reports, PairOutcome, ALL_GROUP};
use tournament::{ConsistencyAnalyzer, GroupBy, Metric, Tournament};

async fn run(model: &str, ids: &[&str], judge: ScriptedJudge) -> Tournament {
    let (engine, _) = engine(Arc::new(judge), settings(1, false));
    engine
        .with_config_snapshot(json!({"llm": {"default_model": model}}))
        .run(contenders(ids), framework())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_identical_runs_have_perfect_ranking_stability() {
    let mut runs = Vec::new();
    for _ in 0..3 {
        runs.push(run("phi4", &["a", "b", "c", "d"], ScriptedJudge::alphabetical()).await);
    }

    let reports = ConsistencyAnalyzer::new(GroupBy::path("llm.default_model")).analyze(&runs);
    let report = &reports["phi4"];
    assert_eq!(report.n_runs, 3);

    let ranking = report.ranking_stability.value().unwrap();
    assert_eq!(ranking.mean_correlation, 1.0);
    assert_eq!(ranking.min_correlation, 1.0);
    assert_eq!(ranking.pairs_compared, 3);

    let matchups = report.matchup_consistency.value().unwrap();
    assert_eq!(matchups.pairs.len(), 6);
    assert_eq!(matchups.mean_agreement, 1.0);
    assert_eq!(matchups.pairs["a vs d"].dominant_outcome, PairOutcome::FirstWin);

    let win_rates = report.win_rate_consistency.value().unwrap();
    assert_eq!(win_rates.max_std_dev, 0.0);
}

#[tokio::test]
async fn test_disjoint_contender_sets_are_insufficient() {
    let runs = vec![
        run("phi4", &["a", "b"], ScriptedJudge::alphabetical()).await,
        run("phi4", &["c", "d"], ScriptedJudge::alphabetical()).await,
    ];

    let reports = ConsistencyAnalyzer::default().analyze(&runs);
    let report = &reports[ALL_GROUP];
    assert_eq!(report.n_runs, 2);
    assert!(matches!(report.matchup_consistency, Metric::InsufficientData { .. }));
    assert!(matches!(report.ranking_stability, Metric::InsufficientData { .. }));
}

#[tokio::test]
async fn test_reversed_judge_lowers_stability_and_exports() {
    let reverse = || {
        ScriptedJudge::new(|first, second| if first > second { (8.0, 5.0) } else { (5.0, 8.0) })
    };
    let runs = vec![
        run("phi4", &["a", "b", "c"], ScriptedJudge::alphabetical()).await,
        run("phi4", &["a", "b", "c"], ScriptedJudge::alphabetical()).await,
        run("llama", &["a", "b", "c"], ScriptedJudge::alphabetical()).await,
        run("llama", &["a", "b", "c"], reverse()).await,
        run("solo", &["a", "b", "c"], ScriptedJudge::alphabetical()).await,
    ];

    let reports = ConsistencyAnalyzer::new(GroupBy::path("llm.default_model")).analyze(&runs);
    assert_eq!(reports.len(), 3);

    let llama = reports["llama"].ranking_stability.value().unwrap();
    assert_eq!(llama.mean_correlation, -1.0);
    assert_eq!(
        reports["llama"].matchup_consistency.value().unwrap().mean_agreement,
        0.5
    );
    assert!(!reports["solo"].ranking_stability.is_computed());

    let dir = tempfile::tempdir().unwrap();
    let (summary, paths) = export_reports(dir.path(), &reports, "20250101_000000").unwrap();
    assert_eq!(paths.reports.len(), 3);
    assert_eq!(
        summary.overall_comparison["best_ranking_stability"].group,
        "phi4"
    );
    let csv = std::fs::read_to_string(&paths.summary_csv).unwrap();
    assert_eq!(csv.lines().count(), 4);
}
