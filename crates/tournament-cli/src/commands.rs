//! Subcommand implementations, independent of argument parsing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tournament::consistency::{export_reports, sanitize_filename, ExportPaths};
use tournament::{
    load_contenders, load_framework, load_tournaments, save_document, AssessmentFramework,
    ConsistencyAnalyzer, ConsistencySummary, Contender, GroupBy, JudgeClient, JudgeTransport,
    TemplateLibrary, Tournament, TournamentEngine, TournamentEvent,
};

use crate::config::AppConfig;
use crate::report::progress_line;

/// `YYYYmmdd_HHMMSS`, used in output file names.
pub fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Contenders and framework from their input documents.
pub fn load_inputs(
    contenders: &Path,
    framework: &Path,
) -> Result<(Vec<Contender>, AssessmentFramework)> {
    let contenders = load_contenders(contenders)
        .with_context(|| format!("Failed to load contenders from {}", contenders.display()))?;
    let framework = load_framework(framework)
        .with_context(|| format!("Failed to load framework from {}", framework.display()))?;
    Ok((contenders, framework))
}

/// Built-in templates overlaid with the configured prompt directory.
pub fn load_templates(config: &AppConfig) -> Result<Arc<TemplateLibrary>> {
    let library = TemplateLibrary::load_dir(&config.prompts.directory).with_context(|| {
        format!(
            "Failed to load prompt templates from {}",
            config.prompts.directory.display()
        )
    })?;
    Ok(Arc::new(library))
}

/// Run one tournament, logging each finished match.
pub async fn run_tournament(
    config: &AppConfig,
    transport: Arc<dyn JudgeTransport>,
    templates: Arc<TemplateLibrary>,
    contenders: Vec<Contender>,
    framework: AssessmentFramework,
    cancel: CancellationToken,
) -> Result<Tournament> {
    let judge = JudgeClient::new(transport, templates.clone(), config.judge_settings()?);
    let engine = TournamentEngine::new(Arc::new(judge), templates, config.engine_settings())
        .with_cancel_token(cancel)
        .with_config_snapshot(config.snapshot());

    let mut events = engine.subscribe();
    let progress = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                TournamentEvent::Started {
                    tournament_id,
                    matches_total,
                    ..
                } => info!(%tournament_id, matches_total, "tournament started"),
                TournamentEvent::Progress(progress) => info!("{}", progress_line(&progress)),
                TournamentEvent::Finished { .. } => break,
            }
        }
    });

    let outcome = engine.run(contenders, framework).await;
    drop(engine);
    if let Err(err) = progress.await {
        warn!(error = %err, "progress logger stopped unexpectedly");
    }
    Ok(outcome?)
}

/// Repeated runs for consistency analysis.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Judge models; each one gets `runs` tournaments
    pub models: Vec<String>,
    pub runs: u32,
    pub output_dir: PathBuf,
}

/// Run every tournament in `batch` and save each document.
///
/// Stops early, keeping what was already saved, once `cancel` fires.
pub async fn run_many(
    config: &AppConfig,
    transport: Arc<dyn JudgeTransport>,
    templates: Arc<TemplateLibrary>,
    contenders: &[Contender],
    framework: &AssessmentFramework,
    batch: &Batch,
    cancel: CancellationToken,
) -> Result<Vec<PathBuf>> {
    let Batch {
        models,
        runs,
        output_dir,
    } = batch;
    let stamp = timestamp();
    let mut saved = Vec::new();

    'models: for model in models {
        let mut model_config = config.clone();
        model_config.llm.default_model = model.clone();
        model_config.llm.model_mapping.clear();

        for run in 1..=*runs {
            if cancel.is_cancelled() {
                warn!(model, run, "cancelled, skipping remaining runs");
                break 'models;
            }
            info!(model, run, runs, "starting run");
            let tournament = run_tournament(
                &model_config,
                transport.clone(),
                templates.clone(),
                contenders.to_vec(),
                framework.clone(),
                cancel.clone(),
            )
            .await?;

            let path = output_dir.join(format!(
                "tournament_{}_{stamp}_run{run}.json",
                sanitize_filename(model)
            ));
            save_document(&path, &tournament)?;
            info!(path = %path.display(), status = %tournament.status, "run saved");
            saved.push(path);
        }
    }
    Ok(saved)
}

/// Load sealed documents, analyze them and write the exports.
pub fn analyze(
    results_dir: &Path,
    pattern: &str,
    group_by: Option<&str>,
    output_dir: &Path,
) -> Result<(ConsistencySummary, ExportPaths)> {
    let loaded = load_tournaments(results_dir, pattern)
        .with_context(|| format!("Failed to read results from {}", results_dir.display()))?;
    if loaded.is_empty() {
        anyhow::bail!(
            "no tournament documents matching '{pattern}' in {}",
            results_dir.display()
        );
    }
    let tournaments: Vec<Tournament> = loaded.into_iter().map(|(_, t)| t).collect();

    let group_by = group_by.map(GroupBy::path).unwrap_or_default();
    let reports = ConsistencyAnalyzer::new(group_by).analyze(&tournaments);
    let (summary, paths) = export_reports(output_dir, &reports, &timestamp())?;
    info!(
        groups = reports.len(),
        summary = %paths.summary_json.display(),
        "analysis exported"
    );
    Ok((summary, paths))
}
