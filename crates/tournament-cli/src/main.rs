//! `llm-tournament`: run LLM-judged round-robin tournaments and analyze
//! judge consistency across runs.
//!
//! # Usage
//!
//! ```bash
//! # One tournament, standings printed and saved
//! llm-tournament run --contenders contenders.json --framework framework.json
//!
//! # Five runs per judge model, then a consistency analysis
//! llm-tournament run-many --contenders c.json --framework f.json --runs 5 \
//!     --models phi4 llama3 --analyze
//!
//! # Analyze previously saved runs
//! RUST_LOG=debug llm-tournament analyze --results-dir ./results --group-by llm.default_model
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tournament::{save_document, TemplateLibrary, TournamentStatus};
use tournament_cli::commands::{self, Batch};
use tournament_cli::report::{standings_table, tournament_summary};
use tournament_cli::transport::build_transport;
use tournament_cli::AppConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single tournament
    Run(RunArgs),
    /// Run several tournaments per judge model for consistency analysis
    RunMany(RunManyArgs),
    /// Analyze judge consistency across saved tournaments
    Analyze(AnalyzeArgs),
    /// Write the default prompt templates
    InitPrompts {
        /// Target directory (defaults to prompts.directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Contenders document
    #[arg(long)]
    contenders: PathBuf,

    /// Assessment framework document
    #[arg(long)]
    framework: PathBuf,

    /// Rounds per matchup (overrides tournament.rounds_per_matchup)
    #[arg(long)]
    rounds: Option<u32>,

    /// Concurrent judge calls (overrides tournament.workers)
    #[arg(long)]
    workers: Option<usize>,

    /// Do not schedule reverse matchups
    #[arg(long, default_value_t = false)]
    no_reverse: bool,

    /// Stop starting new matches after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Judge model (overrides llm.default_model)
    #[arg(long)]
    model: Option<String>,

    /// Output document (overrides output.results_file)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunManyArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Tournaments per model
    #[arg(long, default_value_t = 3)]
    runs: u32,

    /// Judge models (defaults to llm.default_model)
    #[arg(long, num_args = 1..)]
    models: Vec<String>,

    /// Directory for tournament documents (overrides output.results_dir)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Analyze the new runs grouped by judge model
    #[arg(long, default_value_t = false)]
    analyze: bool,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Directory with tournament documents (overrides output.results_dir)
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// File name pattern, `*` as wildcard
    #[arg(long, default_value = tournament::store::TOURNAMENT_PATTERN)]
    pattern: String,

    /// Dotted config path to group by, e.g. llm.default_model
    #[arg(long)]
    group_by: Option<String>,

    /// Directory for analysis exports (overrides output.analysis_dir)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl InputArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(rounds) = self.rounds {
            config.tournament.rounds_per_matchup = rounds;
        }
        if let Some(workers) = self.workers {
            config.tournament.workers = workers;
        }
        if self.no_reverse {
            config.tournament.reverse_matchups = false;
        }
        if self.deadline_secs.is_some() {
            config.tournament.deadline_secs = self.deadline_secs;
        }
    }
}

/// Cancel `token` on the first Ctrl-C; in-flight matches still finish.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight matches");
            token.cancel();
        }
    });
}

async fn run(config: AppConfig, args: RunArgs) -> Result<()> {
    let mut config = config;
    args.inputs.apply(&mut config);
    if let Some(model) = args.model {
        config.llm.default_model = model;
    }
    config.validate()?;

    let (contenders, framework) =
        commands::load_inputs(&args.inputs.contenders, &args.inputs.framework)?;
    let templates = commands::load_templates(&config)?;
    let transport = build_transport(&config.llm)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let tournament =
        commands::run_tournament(&config, transport, templates, contenders, framework, cancel)
            .await?;

    let output = args.output.unwrap_or_else(|| config.output.results_file.clone());
    save_document(&output, &tournament)?;

    println!("{}", standings_table(&tournament.standings));
    println!("{}", tournament_summary(&tournament));
    info!(path = %output.display(), "results saved");
    if tournament.status == TournamentStatus::Aborted {
        warn!("tournament was stopped early; standings are partial");
    }
    Ok(())
}

async fn run_many(config: AppConfig, args: RunManyArgs) -> Result<()> {
    let mut config = config;
    args.inputs.apply(&mut config);
    config.validate()?;

    let (contenders, framework) =
        commands::load_inputs(&args.inputs.contenders, &args.inputs.framework)?;
    let templates = commands::load_templates(&config)?;
    let transport = build_transport(&config.llm)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let batch = Batch {
        models: if args.models.is_empty() {
            vec![config.llm.default_model.clone()]
        } else {
            args.models
        },
        runs: args.runs,
        output_dir: args
            .output_dir
            .unwrap_or_else(|| config.output.results_dir.clone()),
    };
    let saved = commands::run_many(
        &config,
        transport,
        templates,
        &contenders,
        &framework,
        &batch,
        cancel,
    )
    .await?;
    info!(saved = saved.len(), dir = %batch.output_dir.display(), "runs complete");

    if args.analyze {
        let (summary, _) = commands::analyze(
            &batch.output_dir,
            tournament::store::TOURNAMENT_PATTERN,
            Some("llm.default_model"),
            &config.output.analysis_dir,
        )?;
        println!("{}", summary.to_table());
    }
    Ok(())
}

fn analyze(config: AppConfig, args: AnalyzeArgs) -> Result<()> {
    let results_dir = args
        .results_dir
        .unwrap_or_else(|| config.output.results_dir.clone());
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| config.output.analysis_dir.clone());
    let (summary, paths) = commands::analyze(
        &results_dir,
        &args.pattern,
        args.group_by.as_deref(),
        &output_dir,
    )?;
    println!("{}", summary.to_table());
    info!(csv = %paths.summary_csv.display(), "summary written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .init();

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::RunMany(args) => run_many(config, args).await,
        Command::Analyze(args) => analyze(config, args),
        Command::InitPrompts { dir } => {
            let dir = dir.unwrap_or_else(|| config.prompts.directory.clone());
            let written = TemplateLibrary::write_defaults(&dir)?;
            info!(dir = %dir.display(), written = written.len(), "default templates written");
            Ok(())
        }
    }
}
