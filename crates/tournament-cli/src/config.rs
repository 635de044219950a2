//! Application configuration
//!
//! Resolution order, later wins:
//!
//! 1. built-in defaults
//! 2. TOML file (`--config`), every section optional
//! 3. `LLM_TOURNAMENT_*` environment variables
//! 4. command-line flags (applied by the caller)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use tournament::prompts::PromptKind;
use tournament::{EngineSettings, JudgeSettings, PointSystem, RetryPolicy, ScheduleSettings};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LLM_TOURNAMENT_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Ollama `/api/generate`
    #[default]
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint
    #[serde(alias = "openai-compatible")]
    Openai,
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai-compatible" => Ok(Self::Openai),
            other => bail!("unknown provider '{other}' (expected ollama or openai)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentSection {
    pub rounds_per_matchup: u32,
    pub reverse_matchups: bool,
    pub point_system: PointSystem,
    pub workers: usize,
    pub draw_epsilon: f64,
    pub deadline_secs: Option<u64>,
}

impl Default for TournamentSection {
    fn default() -> Self {
        Self {
            rounds_per_matchup: 1,
            reverse_matchups: true,
            point_system: PointSystem::default(),
            workers: 2,
            draw_epsilon: 0.0,
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: Provider,
    /// Defaults per provider when unset
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub timeout_secs: u64,
    /// Timeout per prompt kind, keyed by template name
    pub timeouts: BTreeMap<String, u64>,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub temperature: f32,
    /// Model per prompt kind, keyed by template name
    pub model_mapping: BTreeMap<String, String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            base_url: None,
            api_key: None,
            default_model: "phi4".to_string(),
            timeout_secs: 60,
            timeouts: BTreeMap::new(),
            max_retries: 3,
            retry_delay_secs: 5,
            temperature: 0.1,
            model_mapping: BTreeMap::new(),
        }
    }
}

impl LlmSection {
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url,
            (None, Provider::Ollama) => "http://localhost:11434",
            (None, Provider::Openai) => "http://localhost:8000/v1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsSection {
    pub directory: PathBuf,
}

impl Default for PromptsSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./prompts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub results_file: PathBuf,
    pub results_dir: PathBuf,
    pub analysis_dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            results_file: PathBuf::from("./results/tournament_results.json"),
            results_dir: PathBuf::from("./results"),
            analysis_dir: PathBuf::from("./analysis_results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tournament: TournamentSection,
    pub llm: LlmSection,
    pub prompts: PromptsSection,
    pub output: OutputSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Defaults, then the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `LLM_TOURNAMENT_<SECTION>_<KEY>` overrides. Unrelated
    /// variables are ignored; a recognised key with a bad value is an error.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let parse_err = || format!("Invalid value for {key}: '{value}'");
            match name {
                "LLM_PROVIDER" => self.llm.provider = value.parse().with_context(parse_err)?,
                "LLM_BASE_URL" => self.llm.base_url = Some(value.clone()),
                "LLM_API_KEY" => self.llm.api_key = Some(value.clone()),
                "LLM_DEFAULT_MODEL" => self.llm.default_model = value.clone(),
                "LLM_TIMEOUT_SECS" => self.llm.timeout_secs = value.parse().with_context(parse_err)?,
                "LLM_MAX_RETRIES" => self.llm.max_retries = value.parse().with_context(parse_err)?,
                "LLM_RETRY_DELAY_SECS" => {
                    self.llm.retry_delay_secs = value.parse().with_context(parse_err)?
                }
                "TOURNAMENT_WORKERS" => {
                    self.tournament.workers = value.parse().with_context(parse_err)?
                }
                "PROMPTS_DIRECTORY" => self.prompts.directory = PathBuf::from(&value),
                "LOGGING_LEVEL" => self.logging.level = value.clone(),
                _ => {
                    debug!(key = %key, "ignoring unknown override");
                    continue;
                }
            }
            debug!(key = %key, "config override from environment");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.default_model.trim().is_empty() {
            bail!("llm.default_model must not be empty");
        }
        if self.tournament.rounds_per_matchup == 0 {
            bail!("tournament.rounds_per_matchup must be at least 1");
        }
        for name in self.llm.model_mapping.keys().chain(self.llm.timeouts.keys()) {
            prompt_kind(name)?;
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let t = &self.tournament;
        EngineSettings {
            schedule: ScheduleSettings {
                rounds_per_matchup: t.rounds_per_matchup,
                reverse_matchups: t.reverse_matchups,
            },
            points: t.point_system,
            workers: t.workers.max(1),
            draw_epsilon: t.draw_epsilon,
            deadline: t.deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn judge_settings(&self) -> Result<JudgeSettings> {
        let llm = &self.llm;
        let mut model_mapping = BTreeMap::new();
        for (name, model) in &llm.model_mapping {
            model_mapping.insert(prompt_kind(name)?, model.clone());
        }
        let mut timeouts = BTreeMap::new();
        for (name, secs) in &llm.timeouts {
            timeouts.insert(prompt_kind(name)?, Duration::from_secs(*secs));
        }
        Ok(JudgeSettings {
            default_model: llm.default_model.clone(),
            model_mapping,
            timeout: Duration::from_secs(llm.timeout_secs),
            timeouts,
            retry: RetryPolicy::new(llm.max_retries, Duration::from_secs(llm.retry_delay_secs)),
        })
    }

    /// Configuration as recorded in each tournament document. The API key
    /// is never serialized.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn prompt_kind(name: &str) -> Result<PromptKind> {
    PromptKind::ALL
        .into_iter()
        .find(|kind| kind.template_name() == name)
        .with_context(|| format!("unknown prompt kind '{name}'"))
}
