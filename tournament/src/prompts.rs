//! Prompt templates
//!
//! Templates are markdown with `$name` or `${name}` placeholders; `$$` is a
//! literal dollar sign. Four templates ship built in and can be overridden
//! by `*.md` files from a prompt directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{TournamentError, TournamentResult};

/// Errors raised while rendering a template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Unknown prompt template: {0}")]
    UnknownTemplate(String),

    #[error("Template '{template}' references missing variable '{variable}'")]
    MissingVariable { template: String, variable: String },
}

/// The judge request kinds, each with its own template and response schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    MatchEvaluation,
    ContenderComparison,
    Scoring,
    Validation,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        Self::MatchEvaluation,
        Self::ContenderComparison,
        Self::Scoring,
        Self::Validation,
    ];

    /// Template name, also the key for per-kind model and timeout overrides.
    pub fn template_name(&self) -> &'static str {
        match self {
            Self::MatchEvaluation => "match_evaluation",
            Self::ContenderComparison => "contender_comparison",
            Self::Scoring => "scoring",
            Self::Validation => "validation",
        }
    }

    fn default_template(&self) -> &'static str {
        match self {
            Self::MatchEvaluation => MATCH_EVALUATION_TEMPLATE,
            Self::ContenderComparison => CONTENDER_COMPARISON_TEMPLATE,
            Self::Scoring => SCORING_TEMPLATE,
            Self::Validation => VALIDATION_TEMPLATE,
        }
    }
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.template_name())
    }
}

/// Variables handed to a template.
pub type PromptVars = BTreeMap<&'static str, String>;

/// Capability to turn a template name and variables into prompt text.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, template: &str, vars: &PromptVars) -> Result<String, PromptError>;
}

/// `$$`, `${name}` or `$name`
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|\{(\w+)\}|(\w+))").expect("PLACEHOLDER_RE regex should compile")
});

/// Substitute placeholders in `text`.
pub fn substitute(name: &str, text: &str, vars: &PromptVars) -> Result<String, PromptError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        if caps.get(1).is_some() {
            out.push('$');
            continue;
        }
        let variable = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match vars.get(variable) {
            Some(value) => out.push_str(value),
            None => {
                return Err(PromptError::MissingVariable {
                    template: name.to_string(),
                    variable: variable.to_string(),
                })
            }
        }
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Named templates, seeded with the built-in defaults.
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, String>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateLibrary {
    /// Library holding only the built-in templates.
    pub fn builtin() -> Self {
        let templates = PromptKind::ALL
            .iter()
            .map(|kind| (kind.template_name().to_string(), kind.default_template().to_string()))
            .collect();
        Self { templates }
    }

    /// Built-ins overlaid with every `*.md` file in `dir`.
    ///
    /// A missing directory is not an error; the built-ins are used as is.
    pub fn load_dir(dir: &Path) -> TournamentResult<Self> {
        let mut library = Self::builtin();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "prompt directory missing, using built-in templates");
            return Ok(library);
        }

        let entries = std::fs::read_dir(dir).map_err(|e| TournamentError::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| TournamentError::io(dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path).map_err(|e| TournamentError::io(&path, e))?;
            debug!(template = name, path = %path.display(), "loaded prompt template");
            library.insert(name, text);
        }
        Ok(library)
    }

    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.templates.insert(name.into(), text.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Write the built-in templates into `dir`, leaving existing files alone.
    ///
    /// Returns the paths that were created.
    pub fn write_defaults(dir: &Path) -> TournamentResult<Vec<std::path::PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| TournamentError::io(dir, e))?;
        let mut written = Vec::new();
        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.md", kind.template_name()));
            if path.exists() {
                continue;
            }
            std::fs::write(&path, kind.default_template())
                .map_err(|e| TournamentError::io(&path, e))?;
            info!(path = %path.display(), "created default prompt template");
            written.push(path);
        }
        Ok(written)
    }
}

impl PromptRenderer for TemplateLibrary {
    fn render(&self, template: &str, vars: &PromptVars) -> Result<String, PromptError> {
        let text = self
            .get(template)
            .ok_or_else(|| PromptError::UnknownTemplate(template.to_string()))?;
        substitute(template, text, vars)
    }
}

const MATCH_EVALUATION_TEMPLATE: &str = r#"# Tournament Match Evaluation

## Assessment Framework
$framework_description

$formatted_criteria

$formatted_rules

$formatted_scoring

## Contenders

### Contender 1: $contender1_id
$contender1_content

### Contender 2: $contender2_id
$contender2_content

## Task
Evaluate these two contenders based on the assessment framework. Compare them directly against each other for each criterion.

## Response Format
Respond with a JSON object in the following format:
```json
{
  "criteria_scores": {
    "[criterion_name]": {
      "contender1": [score],
      "contender2": [score]
    }
  },
  "contender1_score": [overall_score],
  "contender2_score": [overall_score],
  "winner": "[$contender1_id or $contender2_id]",
  "rationale": "[detailed explanation]"
}
```

Include every criterion in "criteria_scores". Set "winner" to null for a tie.
The "rationale" should explain your reasoning in detail, highlighting the key differentiating factors.
"#;

const CONTENDER_COMPARISON_TEMPLATE: &str = r#"# Contender Comparison

## Criteria
$formatted_criteria

## Contenders

### Contender 1: $contender1_id
$contender1_content

### Contender 2: $contender2_id
$contender2_content

## Task
Compare these two contenders directly against each other using the provided criteria. For each criterion, determine which contender is stronger and explain why.

## Response Format
Respond with a JSON object in the following format:
```json
{
  "comparisons": [
    {
      "criterion": "[criterion_name]",
      "winner": "[$contender1_id or $contender2_id]",
      "explanation": "[detailed explanation]"
    }
  ],
  "overall_winner": "[$contender1_id or $contender2_id]",
  "rationale": "[detailed explanation]"
}
```
"#;

const SCORING_TEMPLATE: &str = r#"# Scoring Evaluation

## Scoring System
$formatted_scoring

## Evaluation
$evaluation

## Task
Based on the provided evaluation, assign scores according to the scoring system.

## Response Format
Respond with a JSON object in the following format:
```json
{
  "scores": {
    "[criterion_name]": {
      "contender1": [score],
      "contender2": [score]
    }
  },
  "overall_scores": {
    "contender1": [weighted_score],
    "contender2": [weighted_score]
  },
  "winner": "[contender id or null]"
}
```
"#;

const VALIDATION_TEMPLATE: &str = r#"# Response Validation

## Expected Format
The response must be a JSON object matching this JSON schema:
```json
$expected_format
```

## Actual Response
$response

## Task
Validate whether the response matches the expected format. If not, correct it to match the expected format without inventing information that is not present in the response.

## Response Format
Respond with a JSON object in the following format:
```json
{
  "is_valid": [true/false],
  "corrected_response": { },
  "error_message": "[explanation of errors if any]"
}
```
"#;
