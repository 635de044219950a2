//! JSON document store
//!
//! Thin load/save helpers over `serde_json`. Input documents (contenders,
//! framework) map malformed content to `Validation` errors; the tournament
//! loader skips unreadable files so one corrupt result cannot block an
//! analysis run.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::Tournament;
use crate::error::{TournamentError, TournamentResult};
use crate::model::{AssessmentFramework, Contender, ContendersDocument, FrameworkDocument};

/// Default file pattern for sealed tournament documents
pub const TOURNAMENT_PATTERN: &str = "tournament_*.json";

/// Load any JSON document.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> TournamentResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| TournamentError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Save pretty-printed JSON, creating parent directories.
pub fn save_document<T: Serialize>(path: &Path, document: &T) -> TournamentResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TournamentError::io(parent, e))?;
    }
    let text = serde_json::to_string_pretty(document)?;
    std::fs::write(path, text).map_err(|e| TournamentError::io(path, e))?;
    debug!(path = %path.display(), "document saved");
    Ok(())
}

fn load_input<T: DeserializeOwned>(path: &Path, what: &str) -> TournamentResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| TournamentError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| {
        TournamentError::validation(format!("malformed {what} document {}: {e}", path.display()))
    })
}

/// Load `{contenders: [...]}`.
pub fn load_contenders(path: &Path) -> TournamentResult<Vec<Contender>> {
    let document: ContendersDocument = load_input(path, "contenders")?;
    if let Some(empty) = document.contenders.iter().find(|c| c.id.trim().is_empty()) {
        return Err(TournamentError::validation(format!(
            "contender with empty id in {} (content starts {:?})",
            path.display(),
            empty.content.chars().take(40).collect::<String>()
        )));
    }
    Ok(document.contenders)
}

/// Load `{assessment_framework: {...}}`.
pub fn load_framework(path: &Path) -> TournamentResult<AssessmentFramework> {
    let document: FrameworkDocument = load_input(path, "framework")?;
    Ok(document.assessment_framework)
}

/// Translate a `*`-wildcard file pattern into an anchored regex.
fn pattern_regex(pattern: &str) -> TournamentResult<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| TournamentError::config(format!("invalid file pattern '{pattern}': {e}")))
}

/// Load every tournament document in `dir` whose file name matches
/// `pattern`, sorted by file name. Unreadable files are skipped.
pub fn load_tournaments(dir: &Path, pattern: &str) -> TournamentResult<Vec<(PathBuf, Tournament)>> {
    let matcher = pattern_regex(pattern)?;
    let entries = std::fs::read_dir(dir).map_err(|e| TournamentError::io(dir, e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| matcher.is_match(name))
        })
        .collect();
    paths.sort();

    let mut tournaments = Vec::with_capacity(paths.len());
    for path in paths {
        match load_document::<Tournament>(&path) {
            Ok(tournament) => tournaments.push((path, tournament)),
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable tournament"),
        }
    }
    debug!(dir = %dir.display(), pattern, count = tournaments.len(), "tournaments loaded");
    Ok(tournaments)
}
