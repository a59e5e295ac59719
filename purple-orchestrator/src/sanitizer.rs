//! Metadata sanitizer
//!
//! Validates and normalizes identifiers and free text pulled from the
//! engine before anything leaves the process. A tag document can only be
//! built through [`build_tag_document`], which refuses runs whose id fails
//! validation.

use purple_core::domain::run::{InvalidIdentifier, Run, RunId};
use purple_core::domain::tag::TagDocument;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Maximum length of free-text fields (run name, tenant)
pub const MAX_TEXT_LEN: usize = 256;

/// Default cap on techniques per tag document
pub const DEFAULT_MAX_TECHNIQUES: usize = 500;

/// Limits applied while building tag documents
#[derive(Debug, Clone, Copy)]
pub struct SanitizeLimits {
    pub max_techniques: usize,
    pub max_text_len: usize,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self {
            max_techniques: DEFAULT_MAX_TECHNIQUES,
            max_text_len: MAX_TEXT_LEN,
        }
    }
}

/// Validates a raw run identifier
pub fn run_id(raw: &str) -> Result<RunId, InvalidIdentifier> {
    RunId::parse(raw)
}

static TECHNIQUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^T[0-9]{4}(\.[0-9]{3})?$").expect("technique pattern compiles")
});

/// Checks the ATT&CK technique format `T####` or `T####.###`
pub fn is_valid_technique_id(raw: &str) -> bool {
    TECHNIQUE_RE.is_match(raw)
}

/// Strips characters outside the printable allow-list and truncates
///
/// Allowed: alphanumerics, space, `-`, `_` and `.`. Leading and trailing
/// whitespace is trimmed after filtering.
pub fn clean_text(raw: &str, max_len: usize) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();

    filtered.trim().chars().take(max_len).collect()
}

/// Validates, deduplicates and caps a technique list
///
/// Invalid ids are dropped with a warning; order of first appearance is
/// kept; the result never exceeds `cap` entries.
pub fn techniques<'a>(raw: impl IntoIterator<Item = &'a str>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut valid = Vec::new();
    let mut dropped = 0usize;

    for technique in raw {
        let technique = technique.trim();
        if !is_valid_technique_id(technique) {
            dropped += 1;
            debug!("Dropping malformed technique id {:?}", preview(technique));
            continue;
        }
        if seen.insert(technique) {
            valid.push(technique.to_string());
        }
    }

    if dropped > 0 {
        warn!("Dropped {} malformed technique id(s)", dropped);
    }

    if valid.len() > cap {
        warn!("Truncated {} techniques to {}", valid.len(), cap);
        valid.truncate(cap);
    }

    valid
}

/// Validates and deduplicates tactic labels
///
/// Tactics may contain alphanumerics, spaces and `-` (e.g. `defense-evasion`).
pub fn tactics<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(str::trim)
        .filter(|t| {
            !t.is_empty()
                && t.len() <= 64
                && t.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
        })
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}

/// Builds the tag document for a run snapshot
///
/// Rejects the run if its identifier is invalid; malformed techniques and
/// tactics are dropped without failing the build.
pub fn build_tag_document(run: &Run, limits: SanitizeLimits) -> Result<TagDocument, InvalidIdentifier> {
    let id = run_id(&run.id)?;

    let techniques = techniques(
        run.steps.iter().map(|s| s.technique_id.as_str()),
        limits.max_techniques,
    );
    let tactics = tactics(run.steps.iter().map(|s| s.tactic.as_str()));

    let name = match clean_text(&run.name, limits.max_text_len) {
        name if name.is_empty() => "Unknown".to_string(),
        name => name,
    };
    let tenant = match clean_text(&run.tenant, limits.max_text_len) {
        tenant if tenant.is_empty() => "unknown".to_string(),
        tenant => tenant,
    };

    Ok(TagDocument::new(
        id.to_string(),
        name,
        tenant,
        run.state,
        techniques,
        tactics,
    ))
}

/// Short prefix of untrusted input that is safe to log
pub fn preview(raw: &str) -> String {
    raw.chars().take(16).collect()
}
