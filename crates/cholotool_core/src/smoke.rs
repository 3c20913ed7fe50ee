use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::http::{Fetch, parse_url};

/// Markers PHP and WordPress print when a page failed to render.
pub const DEFAULT_FORBIDDEN: &[&str] = &[
    "Fatal error",
    "Parse error",
    "Warning:",
    "Notice:",
    "There has been a critical error",
    "Elementor\\Core\\",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeCheck {
    pub url: String,
    #[serde(default)]
    pub expect: Vec<String>,
    #[serde(default)]
    pub forbid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SmokeFile {
    #[serde(default, rename = "check")]
    checks: Vec<SmokeCheck>,
}

pub fn parse_checks(text: &str) -> Result<Vec<SmokeCheck>> {
    let parsed: SmokeFile = toml::from_str(text).context("invalid smoke check file")?;
    Ok(parsed.checks)
}

pub fn load_checks(path: &Path) -> Result<Vec<SmokeCheck>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_checks(&text).with_context(|| format!("failed to parse {}", path.display()))
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeResult {
    pub url: String,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub bytes: usize,
    pub missing: Vec<String>,
    pub forbidden_found: Vec<String>,
    pub error: Option<String>,
    pub passed: bool,
}

/// Fetch every check's URL. Request failures are recorded per check, not raised.
pub fn run_smoke(fetch: &mut dyn Fetch, checks: &[SmokeCheck]) -> Vec<SmokeResult> {
    checks.iter().map(|check| run_check(fetch, check)).collect()
}

fn run_check(fetch: &mut dyn Fetch, check: &SmokeCheck) -> SmokeResult {
    let page = parse_url(&check.url).and_then(|url| fetch.fetch(&url));
    let page = match page {
        Ok(page) => page,
        Err(error) => {
            warn!(url = %check.url, error = %format!("{error:#}"), "smoke request failed");
            return SmokeResult {
                url: check.url.clone(),
                status: None,
                elapsed_ms: 0,
                bytes: 0,
                missing: check.expect.clone(),
                forbidden_found: Vec::new(),
                error: Some(format!("{error:#}")),
                passed: false,
            };
        }
    };

    let body = page.text();
    let missing: Vec<String> = check
        .expect
        .iter()
        .filter(|needle| !body.contains(needle.as_str()))
        .cloned()
        .collect();
    let forbidden_found: Vec<String> = DEFAULT_FORBIDDEN
        .iter()
        .map(|marker| (*marker).to_string())
        .chain(check.forbid.iter().cloned())
        .filter(|needle| body.contains(needle.as_str()))
        .collect();
    let passed = page.is_success() && missing.is_empty() && forbidden_found.is_empty();

    SmokeResult {
        url: check.url.clone(),
        status: Some(page.status),
        elapsed_ms: page.elapsed_ms,
        bytes: page.body.len(),
        missing,
        forbidden_found,
        error: None,
        passed,
    }
}
