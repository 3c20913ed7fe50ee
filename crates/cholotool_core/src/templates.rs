//! Block templates stored as JSON files under the project's templates directory.
//!
//! A template file is either an Elementor export object (`{"version", "title",
//! "type", "content": [...]}`) or a bare list of nodes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::document::{Document, ElementNode};

pub const TEMPLATE_EXPORT_VERSION: &str = "0.4";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateExport {
    #[serde(default = "default_export_version")]
    pub version: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default = "default_export_type")]
    pub kind: String,
    pub content: Vec<ElementNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_settings: Option<Value>,
}

fn default_export_version() -> String {
    TEMPLATE_EXPORT_VERSION.to_string()
}

fn default_export_type() -> String {
    "page".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateSource {
    Export(TemplateExport),
    Bare(Vec<ElementNode>),
}

#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub path: PathBuf,
    pub title: String,
    pub document: Document,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateEntry {
    pub name: String,
    pub path: PathBuf,
    pub title: Option<String>,
    pub nodes: Option<usize>,
    pub error: Option<String>,
}

pub fn parse_template(text: &str) -> Result<(Option<String>, Document)> {
    let source: TemplateSource = serde_json::from_str(text.trim())
        .context("template must be an Elementor export object or a list of elements")?;
    Ok(match source {
        TemplateSource::Export(export) => {
            let title = Some(export.title).filter(|title| !title.is_empty());
            (title, Document::new(export.content))
        }
        TemplateSource::Bare(nodes) => (None, Document::new(nodes)),
    })
}

/// `name` may be a path, a file name inside `templates_dir`, or a file stem.
pub fn resolve_template_path(templates_dir: &Path, name: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(name);
    if direct.is_file() {
        return Ok(direct);
    }
    let candidates = [
        templates_dir.join(name),
        templates_dir.join(format!("{name}.json")),
    ];
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    bail!(
        "template {name} not found (looked in {})",
        templates_dir.display()
    )
}

pub fn load_template(templates_dir: &Path, name: &str) -> Result<LoadedTemplate> {
    let path = resolve_template_path(templates_dir, name)?;
    let text =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let (title, document) =
        parse_template(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    let title = title.unwrap_or_else(|| template_name(&path));
    Ok(LoadedTemplate {
        path,
        title,
        document,
    })
}

pub fn list_templates(templates_dir: &Path) -> Result<Vec<TemplateEntry>> {
    if !templates_dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in WalkDir::new(templates_dir).follow_links(false).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("failed to walk {}", templates_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|text| parse_template(&text));
        let (title, nodes, error) = match parsed {
            Ok((title, document)) => (title, Some(document.stats().total_nodes), None),
            Err(error) => (None, None, Some(format!("{error:#}"))),
        };
        entries.push(TemplateEntry {
            name: template_name(path),
            path: path.to_path_buf(),
            title,
            nodes,
            error,
        });
    }
    Ok(entries)
}

pub fn save_template(path: &Path, title: &str, document: &Document) -> Result<()> {
    let export = TemplateExport {
        version: TEMPLATE_EXPORT_VERSION.to_string(),
        title: title.to_string(),
        kind: default_export_type(),
        content: document.elements.clone(),
        page_settings: None,
    };
    let mut text =
        serde_json::to_string_pretty(&export).context("failed to serialize template")?;
    text.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn template_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}
