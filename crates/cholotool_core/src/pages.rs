//! Operations on a single post's Elementor data.
//!
//! Every mutation funnels through [`write_document`] (or [`write_raw`] for restores),
//! which snapshots the previous `_elementor_data` into the local ledger, writes the new
//! value, keeps `_elementor_edit_mode`/`_elementor_version` consistent and purges the
//! post's generated CSS.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use similar::TextDiff;
use tracing::{debug, info};

use crate::backup::{BackupLedger, Snapshot};
use crate::builder::{ServiceCard, ServiceCardStyle, build_service_cards};
use crate::document::{Document, DocumentStats};
use crate::ids::{IdGenerator, regenerate_ids};
use crate::repair::{RepairOptions, RepairReport, repair_raw};
use crate::store::{
    ELEMENTOR_META_KEYS, META_CSS, META_DATA, META_EDIT_MODE, META_VERSION, PostMetaStore,
    PostSummary,
};
use crate::templates::{LoadedTemplate, save_template};
use crate::validate::{ValidationReport, WidgetRegistry, validate};
use crate::walk::{
    SettingHit, find_node, find_settings_with_prefix, remove_settings_with_prefix, set_setting,
    visit_mut,
};

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub reason: String,
    pub dry_run: bool,
    pub no_backup: bool,
    pub elementor_version: String,
}

impl WriteOptions {
    pub fn new(reason: impl Into<String>, elementor_version: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            dry_run: false,
            no_backup: false,
            elementor_version: elementor_version.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub post_id: u64,
    pub dry_run: bool,
    pub changed: bool,
    pub bytes: usize,
    pub snapshot_id: Option<i64>,
    pub css_rows_purged: u64,
    pub diff: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub post: PostSummary,
    pub raw: String,
    pub document: Document,
}

pub fn load_post(store: &mut dyn PostMetaStore, post_id: u64) -> Result<PostSummary> {
    store
        .post(post_id)?
        .ok_or_else(|| anyhow::anyhow!("post {post_id} does not exist"))
}

/// Post summary plus the raw `_elementor_data` text, without parsing it.
pub fn load_raw(store: &mut dyn PostMetaStore, post_id: u64) -> Result<(PostSummary, String)> {
    let post = load_post(store, post_id)?;
    let Some(raw) = store.get_meta(post_id, META_DATA)? else {
        bail!("post {post_id} ({}) has no {META_DATA}", post.title);
    };
    Ok((post, raw))
}

pub fn load_document(store: &mut dyn PostMetaStore, post_id: u64) -> Result<LoadedDocument> {
    let (post, raw) = load_raw(store, post_id)?;
    let document = Document::parse(&raw)
        .with_context(|| format!("failed to parse {META_DATA} of post {post_id}"))?;
    Ok(LoadedDocument {
        post,
        raw,
        document,
    })
}

pub fn write_document(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    document: &Document,
    options: &WriteOptions,
) -> Result<WriteOutcome> {
    let text = document.to_json()?;
    write_raw(store, ledger, post_id, Some(&text), options)
}

/// Write `value` as the post's `_elementor_data`; `None` removes the row.
pub fn write_raw(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    value: Option<&str>,
    options: &WriteOptions,
) -> Result<WriteOutcome> {
    let previous = store.get_meta(post_id, META_DATA)?;
    let changed = previous.as_deref() != value;
    let bytes = value.map_or(0, str::len);

    if !changed && !options.dry_run {
        debug!(post_id, "Elementor data unchanged; skipping write");
        return Ok(WriteOutcome {
            post_id,
            dry_run: false,
            changed: false,
            bytes,
            snapshot_id: None,
            css_rows_purged: 0,
            diff: None,
        });
    }

    if options.dry_run {
        return Ok(WriteOutcome {
            post_id,
            dry_run: true,
            changed,
            bytes,
            snapshot_id: None,
            css_rows_purged: 0,
            diff: Some(render_diff(previous.as_deref(), value)),
        });
    }

    let snapshot_id = if options.no_backup {
        None
    } else {
        Some(ledger.record(post_id, META_DATA, previous.as_deref(), &options.reason)?)
    };

    match value {
        Some(text) => store.set_meta(post_id, META_DATA, text)?,
        None => {
            store.delete_meta(post_id, META_DATA)?;
        }
    }
    if value.is_some() {
        store.set_meta(post_id, META_EDIT_MODE, "builder")?;
        if store.get_meta(post_id, META_VERSION)?.is_none() {
            store.set_meta(post_id, META_VERSION, &options.elementor_version)?;
        }
    }
    let css_rows_purged = store.delete_meta(post_id, META_CSS)?;
    info!(
        post_id,
        bytes,
        reason = %options.reason,
        snapshot = ?snapshot_id,
        "wrote Elementor data"
    );

    Ok(WriteOutcome {
        post_id,
        dry_run: false,
        changed,
        bytes,
        snapshot_id,
        css_rows_purged,
        diff: None,
    })
}

/// Unified diff of pretty-printed JSON; unparsable text is diffed as-is.
pub fn render_diff(before: Option<&str>, after: Option<&str>) -> String {
    let old = before.map(pretty_or_raw).unwrap_or_default();
    let new = after.map(pretty_or_raw).unwrap_or_default();
    let diff = TextDiff::from_lines(old.as_str(), new.as_str());
    diff.unified_diff()
        .context_radius(3)
        .header("stored", "proposed")
        .to_string()
}

fn pretty_or_raw(text: &str) -> String {
    let mut rendered = match Document::parse(text).and_then(|document| document.to_json_pretty()) {
        Ok(pretty) => pretty,
        Err(_) => text.to_string(),
    };
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    rendered
}

#[derive(Debug, Clone, Serialize)]
pub struct PageInspection {
    pub post: PostSummary,
    pub stats: DocumentStats,
    pub data_bytes: usize,
    pub meta_keys: Vec<String>,
    pub elementor_version: Option<String>,
    pub edit_mode: Option<String>,
}

pub fn inspect_page(store: &mut dyn PostMetaStore, post_id: u64) -> Result<PageInspection> {
    let loaded = load_document(store, post_id)?;
    let mut meta_keys = Vec::new();
    for key in ELEMENTOR_META_KEYS {
        if store.get_meta(post_id, key)?.is_some() {
            meta_keys.push((*key).to_string());
        }
    }
    Ok(PageInspection {
        stats: loaded.document.stats(),
        data_bytes: loaded.raw.len(),
        elementor_version: store.get_meta(post_id, META_VERSION)?,
        edit_mode: store.get_meta(post_id, META_EDIT_MODE)?,
        post: loaded.post,
        meta_keys,
    })
}

pub fn validate_page(
    store: &mut dyn PostMetaStore,
    post_id: u64,
    registry: &WidgetRegistry,
) -> Result<(PostSummary, ValidationReport)> {
    let loaded = load_document(store, post_id)?;
    let report = validate(&loaded.document, registry);
    Ok((loaded.post, report))
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub title: String,
    pub nodes: usize,
}

/// Write the page as an Elementor template file. `output` is a file path, or a
/// directory that receives `page-<id>.json`.
pub fn export_page(
    store: &mut dyn PostMetaStore,
    post_id: u64,
    output: &Path,
) -> Result<ExportReport> {
    let loaded = load_document(store, post_id)?;
    let path = if output.extension().is_some_and(|ext| ext == "json") {
        output.to_path_buf()
    } else {
        output.join(format!("page-{post_id}.json"))
    };
    let title = if loaded.post.title.is_empty() {
        format!("Page {post_id}")
    } else {
        loaded.post.title.clone()
    };
    save_template(&path, &title, &loaded.document)?;
    Ok(ExportReport {
        path,
        title,
        nodes: loaded.document.stats().total_nodes,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Replace,
    Append,
    Prepend,
}

impl FromStr for ImportMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            other => bail!("unknown import mode {other} (expected replace, append or prepend)"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub template_title: String,
    pub inserted_top_level: usize,
    pub write: WriteOutcome,
}

pub fn import_template(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    template: &LoadedTemplate,
    mode: ImportMode,
    ids: &mut IdGenerator,
    options: &WriteOptions,
) -> Result<ImportOutcome> {
    if template.document.is_empty() {
        bail!("template {} has no elements", template.path.display());
    }
    let mut document = match mode {
        ImportMode::Replace => {
            load_post(store, post_id)?;
            Document::default()
        }
        ImportMode::Append | ImportMode::Prepend => load_document(store, post_id)?.document,
    };
    ids.reserve_document(&document);

    let mut incoming = template.document.elements.clone();
    regenerate_ids(&mut incoming, ids);
    let inserted_top_level = incoming.len();
    match mode {
        ImportMode::Replace | ImportMode::Append => document.elements.extend(incoming),
        ImportMode::Prepend => {
            incoming.extend(std::mem::take(&mut document.elements));
            document.elements = incoming;
        }
    }

    let write = write_document(store, ledger, post_id, &document, options)?;
    Ok(ImportOutcome {
        template_title: template.title.clone(),
        inserted_top_level,
        write,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardPlacement {
    Append,
    Prepend,
    /// Replace the element with this id.
    Replace(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CardsOutcome {
    pub section_id: String,
    pub cards: usize,
    pub write: WriteOutcome,
}

#[allow(clippy::too_many_arguments)]
pub fn apply_service_cards(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    cards: &[ServiceCard],
    style: &ServiceCardStyle,
    placement: &CardPlacement,
    ids: &mut IdGenerator,
    options: &WriteOptions,
) -> Result<CardsOutcome> {
    let mut document = load_document(store, post_id)?.document;
    ids.reserve_document(&document);
    let section = build_service_cards(cards, style, ids)?;
    let section_id = section.id.clone();

    match placement {
        CardPlacement::Append => document.elements.push(section),
        CardPlacement::Prepend => document.elements.insert(0, section),
        CardPlacement::Replace(target) => {
            let Some(index) = document.elements.iter().position(|node| &node.id == target) else {
                require_element(&document, target)?;
                bail!("element {target} is nested; service cards can only replace a top-level element");
            };
            let old = std::mem::replace(&mut document.elements[index], section);
            info!(post_id, replaced = %old.id, kind = %old.kind, "replacing element with service cards");
        }
    }

    let write = write_document(store, ledger, post_id, &document, options)?;
    Ok(CardsOutcome {
        section_id,
        cards: cards.len(),
        write,
    })
}

pub fn find_keys(
    store: &mut dyn PostMetaStore,
    post_id: u64,
    prefix: &str,
) -> Result<Vec<SettingHit>> {
    let loaded = load_document(store, post_id)?;
    Ok(find_settings_with_prefix(&loaded.document, prefix))
}

/// Values that do not parse as JSON are stored as plain strings.
pub fn parse_setting_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct SetKeyOutcome {
    pub previous: Option<Value>,
    pub write: WriteOutcome,
}

#[allow(clippy::too_many_arguments)]
pub fn set_key(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    element_id: &str,
    key: &str,
    value: Value,
    options: &WriteOptions,
) -> Result<SetKeyOutcome> {
    if key.trim().is_empty() {
        bail!("setting key must not be empty");
    }
    let mut document = load_document(store, post_id)?.document;
    let previous = set_setting(&mut document, element_id, key, value)?;
    let write = write_document(store, ledger, post_id, &document, options)?;
    Ok(SetKeyOutcome { previous, write })
}

#[derive(Debug, Clone, Serialize)]
pub struct StripOutcome {
    pub removed: usize,
    pub write: Option<WriteOutcome>,
}

/// Remove settings starting with `prefix` from one element, or from every element
/// when `element_id` is `None`. Nothing is written when nothing matched.
pub fn strip_keys(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    element_id: Option<&str>,
    prefix: &str,
    options: &WriteOptions,
) -> Result<StripOutcome> {
    if prefix.is_empty() {
        bail!("refusing to strip with an empty prefix");
    }
    let mut document = load_document(store, post_id)?.document;
    let removed = match element_id {
        Some(id) => remove_settings_with_prefix(&mut document, id, prefix)?,
        None => {
            let mut removed = 0;
            visit_mut(&mut document, |node, _| {
                let before = node.settings.len();
                node.settings.retain(|key, _| !key.starts_with(prefix));
                removed += before - node.settings.len();
            });
            removed
        }
    };
    if removed == 0 {
        return Ok(StripOutcome {
            removed,
            write: None,
        });
    }
    let write = write_document(store, ledger, post_id, &document, options)?;
    Ok(StripOutcome {
        removed,
        write: Some(write),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PageRepairOutcome {
    pub report: RepairReport,
    pub reset_to_placeholder: bool,
    pub parse_error: Option<String>,
    pub write: Option<WriteOutcome>,
}

#[allow(clippy::too_many_arguments)]
pub fn repair_page(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    ids: &mut IdGenerator,
    registry: &WidgetRegistry,
    repair_options: &RepairOptions,
    reset_invalid: bool,
    options: &WriteOptions,
) -> Result<PageRepairOutcome> {
    let (_, raw) = load_raw(store, post_id)?;
    let repaired = repair_raw(&raw, ids, registry, repair_options, reset_invalid)
        .with_context(|| format!("cannot repair post {post_id}"))?;

    let write = if repaired.report.is_noop() && !repaired.reset_to_placeholder {
        None
    } else {
        Some(write_document(
            store,
            ledger,
            post_id,
            &repaired.document,
            options,
        )?)
    };
    Ok(PageRepairOutcome {
        report: repaired.report,
        reset_to_placeholder: repaired.reset_to_placeholder,
        parse_error: repaired.parse_error,
        write,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub snapshot: Snapshot,
    pub write: WriteOutcome,
}

/// Write back a snapshot of `_elementor_data`, the latest one when `snapshot_id` is
/// omitted. The value being replaced is snapshotted first, so restores can be undone.
pub fn restore_page(
    store: &mut dyn PostMetaStore,
    ledger: &BackupLedger,
    post_id: u64,
    snapshot_id: Option<i64>,
    options: &WriteOptions,
) -> Result<RestoreOutcome> {
    load_post(store, post_id)?;
    let snapshot = match snapshot_id {
        Some(id) => ledger
            .load(id)?
            .ok_or_else(|| anyhow::anyhow!("snapshot {id} does not exist"))?,
        None => ledger
            .latest(post_id, META_DATA)?
            .ok_or_else(|| anyhow::anyhow!("no snapshots recorded for post {post_id}"))?,
    };
    if snapshot.post_id != post_id {
        bail!(
            "snapshot {} belongs to post {}, not {post_id}",
            snapshot.id,
            snapshot.post_id
        );
    }
    if snapshot.meta_key != META_DATA {
        bail!(
            "snapshot {} holds {}, not {META_DATA}",
            snapshot.id,
            snapshot.meta_key
        );
    }

    let write = write_raw(
        store,
        ledger,
        post_id,
        snapshot.meta_value.as_deref(),
        options,
    )?;
    Ok(RestoreOutcome { snapshot, write })
}

pub fn page_history(ledger: &BackupLedger, post_id: u64, limit: usize) -> Result<Vec<Snapshot>> {
    ledger.list(post_id, limit)
}

fn require_element(document: &Document, element_id: &str) -> Result<()> {
    if find_node(document, element_id).is_none() {
        bail!("element {element_id} not found in document");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::testing::MemoryStore;
    use crate::templates::parse_template;
    use crate::walk::all_ids;

    const PAGE: &str = r#"[{"id":"aaa0001","elType":"section","isInner":false,"settings":{"shape_divider_top":"tilt","gap":"default"},"elements":[
        {"id":"aaa0002","elType":"column","isInner":false,"settings":{"_column_size":100},"elements":[
          {"id":"aaa0003","elType":"widget","widgetType":"heading","settings":{"title":"Welkom"},"elements":[]}
        ]}
    ]}]"#;

    fn options(reason: &str) -> WriteOptions {
        WriteOptions::new(reason, "3.18.0")
    }

    fn setup() -> (MemoryStore, BackupLedger) {
        let mut store = MemoryStore::with_page(7, "Home", PAGE);
        store
            .meta
            .insert((7, META_CSS.to_string()), "a:0:{}".to_string());
        (store, BackupLedger::in_memory().expect("ledger"))
    }

    #[test]
    fn load_document_requires_post_and_data() {
        let (mut store, _) = setup();
        assert!(load_document(&mut store, 7).is_ok());
        assert!(load_document(&mut store, 8).is_err());
        store.meta.remove(&(7, META_DATA.to_string()));
        let error = load_document(&mut store, 7).expect_err("missing data");
        assert!(error.to_string().contains(META_DATA));
    }

    #[test]
    fn write_snapshots_sets_meta_and_purges_css() {
        let (mut store, ledger) = setup();
        let mut document = load_document(&mut store, 7).expect("load").document;
        document.elements[0]
            .settings
            .insert("gap".to_string(), json!("wide"));

        let outcome = write_document(&mut store, &ledger, 7, &document, &options("test write"))
            .expect("write");
        assert!(outcome.changed);
        assert_eq!(outcome.css_rows_purged, 1);
        assert!(store.meta_value(7, META_CSS).is_none());
        assert_eq!(store.meta_value(7, META_EDIT_MODE), Some("builder"));
        assert_eq!(store.meta_value(7, META_VERSION), Some("3.18.0"));
        assert!(store.meta_value(7, META_DATA).expect("data").contains("wide"));

        let snapshot = ledger
            .load(outcome.snapshot_id.expect("snapshot"))
            .expect("load")
            .expect("exists");
        assert_eq!(snapshot.meta_value.as_deref(), Some(PAGE));
        assert_eq!(snapshot.reason, "test write");
    }

    #[test]
    fn existing_version_is_kept() {
        let (mut store, ledger) = setup();
        store
            .meta
            .insert((7, META_VERSION.to_string()), "3.5.0".to_string());
        let document = load_document(&mut store, 7).expect("load").document;
        write_document(&mut store, &ledger, 7, &document, &options("noop")).expect("write");
        assert_eq!(store.meta_value(7, META_VERSION), Some("3.5.0"));
    }

    #[test]
    fn dry_run_returns_diff_without_writing() {
        let (mut store, ledger) = setup();
        let outcome = set_key(
            &mut store,
            &ledger,
            7,
            "aaa0003",
            "title",
            json!("Hallo"),
            &WriteOptions {
                dry_run: true,
                ..options("dry")
            },
        )
        .expect("dry run");
        let diff = outcome.write.diff.expect("diff");
        assert!(diff.contains("-"));
        assert!(diff.contains("\"Hallo\""));
        assert_eq!(store.meta_value(7, META_DATA), Some(PAGE));
        assert!(store.writes.is_empty());
        assert_eq!(ledger.stats().expect("stats").snapshots, 0);
    }

    #[test]
    fn no_backup_skips_snapshot() {
        let (mut store, ledger) = setup();
        let outcome = set_key(
            &mut store,
            &ledger,
            7,
            "aaa0003",
            "title",
            parse_setting_value("Hallo"),
            &WriteOptions {
                no_backup: true,
                ..options("quick")
            },
        )
        .expect("set");
        assert_eq!(outcome.previous, Some(json!("Welkom")));
        assert!(outcome.write.snapshot_id.is_none());
        assert_eq!(ledger.stats().expect("stats").snapshots, 0);
    }

    #[test]
    fn inspect_reports_meta_keys_and_stats() {
        let (mut store, _) = setup();
        let inspection = inspect_page(&mut store, 7).expect("inspect");
        assert_eq!(inspection.stats.total_nodes, 3);
        assert_eq!(
            inspection.meta_keys,
            vec![META_DATA.to_string(), META_CSS.to_string()]
        );
        assert!(inspection.elementor_version.is_none());
    }

    #[test]
    fn import_append_regenerates_colliding_ids() {
        let (mut store, ledger) = setup();
        let (_, document) = parse_template(PAGE).expect("template");
        let template = LoadedTemplate {
            path: PathBuf::from("same.json"),
            title: "Same".to_string(),
            document,
        };
        let outcome = import_template(
            &mut store,
            &ledger,
            7,
            &template,
            ImportMode::Append,
            &mut IdGenerator::new(9),
            &options("import"),
        )
        .expect("import");
        assert_eq!(outcome.inserted_top_level, 1);

        let stored = load_document(&mut store, 7).expect("load").document;
        assert_eq!(stored.elements.len(), 2);
        assert_eq!(stored.elements[0].id, "aaa0001");
        let ids = all_ids(&stored);
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn import_prepend_and_replace_order() {
        let (mut store, ledger) = setup();
        let (_, document) =
            parse_template(r#"[{"id":"zzz9999","elType":"section","elements":[]}]"#)
                .expect("template");
        let template = LoadedTemplate {
            path: PathBuf::from("one.json"),
            title: "One".to_string(),
            document,
        };
        let mut ids = IdGenerator::new(3);
        import_template(&mut store, &ledger, 7, &template, ImportMode::Prepend, &mut ids, &options("prepend"))
            .expect("prepend");
        let stored = load_document(&mut store, 7).expect("load").document;
        assert_eq!(stored.elements.len(), 2);
        assert_eq!(stored.elements[1].id, "aaa0001");

        import_template(&mut store, &ledger, 7, &template, ImportMode::Replace, &mut ids, &options("replace"))
            .expect("replace");
        let stored = load_document(&mut store, 7).expect("load").document;
        assert_eq!(stored.elements.len(), 1);
        assert!("replace".parse::<ImportMode>().is_ok());
        assert!("merge".parse::<ImportMode>().is_err());
    }

    #[test]
    fn service_cards_replace_target_element() {
        let (mut store, ledger) = setup();
        let cards = vec![ServiceCard {
            title: "Wonen".to_string(),
            subtitle: String::new(),
            text: "Tekst".to_string(),
            icon: "fas fa-home".to_string(),
            image: String::new(),
        }];
        let outcome = apply_service_cards(
            &mut store,
            &ledger,
            7,
            &cards,
            &ServiceCardStyle::default(),
            &CardPlacement::Replace("aaa0001".to_string()),
            &mut IdGenerator::new(5),
            &options("cards"),
        )
        .expect("cards");
        let stored = load_document(&mut store, 7).expect("load").document;
        assert_eq!(stored.elements.len(), 1);
        assert_eq!(stored.elements[0].id, outcome.section_id);

        let missing = apply_service_cards(
            &mut store,
            &ledger,
            7,
            &cards,
            &ServiceCardStyle::default(),
            &CardPlacement::Replace("nope000".to_string()),
            &mut IdGenerator::new(6),
            &options("cards"),
        );
        assert!(missing.is_err());
    }

    #[test]
    fn find_and_strip_keys() {
        let (mut store, ledger) = setup();
        let hits = find_keys(&mut store, 7, "shape_divider_").expect("find");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "aaa0001");

        let none = strip_keys(&mut store, &ledger, 7, None, "missing_", &options("strip"))
            .expect("strip");
        assert_eq!(none.removed, 0);
        assert!(none.write.is_none());

        let stripped = strip_keys(
            &mut store,
            &ledger,
            7,
            Some("aaa0001"),
            "shape_divider_",
            &options("strip"),
        )
        .expect("strip");
        assert_eq!(stripped.removed, 1);
        assert!(find_keys(&mut store, 7, "shape_divider_").expect("find").is_empty());
        assert!(strip_keys(&mut store, &ledger, 7, None, "", &options("strip")).is_err());
    }

    #[test]
    fn repair_writes_only_when_needed() {
        let (mut store, ledger) = setup();
        let registry = WidgetRegistry::default();
        let clean = repair_page(
            &mut store,
            &ledger,
            7,
            &mut IdGenerator::new(1),
            &registry,
            &RepairOptions::default(),
            false,
            &options("repair"),
        )
        .expect("repair");
        assert!(clean.write.is_none());

        store
            .meta
            .insert((7, META_DATA.to_string()), "[{broken".to_string());
        assert!(
            repair_page(
                &mut store,
                &ledger,
                7,
                &mut IdGenerator::new(1),
                &registry,
                &RepairOptions::default(),
                false,
                &options("repair"),
            )
            .is_err()
        );
        let reset = repair_page(
            &mut store,
            &ledger,
            7,
            &mut IdGenerator::new(1),
            &registry,
            &RepairOptions::default(),
            true,
            &options("reset"),
        )
        .expect("reset");
        assert!(reset.reset_to_placeholder);
        let snapshot = ledger
            .latest(7, META_DATA)
            .expect("latest")
            .expect("snapshot");
        assert_eq!(snapshot.meta_value.as_deref(), Some("[{broken"));
        assert!(load_document(&mut store, 7).is_ok());
    }

    #[test]
    fn restore_round_trips_and_can_be_undone() {
        let (mut store, ledger) = setup();
        set_key(&mut store, &ledger, 7, "aaa0003", "title", json!("Nieuw"), &options("edit"))
            .expect("edit");
        let edited = store.meta_value(7, META_DATA).expect("data").to_string();

        let restored = restore_page(&mut store, &ledger, 7, None, &options("restore"))
            .expect("restore");
        assert_eq!(restored.snapshot.meta_value.as_deref(), Some(PAGE));
        assert_eq!(store.meta_value(7, META_DATA), Some(PAGE));

        let undo = restore_page(&mut store, &ledger, 7, None, &options("undo")).expect("undo");
        assert_eq!(undo.snapshot.meta_value.as_deref(), Some(edited.as_str()));
        assert_eq!(page_history(&ledger, 7, 10).expect("history").len(), 3);

        assert!(restore_page(&mut store, &ledger, 7, Some(9999), &options("bad")).is_err());
    }

    #[test]
    fn export_writes_template_file() {
        let (mut store, _) = setup();
        let temp = tempfile::tempdir().expect("tempdir");
        let report = export_page(&mut store, 7, temp.path()).expect("export");
        assert!(report.path.ends_with("page-7.json"));
        assert_eq!(report.title, "Home");
        let text = std::fs::read_to_string(&report.path).expect("read");
        let (title, document) = parse_template(&text).expect("parse");
        assert_eq!(title.as_deref(), Some("Home"));
        assert_eq!(document.stats().total_nodes, 3);
    }

    #[test]
    fn service_cards_refuse_nested_targets() {
        let (mut store, ledger) = setup();
        let cards = vec![ServiceCard {
            title: "Zorg".to_string(),
            subtitle: String::new(),
            text: "Tekst".to_string(),
            icon: "fas fa-heart".to_string(),
            image: String::new(),
        }];
        for target in ["aaa0002", "aaa0003"] {
            let error = apply_service_cards(
                &mut store,
                &ledger,
                7,
                &cards,
                &ServiceCardStyle::default(),
                &CardPlacement::Replace(target.to_string()),
                &mut IdGenerator::new(8),
                &options("cards"),
            )
            .expect_err("nested target");
            assert!(error.to_string().contains("top-level"));
        }
        assert_eq!(store.meta_value(7, META_DATA), Some(PAGE));

        let (_, report) =
            validate_page(&mut store, 7, &WidgetRegistry::default()).expect("validate");
        assert!(report.is_clean());
    }

    #[test]
    fn identical_writes_leave_restore_target_intact() {
        let (mut store, ledger) = setup();
        let first = set_key(&mut store, &ledger, 7, "aaa0003", "title", json!("Nieuw"), &options("edit"))
            .expect("first");
        assert!(first.write.changed);
        let writes = store.writes.len();

        let second = set_key(&mut store, &ledger, 7, "aaa0003", "title", json!("Nieuw"), &options("again"))
            .expect("second");
        assert!(!second.write.changed);
        assert!(second.write.snapshot_id.is_none());
        assert_eq!(store.writes.len(), writes);
        assert_eq!(ledger.stats().expect("stats").snapshots, 1);

        let restored = restore_page(&mut store, &ledger, 7, None, &options("restore"))
            .expect("restore");
        assert!(restored.write.changed);
        assert_eq!(store.meta_value(7, META_DATA), Some(PAGE));
    }
}
