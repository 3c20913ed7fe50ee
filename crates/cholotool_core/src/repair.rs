use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use crate::builder::placeholder_document;
use crate::document::{Document, ElementKind, ElementNode};
use crate::ids::{IdGenerator, is_valid_id};
use crate::validate::{SHAPE_DIVIDER_PREFIX, WidgetRegistry};
use crate::walk::format_path;

#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    pub drop_unknown_widgets: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RepairAction {
    AssignedId {
        path: String,
        old: String,
        new: String,
    },
    SetInnerFlag {
        path: String,
        id: String,
        is_inner: bool,
    },
    MovedDivider {
        path: String,
        from_column: String,
        to_section: String,
        key: String,
    },
    DroppedDivider {
        path: String,
        column: String,
        key: String,
    },
    DroppedWidget {
        path: String,
        id: String,
        widget_type: String,
    },
}

impl RepairAction {
    pub fn describe(&self) -> String {
        match self {
            Self::AssignedId { path, old, new } => {
                let old = if old.is_empty() { "<none>" } else { old.as_str() };
                format!("{path}: id {old} -> {new}")
            }
            Self::SetInnerFlag { path, id, is_inner } => {
                format!("{path}: {id} isInner -> {is_inner}")
            }
            Self::MovedDivider {
                path,
                from_column,
                to_section,
                key,
            } => format!("{path}: moved {key} from column {from_column} to section {to_section}"),
            Self::DroppedDivider { path, column, key } => {
                format!("{path}: dropped {key} from column {column} (section already sets it)")
            }
            Self::DroppedWidget {
                path,
                id,
                widget_type,
            } => format!("{path}: removed unregistered widget {id} ({widget_type})"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub actions: Vec<RepairAction>,
}

impl RepairReport {
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

pub fn repair(
    document: &mut Document,
    ids: &mut IdGenerator,
    registry: &WidgetRegistry,
    options: &RepairOptions,
) -> RepairReport {
    ids.reserve_document(document);
    let mut report = RepairReport::default();

    let mut seen = HashSet::new();
    let mut path = Vec::new();
    for (index, node) in document.elements.iter_mut().enumerate() {
        path.push(index);
        fix_ids(node, ids, &mut seen, &mut path, &mut report);
        path.pop();
    }

    for (index, node) in document.elements.iter_mut().enumerate() {
        path.push(index);
        fix_structure(node, None, registry, options, &mut path, &mut report);
        path.pop();
    }

    report
}

fn fix_ids(
    node: &mut ElementNode,
    ids: &mut IdGenerator,
    seen: &mut HashSet<String>,
    path: &mut Vec<usize>,
    report: &mut RepairReport,
) {
    if !is_valid_id(&node.id) || !seen.insert(node.id.clone()) {
        let new = ids.next_id();
        seen.insert(new.clone());
        report.actions.push(RepairAction::AssignedId {
            path: format_path(path),
            old: std::mem::replace(&mut node.id, new.clone()),
            new,
        });
    }
    for (index, child) in node.elements.iter_mut().enumerate() {
        path.push(index);
        fix_ids(child, ids, seen, path, report);
        path.pop();
    }
}

fn fix_structure(
    node: &mut ElementNode,
    parent: Option<&ElementKind>,
    registry: &WidgetRegistry,
    options: &RepairOptions,
    path: &mut Vec<usize>,
    report: &mut RepairReport,
) {
    if node.is_section() {
        let expected = parent == Some(&ElementKind::Column);
        if node.is_inner != expected {
            node.is_inner = expected;
            report.actions.push(RepairAction::SetInnerFlag {
                path: format_path(path),
                id: node.id.clone(),
                is_inner: expected,
            });
        }
        lift_column_dividers(node, path, report);
    }

    if options.drop_unknown_widgets && node.is_column() {
        let mut kept = Vec::with_capacity(node.elements.len());
        for (index, child) in std::mem::take(&mut node.elements).into_iter().enumerate() {
            let unregistered = child.is_widget()
                && child
                    .widget_type
                    .as_deref()
                    .is_some_and(|widget_type| !registry.contains(widget_type));
            if unregistered {
                path.push(index);
                report.actions.push(RepairAction::DroppedWidget {
                    path: format_path(path),
                    id: child.id.clone(),
                    widget_type: child.widget_type.clone().unwrap_or_default(),
                });
                path.pop();
            } else {
                kept.push(child);
            }
        }
        node.elements = kept;
    }

    let kind = node.kind.clone();
    for (index, child) in node.elements.iter_mut().enumerate() {
        path.push(index);
        fix_structure(child, Some(&kind), registry, options, path, report);
        path.pop();
    }
}

/// Shape dividers only render on sections, so keys found on a column move up to the
/// enclosing section unless it already defines the same key.
fn lift_column_dividers(section: &mut ElementNode, path: &mut Vec<usize>, report: &mut RepairReport) {
    let section_id = section.id.clone();
    for (index, column) in section.elements.iter_mut().enumerate() {
        if !column.is_column() {
            continue;
        }
        let keys: Vec<String> = column
            .settings
            .keys()
            .filter(|key| key.starts_with(SHAPE_DIVIDER_PREFIX))
            .cloned()
            .collect();
        if keys.is_empty() {
            continue;
        }
        path.push(index);
        let column_path = format_path(path);
        path.pop();
        for key in keys {
            let Some(value) = column.settings.remove(&key) else {
                continue;
            };
            if section.settings.contains_key(&key) {
                report.actions.push(RepairAction::DroppedDivider {
                    path: column_path.clone(),
                    column: column.id.clone(),
                    key,
                });
            } else {
                report.actions.push(RepairAction::MovedDivider {
                    path: column_path.clone(),
                    from_column: column.id.clone(),
                    to_section: section_id.clone(),
                    key: key.clone(),
                });
                section.settings.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawRepair {
    pub document: Document,
    pub report: RepairReport,
    pub reset_to_placeholder: bool,
    pub parse_error: Option<String>,
}

/// Parse stored text and repair it. Unparsable text is an error unless
/// `reset_invalid` is set, in which case the placeholder page replaces it.
pub fn repair_raw(
    text: &str,
    ids: &mut IdGenerator,
    registry: &WidgetRegistry,
    options: &RepairOptions,
    reset_invalid: bool,
) -> Result<RawRepair> {
    match Document::parse(text) {
        Ok(mut document) => {
            let report = repair(&mut document, ids, registry, options);
            Ok(RawRepair {
                document,
                report,
                reset_to_placeholder: false,
                parse_error: None,
            })
        }
        Err(error) if reset_invalid => {
            warn!(%error, "stored Elementor data is unparsable; substituting placeholder");
            Ok(RawRepair {
                document: placeholder_document(ids),
                report: RepairReport::default(),
                reset_to_placeholder: true,
                parse_error: Some(error.to_string()),
            })
        }
        Err(error) => Err(error.context("refusing to repair unparsable data without --reset-invalid")),
    }
}
