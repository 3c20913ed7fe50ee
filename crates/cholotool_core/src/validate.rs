use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::document::{Document, ElementKind, ElementNode};
use crate::ids::is_valid_id;
use crate::walk::format_path;

pub const SHAPE_DIVIDER_PREFIX: &str = "shape_divider_";

const CORE_WIDGETS: &[&str] = &[
    "accordion",
    "alert",
    "audio",
    "button",
    "counter",
    "divider",
    "google_maps",
    "heading",
    "html",
    "icon",
    "icon-box",
    "icon-list",
    "image",
    "image-box",
    "image-carousel",
    "image-gallery",
    "menu-anchor",
    "progress",
    "read-more",
    "shortcode",
    "sidebar",
    "social-icons",
    "spacer",
    "star-rating",
    "tabs",
    "testimonial",
    "text-editor",
    "toggle",
    "video",
];

const CHOLOT_WIDGETS: &[&str] = &[
    "cholot-button",
    "cholot-carousel",
    "cholot-contact",
    "cholot-gallery",
    "cholot-logo",
    "cholot-menu",
    "cholot-post-one",
    "cholot-post-three",
    "cholot-post-two",
    "cholot-sidebar",
    "cholot-team",
    "cholot-testimonial-two",
    "cholot-texticon",
    "cholot-title",
];

/// Widget names the site has registered. WordPress sidebar widgets are exposed as
/// `wp-widget-*` and always accepted.
#[derive(Debug, Clone)]
pub struct WidgetRegistry {
    names: BTreeSet<String>,
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::with_extra(&[])
    }
}

impl WidgetRegistry {
    pub fn with_extra(extra: &[String]) -> Self {
        let mut names: BTreeSet<String> = CORE_WIDGETS
            .iter()
            .chain(CHOLOT_WIDGETS)
            .map(|name| (*name).to_string())
            .collect();
        names.extend(extra.iter().map(|name| name.trim().to_string()));
        Self { names }
    }

    pub fn contains(&self, widget_type: &str) -> bool {
        self.names.contains(widget_type) || widget_type.starts_with("wp-widget-")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    MissingId,
    DuplicateId,
    InnerFlag,
    DividerOnColumn,
    MissingWidgetType,
    UnknownWidgetType,
    BadNesting,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingId => "missing-id",
            Self::DuplicateId => "duplicate-id",
            Self::InnerFlag => "inner-flag",
            Self::DividerOnColumn => "divider-on-column",
            Self::MissingWidgetType => "missing-widget-type",
            Self::UnknownWidgetType => "unknown-widget-type",
            Self::BadNesting => "bad-nesting",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::DividerOnColumn | Self::UnknownWidgetType => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub path: String,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub nodes_checked: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
            .count()
    }

    pub fn warnings(&self) -> usize {
        self.issues.len() - self.errors()
    }

    pub fn is_clean(&self) -> bool {
        self.errors() == 0
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }
}

struct Validator<'a> {
    registry: &'a WidgetRegistry,
    seen_ids: HashMap<String, String>,
    report: ValidationReport,
}

impl Validator<'_> {
    fn push(&mut self, kind: IssueKind, path: &[usize], id: &str, message: String) {
        self.report.issues.push(ValidationIssue {
            severity: kind.severity(),
            kind,
            path: format_path(path),
            id: id.to_string(),
            message,
        });
    }

    fn check(&mut self, node: &ElementNode, parent: Option<&ElementKind>, path: &mut Vec<usize>) {
        self.report.nodes_checked += 1;
        self.check_id(node, path);
        self.check_nesting(node, parent, path);

        if node.is_section() {
            let under_column = parent == Some(&ElementKind::Column);
            if under_column && !node.is_inner {
                self.push(
                    IssueKind::InnerFlag,
                    path,
                    &node.id,
                    "section inside a column must set isInner: true".to_string(),
                );
            } else if parent.is_none() && node.is_inner {
                self.push(
                    IssueKind::InnerFlag,
                    path,
                    &node.id,
                    "top-level section must not set isInner".to_string(),
                );
            }
        }

        if node.is_column() {
            let keys: Vec<&str> = node
                .settings
                .keys()
                .filter(|key| key.starts_with(SHAPE_DIVIDER_PREFIX))
                .map(String::as_str)
                .collect();
            if !keys.is_empty() {
                self.push(
                    IssueKind::DividerOnColumn,
                    path,
                    &node.id,
                    format!("shape divider keys have no effect on columns: {}", keys.join(", ")),
                );
            }
        }

        if node.is_widget() {
            match node.widget_type.as_deref().map(str::trim) {
                None | Some("") => self.push(
                    IssueKind::MissingWidgetType,
                    path,
                    &node.id,
                    "widget has no widgetType".to_string(),
                ),
                Some(widget_type) if !self.registry.contains(widget_type) => self.push(
                    IssueKind::UnknownWidgetType,
                    path,
                    &node.id,
                    format!("widgetType `{widget_type}` is not a registered widget"),
                ),
                Some(_) => {}
            }
        }

        for (index, child) in node.elements.iter().enumerate() {
            path.push(index);
            self.check(child, Some(&node.kind), path);
            path.pop();
        }
    }

    fn check_id(&mut self, node: &ElementNode, path: &[usize]) {
        if !is_valid_id(&node.id) {
            self.push(
                IssueKind::MissingId,
                path,
                &node.id,
                format!("{} has a missing or malformed id", node.kind),
            );
            return;
        }
        let here = format_path(path);
        if let Some(first) = self.seen_ids.get(&node.id) {
            let message = format!("id `{}` already used at {first}", node.id);
            self.push(IssueKind::DuplicateId, path, &node.id, message);
        } else {
            self.seen_ids.insert(node.id.clone(), here);
        }
    }

    fn check_nesting(&mut self, node: &ElementNode, parent: Option<&ElementKind>, path: &[usize]) {
        let problem = match (parent, &node.kind) {
            (None, ElementKind::Column) => Some("column at top level"),
            (None, ElementKind::Widget) => Some("widget at top level"),
            (Some(ElementKind::Section), ElementKind::Section) => {
                Some("section directly inside a section")
            }
            (Some(ElementKind::Section), ElementKind::Widget) => {
                Some("widget directly inside a section")
            }
            (Some(ElementKind::Column), ElementKind::Column) => Some("column inside a column"),
            (Some(ElementKind::Widget), _) => Some("widget with child elements"),
            _ => None,
        };
        if let Some(problem) = problem {
            self.push(IssueKind::BadNesting, path, &node.id, problem.to_string());
        }
    }
}

pub fn validate(document: &Document, registry: &WidgetRegistry) -> ValidationReport {
    let mut validator = Validator {
        registry,
        seen_ids: HashMap::new(),
        report: ValidationReport::default(),
    };
    let mut path = Vec::new();
    for (index, node) in document.elements.iter().enumerate() {
        path.push(index);
        validator.check(node, None, &mut path);
        path.pop();
    }
    validator.report
}
