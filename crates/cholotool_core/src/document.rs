//! Typed view of the Elementor page tree stored in `_elementor_data`.
//!
//! Only the keys the tool reasons about are typed; anything else on a node is kept in
//! `extra` so a read-modify-write cycle never drops data the plugin put there.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Settings = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Section,
    Column,
    Widget,
    Container,
    Other(String),
}

impl ElementKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Section => "section",
            Self::Column => "column",
            Self::Widget => "widget",
            Self::Container => "container",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for ElementKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "section" => Self::Section,
            "column" => Self::Column,
            "widget" => Self::Widget,
            "container" => Self::Container,
            _ => Self::Other(value),
        }
    }
}

impl From<ElementKind> for String {
    fn from(value: ElementKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ElementKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ElementKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "elType")]
    pub kind: ElementKind,
    #[serde(rename = "isInner", default)]
    pub is_inner: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_settings",
        serialize_with = "serialize_settings"
    )]
    pub settings: Settings,
    #[serde(default)]
    pub elements: Vec<ElementNode>,
    #[serde(rename = "widgetType", default, skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ElementNode {
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            kind,
            is_inner: false,
            settings: Settings::new(),
            elements: Vec::new(),
            widget_type: None,
            extra: Map::new(),
        }
    }

    pub fn is_section(&self) -> bool {
        self.kind == ElementKind::Section
    }

    pub fn is_column(&self) -> bool {
        self.kind == ElementKind::Column
    }

    pub fn is_widget(&self) -> bool {
        self.kind == ElementKind::Widget
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

/// PHP encodes an empty associative array as `[]`, so Elementor stores empty settings
/// that way. Accept both shapes and write the empty case back as `[]`.
fn deserialize_settings<'de, D>(deserializer: D) -> Result<Settings, D::Error>
where
    D: Deserializer<'de>,
{
    struct SettingsVisitor;

    impl<'de> Visitor<'de> for SettingsVisitor {
        type Value = Settings;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a settings object or an empty list")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Settings, E> {
            Ok(Settings::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Settings, A::Error> {
            if seq.next_element::<de::IgnoredAny>()?.is_some() {
                return Err(de::Error::custom("settings list must be empty"));
            }
            Ok(Settings::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Settings, A::Error> {
            let mut out = Settings::new();
            while let Some((key, value)) = map.next_entry::<String, Value>()? {
                out.insert(key, value);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(SettingsVisitor)
}

fn serialize_settings<S: Serializer>(settings: &Settings, serializer: S) -> Result<S::Ok, S::Error> {
    if settings.is_empty() {
        let empty: [Value; 0] = [];
        empty.serialize(serializer)
    } else {
        settings.serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    pub elements: Vec<ElementNode>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DocumentStats {
    pub total_nodes: usize,
    pub top_level: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub inner_sections: usize,
    pub widget_types: BTreeMap<String, usize>,
    pub max_depth: usize,
}

impl Document {
    pub fn new(elements: Vec<ElementNode>) -> Self {
        Self { elements }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        // A freshly created page has no data row content yet.
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(trimmed).map_err(|error| {
            anyhow::anyhow!(
                "invalid Elementor JSON at line {} column {}: {error}",
                error.line(),
                error.column()
            )
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize Elementor document")
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize Elementor document")
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn stats(&self) -> DocumentStats {
        let mut stats = DocumentStats {
            top_level: self.elements.len(),
            ..DocumentStats::default()
        };
        for node in &self.elements {
            accumulate_stats(node, 1, &mut stats);
        }
        stats
    }
}

fn accumulate_stats(node: &ElementNode, depth: usize, stats: &mut DocumentStats) {
    stats.total_nodes += 1;
    stats.max_depth = stats.max_depth.max(depth);
    *stats
        .by_kind
        .entry(node.kind.as_str().to_string())
        .or_insert(0) += 1;
    if node.is_section() && node.is_inner {
        stats.inner_sections += 1;
    }
    if let Some(widget_type) = &node.widget_type {
        *stats.widget_types.entry(widget_type.clone()).or_insert(0) += 1;
    }
    for child in &node.elements {
        accumulate_stats(child, depth + 1, stats);
    }
}
