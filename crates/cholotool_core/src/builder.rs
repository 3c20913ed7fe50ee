//! Constructors for Elementor nodes and the Cholot service-card section.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::document::{Document, ElementKind, ElementNode, Settings};
use crate::ids::IdGenerator;

pub const TEXTICON_WIDGET: &str = "cholot-texticon";
pub const MAX_CARDS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCard {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceCardStyle {
    pub image_height: u32,
    pub divider_shape: String,
    pub divider_color: String,
    pub divider_height: u32,
    pub divider_negative: bool,
    pub accent_color: String,
    pub subtitle_color: String,
    pub icon_library: String,
}

impl Default for ServiceCardStyle {
    fn default() -> Self {
        Self {
            image_height: 250,
            divider_shape: "curve".to_string(),
            divider_color: "#ffffff".to_string(),
            divider_height: 40,
            divider_negative: false,
            accent_color: "#b68c2f".to_string(),
            subtitle_color: "#8f8f8f".to_string(),
            icon_library: "fa-solid".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CardFile {
    List(Vec<ServiceCard>),
    Wrapped { cards: Vec<ServiceCard> },
}

pub fn parse_cards(text: &str) -> Result<Vec<ServiceCard>> {
    let parsed: CardFile =
        serde_json::from_str(text).context("cards must be a JSON list or {\"cards\": [...]}")?;
    Ok(match parsed {
        CardFile::List(cards) | CardFile::Wrapped { cards } => cards,
    })
}

pub fn load_cards(path: &Path) -> Result<Vec<ServiceCard>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_cards(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn section(ids: &mut IdGenerator, settings: Settings, columns: Vec<ElementNode>) -> ElementNode {
    let mut node = ElementNode::new(ids.next_id(), ElementKind::Section);
    node.settings = settings;
    node.elements = columns;
    node
}

pub fn inner_section(
    ids: &mut IdGenerator,
    settings: Settings,
    columns: Vec<ElementNode>,
) -> ElementNode {
    let mut node = section(ids, settings, columns);
    node.is_inner = true;
    node
}

/// `size_percent` becomes `_column_size`; Elementor keeps it an integer.
pub fn column(ids: &mut IdGenerator, size_percent: u32, children: Vec<ElementNode>) -> ElementNode {
    let mut node = ElementNode::new(ids.next_id(), ElementKind::Column);
    node.settings = settings_from(json!({
        "_column_size": size_percent,
        "_inline_size": null,
    }));
    node.elements = children;
    node
}

pub fn widget(ids: &mut IdGenerator, widget_type: &str, settings: Settings) -> ElementNode {
    let mut node = ElementNode::new(ids.next_id(), ElementKind::Widget);
    node.widget_type = Some(widget_type.to_string());
    node.settings = settings;
    node
}

/// Turn a `json!` object literal into a settings map; anything else is empty.
pub fn settings_from(value: Value) -> Settings {
    match value {
        Value::Object(map) => map,
        _ => Settings::new(),
    }
}

pub fn build_service_cards(
    cards: &[ServiceCard],
    style: &ServiceCardStyle,
    ids: &mut IdGenerator,
) -> Result<ElementNode> {
    if cards.is_empty() {
        bail!("at least one service card is required");
    }
    if cards.len() > MAX_CARDS {
        bail!(
            "{} service cards requested; a section holds at most {MAX_CARDS} columns",
            cards.len()
        );
    }
    for (index, card) in cards.iter().enumerate() {
        if card.title.trim().is_empty() {
            bail!("service card #{} has an empty title", index + 1);
        }
    }

    let count = cards.len() as u32;
    let column_size = 100 / count;
    let columns = cards
        .iter()
        .map(|card| {
            let image = card_image_section(card, style, ids);
            let text = card_text_section(card, style, ids);
            column(ids, column_size, vec![image, text])
        })
        .collect();

    Ok(section(
        ids,
        settings_from(json!({
            "structure": format!("{count}0"),
            "gap": "extended",
            "layout": "boxed",
            "padding": {"unit": "px", "top": "60", "right": "0", "bottom": "60", "left": "0", "isLinked": false},
        })),
        columns,
    ))
}

fn card_image_section(
    card: &ServiceCard,
    style: &ServiceCardStyle,
    ids: &mut IdGenerator,
) -> ElementNode {
    let negative = if style.divider_negative { "yes" } else { "" };
    let settings = settings_from(json!({
        "background_background": "classic",
        "background_image": {"url": card.image, "id": ""},
        "background_size": "cover",
        "background_position": "center center",
        "height": "min-height",
        "custom_height": {"unit": "px", "size": style.image_height},
        "shape_divider_bottom": style.divider_shape,
        "shape_divider_bottom_color": style.divider_color,
        "shape_divider_bottom_width": {"unit": "%", "size": 100},
        "shape_divider_bottom_height": {"unit": "px", "size": style.divider_height},
        "shape_divider_bottom_negative": negative,
    }));
    let empty_column = column(ids, 100, Vec::new());
    inner_section(ids, settings, vec![empty_column])
}

fn card_text_section(
    card: &ServiceCard,
    style: &ServiceCardStyle,
    ids: &mut IdGenerator,
) -> ElementNode {
    let texticon = widget(
        ids,
        TEXTICON_WIDGET,
        settings_from(json!({
            "title": card.title,
            "subtitle": card.subtitle,
            "text": card.text,
            "selected_icon": {"value": card.icon, "library": style.icon_library},
            "icon_color": style.accent_color,
            "subtitle_color": style.subtitle_color,
            "text_align": "center",
        })),
    );
    let text_column = column(ids, 100, vec![texticon]);
    inner_section(
        ids,
        settings_from(json!({
            "padding": {"unit": "px", "top": "20", "right": "20", "bottom": "30", "left": "20", "isLinked": false},
        })),
        vec![text_column],
    )
}

/// Smallest valid page: one section holding one full-width empty column.
pub fn placeholder_document(ids: &mut IdGenerator) -> Document {
    let only_column = column(ids, 100, Vec::new());
    Document::new(vec![section(ids, Settings::new(), vec![only_column])])
}
