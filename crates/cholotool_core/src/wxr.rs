//! WordPress eXtended RSS exports: parse `<item>` records and render them as static
//! HTML files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use serde::Serialize;
use tracing::debug;

use crate::media::sanitize_filename;

pub const DEFAULT_POST_TYPES: &[&str] = &["page", "post"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WxrItem {
    pub title: String,
    pub link: String,
    pub post_id: Option<u64>,
    pub post_type: String,
    pub status: String,
    pub post_name: String,
    pub content: String,
    pub meta: Vec<(String, String)>,
}

impl WxrItem {
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(meta_key, _)| meta_key == key)
            .map(|(_, value)| value.as_str())
    }

    /// Output file stem: the slug, else the post id.
    pub fn file_stem(&self, index: usize) -> String {
        if !self.post_name.trim().is_empty() {
            return sanitize_filename(self.post_name.trim());
        }
        match self.post_id {
            Some(id) => format!("post-{id}"),
            None => format!("item-{index}"),
        }
    }
}

#[derive(Default)]
struct PendingMeta {
    key: String,
    value: String,
}

pub fn parse_wxr(xml: &str) -> Result<Vec<WxrItem>> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut current: Option<WxrItem> = None;
    let mut meta: Option<PendingMeta> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = reader.read_event().with_context(|| {
            format!("malformed WXR near byte {}", reader.buffer_position())
        })?;
        match event {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                match name.as_str() {
                    "item" => current = Some(WxrItem::default()),
                    "wp:postmeta" if current.is_some() => meta = Some(PendingMeta::default()),
                    _ if current.is_some() => {
                        field = Some(name);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(value) if field.is_some() => {
                let unescaped = value.unescape().context("invalid entity in WXR text")?;
                text.push_str(&unescaped);
            }
            Event::CData(value) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&value.into_inner()));
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if name == "item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                    continue;
                }
                if name == "wp:postmeta" {
                    if let (Some(item), Some(pending)) = (current.as_mut(), meta.take()) {
                        item.meta.push((pending.key, pending.value));
                    }
                    continue;
                }
                if field.as_deref() != Some(name.as_str()) {
                    continue;
                }
                field = None;
                let value = std::mem::take(&mut text);
                if let Some(pending) = meta.as_mut() {
                    match name.as_str() {
                        "wp:meta_key" => pending.key = value.trim().to_string(),
                        "wp:meta_value" => pending.value = value,
                        _ => {}
                    }
                    continue;
                }
                let Some(item) = current.as_mut() else {
                    continue;
                };
                match name.as_str() {
                    "title" => item.title = value.trim().to_string(),
                    "link" => item.link = value.trim().to_string(),
                    "wp:post_id" => {
                        item.post_id = Some(value.trim().parse().with_context(|| {
                            format!("wp:post_id is not a number: {}", value.trim())
                        })?);
                    }
                    "wp:post_type" => item.post_type = value.trim().to_string(),
                    "wp:status" => item.status = value.trim().to_string(),
                    "wp:post_name" => item.post_name = value.trim().to_string(),
                    "content:encoded" => item.content = value,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        bail!("WXR ended inside an unterminated <item>");
    }
    Ok(items)
}

pub fn render_item_html(item: &WxrItem) -> String {
    let title = escape(item.title.as_str());
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<article>\n<h1>{title}</h1>\n{}\n</article>\n</body>\n</html>\n",
        item.content
    )
}

fn render_index(entries: &[(String, String)]) -> String {
    let mut list = String::new();
    for (file, title) in entries {
        list.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            escape(file.as_str()),
            escape(title.as_str())
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Export index</title>\n</head>\n<body>\n<ul>\n{list}</ul>\n</body>\n</html>\n"
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertReport {
    pub items: usize,
    pub written: usize,
    pub skipped: usize,
    pub index_path: PathBuf,
}

/// Write one HTML file per item whose post type is in `post_types` (the defaults
/// when empty), plus an `index.html` linking them.
pub fn convert_wxr(input: &Path, output_dir: &Path, post_types: &[String]) -> Result<ConvertReport> {
    let xml =
        fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))?;
    let items = parse_wxr(&xml).with_context(|| format!("failed to parse {}", input.display()))?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let wanted: Vec<&str> = if post_types.is_empty() {
        DEFAULT_POST_TYPES.to_vec()
    } else {
        post_types.iter().map(String::as_str).collect()
    };

    let mut used = HashSet::new();
    let mut entries = Vec::new();
    let mut skipped = 0;
    for (index, item) in items.iter().enumerate() {
        if !wanted.contains(&item.post_type.as_str()) {
            skipped += 1;
            continue;
        }
        let stem = item.file_stem(index);
        let mut file = format!("{stem}.html");
        let mut suffix = 2;
        while file == "index.html" || !used.insert(file.clone()) {
            file = format!("{stem}-{suffix}.html");
            suffix += 1;
        }
        let path = output_dir.join(&file);
        fs::write(&path, render_item_html(item))
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(file = %file, post_type = %item.post_type, "wrote WXR item");
        let title = if item.title.is_empty() {
            stem
        } else {
            item.title.clone()
        };
        entries.push((file, title));
    }

    let index_path = output_dir.join("index.html");
    fs::write(&index_path, render_index(&entries))
        .with_context(|| format!("failed to write {}", index_path.display()))?;

    Ok(ConvertReport {
        items: items.len(),
        written: entries.len(),
        skipped,
        index_path,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:wp="http://wordpress.org/export/1.2/">
<channel>
  <title>Cholot</title>
  <item>
    <title>Home &amp; Zorg</title>
    <link>https://cholot.example/</link>
    <content:encoded><![CDATA[<p>Welkom <strong>thuis</strong></p>]]></content:encoded>
    <wp:post_id>12</wp:post_id>
    <wp:post_name><![CDATA[home]]></wp:post_name>
    <wp:status><![CDATA[publish]]></wp:status>
    <wp:post_type><![CDATA[page]]></wp:post_type>
    <wp:postmeta>
      <wp:meta_key><![CDATA[_elementor_data]]></wp:meta_key>
      <wp:meta_value><![CDATA[[{"id":"abc1234","elType":"section"}]]]></wp:meta_value>
    </wp:postmeta>
  </item>
  <item>
    <title>Logo</title>
    <wp:post_id>40</wp:post_id>
    <wp:post_type><![CDATA[attachment]]></wp:post_type>
  </item>
  <item>
    <title>Nieuws</title>
    <wp:post_id>41</wp:post_id>
    <wp:post_type><![CDATA[post]]></wp:post_type>
    <content:encoded><![CDATA[<p>Bericht</p>]]></content:encoded>
  </item>
</channel>
</rss>"#;

    #[test]
    fn parses_items_fields_and_meta() {
        let items = parse_wxr(EXPORT).expect("parse");
        assert_eq!(items.len(), 3);
        let home = &items[0];
        assert_eq!(home.title, "Home & Zorg");
        assert_eq!(home.post_id, Some(12));
        assert_eq!(home.post_type, "page");
        assert_eq!(home.status, "publish");
        assert_eq!(home.post_name, "home");
        assert!(home.content.contains("<strong>thuis</strong>"));
        assert_eq!(
            home.meta_value("_elementor_data"),
            Some(r#"[{"id":"abc1234","elType":"section"}]"#)
        );
        assert_eq!(items[2].file_stem(2), "post-41");
    }

    #[test]
    fn render_escapes_title_but_keeps_body() {
        let items = parse_wxr(EXPORT).expect("parse");
        let html = render_item_html(&items[0]);
        assert!(html.contains("<title>Home &amp; Zorg</title>"));
        assert!(html.contains("<p>Welkom <strong>thuis</strong></p>"));
    }

    #[test]
    fn convert_filters_post_types_and_writes_index() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("export.xml");
        fs::write(&input, EXPORT).expect("write");
        let output = temp.path().join("html");

        let report = convert_wxr(&input, &output, &[]).expect("convert");
        assert_eq!(report.items, 3);
        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, 1);
        assert!(output.join("home.html").exists());
        assert!(output.join("post-41.html").exists());
        let index = fs::read_to_string(report.index_path).expect("index");
        assert!(index.contains("href=\"home.html\""));

        let pages_only =
            convert_wxr(&input, &temp.path().join("pages"), &["page".to_string()]).expect("pages");
        assert_eq!(pages_only.written, 1);
    }

    #[test]
    fn unterminated_item_is_an_error() {
        assert!(parse_wxr("<rss><channel><item><title>x</title>").is_err());
    }
}
