use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::Value;

use crate::document::{Document, ElementKind, ElementNode};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingHit {
    pub id: String,
    pub kind: String,
    pub path: String,
    pub key: String,
    pub value: Value,
}

/// Position of a node while walking: depth 1 is top level.
#[derive(Debug, Clone, Copy)]
pub struct VisitContext<'a> {
    pub depth: usize,
    pub parent_kind: Option<&'a ElementKind>,
}

pub fn format_path(path: &[usize]) -> String {
    path.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

pub fn find_settings<F>(document: &Document, predicate: F) -> Vec<SettingHit>
where
    F: Fn(&ElementNode, &str, &Value) -> bool,
{
    let mut hits = Vec::new();
    let mut path = Vec::new();
    for (index, node) in document.elements.iter().enumerate() {
        path.push(index);
        collect_settings(node, &mut path, &predicate, &mut hits);
        path.pop();
    }
    hits
}

fn collect_settings<F>(
    node: &ElementNode,
    path: &mut Vec<usize>,
    predicate: &F,
    hits: &mut Vec<SettingHit>,
) where
    F: Fn(&ElementNode, &str, &Value) -> bool,
{
    for (key, value) in &node.settings {
        if predicate(node, key, value) {
            hits.push(SettingHit {
                id: node.id.clone(),
                kind: node.kind.as_str().to_string(),
                path: format_path(path),
                key: key.clone(),
                value: value.clone(),
            });
        }
    }
    for (index, child) in node.elements.iter().enumerate() {
        path.push(index);
        collect_settings(child, path, predicate, hits);
        path.pop();
    }
}

pub fn find_settings_with_prefix(document: &Document, prefix: &str) -> Vec<SettingHit> {
    find_settings(document, |_, key, _| key.starts_with(prefix))
}

pub fn find_node<'a>(document: &'a Document, id: &str) -> Option<&'a ElementNode> {
    fn search<'a>(nodes: &'a [ElementNode], id: &str) -> Option<&'a ElementNode> {
        for node in nodes {
            if node.id == id {
                return Some(node);
            }
            if let Some(found) = search(&node.elements, id) {
                return Some(found);
            }
        }
        None
    }
    search(&document.elements, id)
}

pub fn find_node_mut<'a>(document: &'a mut Document, id: &str) -> Option<&'a mut ElementNode> {
    fn search<'a>(nodes: &'a mut [ElementNode], id: &str) -> Option<&'a mut ElementNode> {
        for node in nodes {
            if node.id == id {
                return Some(node);
            }
            if let Some(found) = search(&mut node.elements, id) {
                return Some(found);
            }
        }
        None
    }
    search(&mut document.elements, id)
}

/// Pre-order walk that lets `visitor` mutate each node before its children are visited.
pub fn visit_mut<F>(document: &mut Document, mut visitor: F)
where
    F: FnMut(&mut ElementNode, VisitContext<'_>),
{
    fn walk<F>(nodes: &mut [ElementNode], depth: usize, parent: Option<&ElementKind>, visitor: &mut F)
    where
        F: FnMut(&mut ElementNode, VisitContext<'_>),
    {
        for node in nodes {
            visitor(
                node,
                VisitContext {
                    depth,
                    parent_kind: parent,
                },
            );
            let kind = node.kind.clone();
            walk(&mut node.elements, depth + 1, Some(&kind), visitor);
        }
    }
    walk(&mut document.elements, 1, None, &mut visitor);
}

/// Set `key` on the node with `id`, returning the previous value.
pub fn set_setting(
    document: &mut Document,
    id: &str,
    key: &str,
    value: Value,
) -> Result<Option<Value>> {
    let Some(node) = find_node_mut(document, id) else {
        bail!("element {id} not found in document");
    };
    Ok(node.settings.insert(key.to_string(), value))
}

pub fn remove_settings_with_prefix(document: &mut Document, id: &str, prefix: &str) -> Result<usize> {
    let Some(node) = find_node_mut(document, id) else {
        bail!("element {id} not found in document");
    };
    let before = node.settings.len();
    node.settings.retain(|key, _| !key.starts_with(prefix));
    Ok(before - node.settings.len())
}

/// Swap the node with `id` for `replacement`, returning the old node.
pub fn replace_node(
    document: &mut Document,
    id: &str,
    replacement: ElementNode,
) -> Result<ElementNode> {
    match find_node_mut(document, id) {
        Some(node) => Ok(std::mem::replace(node, replacement)),
        None => bail!("element {id} not found in document"),
    }
}

pub fn all_ids(document: &Document) -> Vec<String> {
    fn collect(nodes: &[ElementNode], out: &mut Vec<String>) {
        for node in nodes {
            out.push(node.id.clone());
            collect(&node.elements, out);
        }
    }
    let mut out = Vec::new();
    collect(&document.elements, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Document {
        Document::parse(
            r##"[
              {"id":"s1","elType":"section","settings":{"shape_divider_top":"tilt"},"elements":[
                {"id":"c1","elType":"column","settings":{"shape_divider_bottom":"curve","_column_size":50},"elements":[
                  {"id":"i1","elType":"section","isInner":true,"settings":{"shape_divider_bottom":"waves"},"elements":[]}
                ]},
                {"id":"c2","elType":"column","settings":[],"elements":[
                  {"id":"w1","elType":"widget","widgetType":"heading","settings":{"title":"Hi"},"elements":[]}
                ]}
              ]}
            ]"##,
        )
        .expect("parse")
    }

    #[test]
    fn finds_prefixed_keys_in_document_order_with_paths() {
        let hits = find_settings_with_prefix(&sample(), "shape_divider_");
        let summary: Vec<(&str, &str, &str)> = hits
            .iter()
            .map(|hit| (hit.id.as_str(), hit.kind.as_str(), hit.path.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("s1", "section", "0"),
                ("c1", "column", "0/0"),
                ("i1", "section", "0/0/0"),
            ]
        );
        assert_eq!(hits[2].value, json!("waves"));
    }

    #[test]
    fn find_node_searches_nested_elements() {
        let document = sample();
        assert_eq!(
            find_node(&document, "w1").and_then(|node| node.widget_type.as_deref()),
            Some("heading")
        );
        assert!(find_node(&document, "missing").is_none());
    }

    #[test]
    fn set_setting_returns_previous_value() {
        let mut document = sample();
        let previous = set_setting(&mut document, "w1", "title", json!("Hallo")).expect("set");
        assert_eq!(previous, Some(json!("Hi")));
        assert_eq!(
            find_node(&document, "w1").and_then(|node| node.setting_str("title")),
            Some("Hallo")
        );
        assert!(set_setting(&mut document, "nope", "title", json!(1)).is_err());
    }

    #[test]
    fn remove_prefix_only_touches_target() {
        let mut document = sample();
        let removed =
            remove_settings_with_prefix(&mut document, "c1", "shape_divider_").expect("remove");
        assert_eq!(removed, 1);
        assert_eq!(find_settings_with_prefix(&document, "shape_divider_").len(), 2);
    }

    #[test]
    fn visit_mut_reports_depth_and_parent() {
        let mut document = sample();
        let mut seen = Vec::new();
        visit_mut(&mut document, |node, ctx| {
            seen.push((
                node.id.clone(),
                ctx.depth,
                ctx.parent_kind.map(|kind| kind.as_str().to_string()),
            ));
        });
        assert_eq!(seen[0], ("s1".to_string(), 1, None));
        assert_eq!(seen[2], ("i1".to_string(), 3, Some("column".to_string())));
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn replace_node_swaps_in_place() {
        let mut document = sample();
        let old = replace_node(
            &mut document,
            "i1",
            ElementNode::new("n1", ElementKind::Section),
        )
        .expect("replace");
        assert_eq!(old.id, "i1");
        assert_eq!(all_ids(&document), vec!["s1", "c1", "n1", "c2", "w1"]);
    }
}
