//! Elementor CSS cache purging and front-end warming.

use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};

use crate::backup::unix_timestamp;
use crate::config::ToolConfig;
use crate::http::Fetch;
use crate::store::{GLOBAL_CSS_OPTIONS, META_CSS, PostMetaStore, PostSummary};

pub const CACHE_BUST_PARAM: &str = "cholotool_nocache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssScope {
    Post(u64),
    All,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub post_rows: u64,
    pub option_rows: u64,
    pub options: Vec<String>,
}

/// Drop generated CSS for one post (or all) plus the global CSS options.
pub fn purge_css(store: &mut dyn PostMetaStore, scope: CssScope) -> Result<PurgeReport> {
    let post_rows = match scope {
        CssScope::Post(post_id) => {
            if store.post(post_id)?.is_none() {
                bail!("post {post_id} does not exist");
            }
            store.delete_meta(post_id, META_CSS)?
        }
        CssScope::All => store.delete_meta_everywhere(META_CSS)?,
    };

    let mut report = PurgeReport {
        post_rows,
        ..PurgeReport::default()
    };
    for option in GLOBAL_CSS_OPTIONS {
        let deleted = store.delete_option(option)?;
        if deleted > 0 {
            report.options.push((*option).to_string());
        }
        report.option_rows += deleted;
    }
    info!(?scope, post_rows, option_rows = report.option_rows, "purged Elementor CSS");
    Ok(report)
}

/// Site URL from config/env, falling back to the `home` option.
pub fn resolve_site_url(config: &ToolConfig, store: &mut dyn PostMetaStore) -> Result<String> {
    if let Some(url) = config.site_url() {
        return Ok(url);
    }
    match store.get_option("home")? {
        Some(home) if !home.trim().is_empty() => Ok(home.trim().trim_end_matches('/').to_string()),
        _ => bail!("site URL unknown: set [site] url, CHOLOT_SITE_URL, or the home option"),
    }
}

/// Plain permalink that resolves regardless of the site's rewrite rules.
pub fn page_url(site_url: &str, post: &PostSummary) -> Result<Url> {
    let base = format!("{}/", site_url.trim_end_matches('/'));
    let mut url = Url::parse(&base).with_context(|| format!("invalid site URL: {site_url}"))?;
    let param = if post.post_type == "page" { "page_id" } else { "p" };
    url.query_pairs_mut()
        .append_pair(param, &post.id.to_string());
    Ok(url)
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
    pub url: String,
    pub status: u16,
    pub bytes: usize,
    pub elapsed_ms: u64,
    pub post_css_linked: bool,
    pub inline_css: bool,
}

impl WarmReport {
    pub fn has_css(&self) -> bool {
        self.post_css_linked || self.inline_css
    }
}

/// Request `url` with a cache-busting parameter so Elementor regenerates CSS.
pub fn warm_page(fetch: &mut dyn Fetch, url: &Url, post_id: Option<u64>) -> Result<WarmReport> {
    let mut busted = url.clone();
    busted
        .query_pairs_mut()
        .append_pair(CACHE_BUST_PARAM, &unix_timestamp()?.to_string());
    let page = fetch.fetch(&busted)?;
    let body = page.text();

    let has_style = body.contains("<style");
    let (post_css_linked, inline_css) = match post_id {
        Some(id) => (
            body.contains(&format!("css/post-{id}.css"))
                || body.contains(&format!("elementor-post-{id}.css")),
            has_style && body.contains(&format!(".elementor-{id} ")),
        ),
        None => (
            body.contains("/elementor/css/post-"),
            has_style && body.contains(".elementor-element"),
        ),
    };
    debug!(url = %busted, status = page.status, post_css_linked, inline_css, "warmed page");

    Ok(WarmReport {
        url: page.url,
        status: page.status,
        bytes: page.body.len(),
        elapsed_ms: page.elapsed_ms,
        post_css_linked,
        inline_css,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::MockFetch;
    use crate::store::testing::MemoryStore;

    #[test]
    fn purge_single_post_and_globals() {
        let mut store = MemoryStore::with_page(4, "Over ons", "[]");
        store.meta.insert((4, META_CSS.to_string()), "css".to_string());
        store.meta.insert((5, META_CSS.to_string()), "css".to_string());
        store
            .options
            .insert("_elementor_global_css".to_string(), "x".to_string());

        let report = purge_css(&mut store, CssScope::Post(4)).expect("purge");
        assert_eq!(report.post_rows, 1);
        assert_eq!(report.option_rows, 1);
        assert_eq!(report.options, vec!["_elementor_global_css".to_string()]);
        assert!(store.meta_value(5, META_CSS).is_some());

        let all = purge_css(&mut store, CssScope::All).expect("purge all");
        assert_eq!(all.post_rows, 1);
        assert!(purge_css(&mut store, CssScope::Post(99)).is_err());
    }

    #[test]
    fn page_url_uses_type_specific_query() {
        let mut store = MemoryStore::with_page(12, "Contact", "[]");
        let post = store.posts.get(&12).cloned().expect("post");
        let url = page_url("https://cholot.example/", &post).expect("url");
        assert_eq!(url.as_str(), "https://cholot.example/?page_id=12");

        store.options.insert("home".to_string(), "https://home.example/".to_string());
        let site = resolve_site_url(&ToolConfig::default(), &mut store);
        if std::env::var("CHOLOT_SITE_URL").is_err() {
            assert_eq!(site.expect("site"), "https://home.example");
        }

        let article = PostSummary {
            post_type: "post".to_string(),
            ..post
        };
        let url = page_url("https://cholot.example", &article).expect("url");
        assert_eq!(url.as_str(), "https://cholot.example/?p=12");
    }

    #[test]
    fn warm_detects_post_stylesheet() {
        let html = br#"<html><head><link rel="stylesheet" href="/wp-content/uploads/elementor/css/post-12.css?ver=1" id="elementor-post-12-css"></head></html>"#;
        let mut fetch =
            MockFetch::default().with_page("https://cholot.example/", 200, "text/html", html);
        let url = Url::parse("https://cholot.example/?page_id=12").expect("url");
        let report = warm_page(&mut fetch, &url, Some(12)).expect("warm");
        assert_eq!(report.status, 200);
        assert!(report.post_css_linked);
        assert!(!report.inline_css);
        assert!(fetch.requested[0].contains(CACHE_BUST_PARAM));
    }

    #[test]
    fn warm_detects_inline_post_css() {
        let html = br#"<html><head><style id="elementor-post-12">.elementor-12 .elementor-element.elementor-element-aaa0001{margin:0}</style></head></html>"#;
        let mut fetch =
            MockFetch::default().with_page("https://cholot.example/", 200, "text/html", html);
        let url = Url::parse("https://cholot.example/?page_id=12").expect("url");
        let report = warm_page(&mut fetch, &url, Some(12)).expect("warm");
        assert!(!report.post_css_linked);
        assert!(report.inline_css);
        assert!(report.has_css());

        let other = warm_page(&mut fetch, &url, Some(13)).expect("warm other");
        assert!(!other.has_css());
    }

    #[test]
    fn warm_without_post_id_looks_for_any_elementor_css() {
        let linked = br#"<link rel="stylesheet" href="https://cholot.example/wp-content/uploads/elementor/css/post-40.css">"#;
        let inline = br#"<style>.elementor-element-bbb0002{color:#b68c2f}</style>"#;
        let plain = b"<html><body>Welkom</body></html>";
        let mut fetch = MockFetch::default()
            .with_page("https://cholot.example/linked", 200, "text/html", linked)
            .with_page("https://cholot.example/inline", 200, "text/html", inline)
            .with_page("https://cholot.example/plain", 200, "text/html", plain);

        let report = |fetch: &mut MockFetch, path: &str| {
            let url = Url::parse(&format!("https://cholot.example/{path}")).expect("url");
            warm_page(fetch, &url, None).expect("warm")
        };
        let linked = report(&mut fetch, "linked");
        assert!(linked.post_css_linked && !linked.inline_css);
        let inline = report(&mut fetch, "inline");
        assert!(!inline.post_css_linked && inline.inline_css);
        assert!(!report(&mut fetch, "plain").has_css());
        assert_eq!(fetch.requested.len(), 3);
    }
}
