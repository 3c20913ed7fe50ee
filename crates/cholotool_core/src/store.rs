use anyhow::Result;
use serde::Serialize;

pub const META_DATA: &str = "_elementor_data";
pub const META_VERSION: &str = "_elementor_version";
pub const META_EDIT_MODE: &str = "_elementor_edit_mode";
pub const META_PAGE_SETTINGS: &str = "_elementor_page_settings";
pub const META_CSS: &str = "_elementor_css";
pub const META_TEMPLATE_TYPE: &str = "_elementor_template_type";

pub const ELEMENTOR_META_KEYS: &[&str] = &[
    META_DATA,
    META_VERSION,
    META_EDIT_MODE,
    META_PAGE_SETTINGS,
    META_CSS,
    META_TEMPLATE_TYPE,
];

/// Options Elementor rebuilds on the next front-end request once deleted.
pub const GLOBAL_CSS_OPTIONS: &[&str] = &[
    "_elementor_global_css",
    "elementor-custom-breakpoints-files",
    "_elementor_assets_data",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostSummary {
    pub id: u64,
    pub title: String,
    pub slug: String,
    pub post_type: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuilderPost {
    pub post: PostSummary,
    pub data_bytes: u64,
}

/// The slice of the WordPress schema the tool reads and writes.
pub trait PostMetaStore {
    fn post(&mut self, post_id: u64) -> Result<Option<PostSummary>>;
    fn builder_posts(&mut self) -> Result<Vec<BuilderPost>>;
    fn get_meta(&mut self, post_id: u64, key: &str) -> Result<Option<String>>;
    fn set_meta(&mut self, post_id: u64, key: &str, value: &str) -> Result<()>;
    fn delete_meta(&mut self, post_id: u64, key: &str) -> Result<u64>;
    fn delete_meta_everywhere(&mut self, key: &str) -> Result<u64>;
    fn get_option(&mut self, name: &str) -> Result<Option<String>>;
    fn delete_option(&mut self, name: &str) -> Result<u64>;
}
