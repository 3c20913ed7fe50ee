pub mod backup;
pub mod builder;
pub mod config;
pub mod css;
pub mod document;
pub mod http;
pub mod ids;
pub mod media;
pub mod migrate;
pub mod mysql;
pub mod pages;
pub mod repair;
pub mod runtime;
pub mod smoke;
pub mod store;
pub mod templates;
pub mod validate;
pub mod walk;
pub mod wxr;
