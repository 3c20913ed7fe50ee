use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::http::{DEFAULT_MAX_BODY_BYTES, Fetch};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub uploads_dir: PathBuf,
    /// Relative to `uploads_dir`; defaults to the current `YYYY/MM`.
    pub subdir: Option<String>,
    pub filename: Option<String>,
    pub overwrite: bool,
    pub max_bytes: u64,
    pub site_url: Option<String>,
}

impl DownloadOptions {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            subdir: None,
            filename: None,
            overwrite: false,
            max_bytes: DEFAULT_MAX_BODY_BYTES,
            site_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub public_url: Option<String>,
    pub bytes: u64,
    pub content_type: Option<String>,
    pub sha256: String,
    pub skipped: bool,
}

pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

pub fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|ch| ch == '-' || ch == '.');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

fn filename_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    sanitize_filename(segment)
}

/// Canonical extension when `name` already ends in a known image extension.
fn image_extension_of(name: &str) -> Option<&'static str> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension)
        .and_then(extension_for_mime)
}

/// Keep `requested` when its extension names the served image type; otherwise fold
/// its dots into the stem and append `extension`.
fn stored_filename(requested: &str, extension: &str) -> String {
    if image_extension_of(requested) == Some(extension) {
        return requested.to_string();
    }
    let stem = match image_extension_of(requested) {
        Some(_) => Path::new(requested)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(requested),
        None => requested,
    };
    format!("{}.{extension}", stem.replace('.', "-"))
}

fn validate_subdir(subdir: &str) -> Result<()> {
    for component in Path::new(subdir).components() {
        if !matches!(component, Component::Normal(_)) {
            bail!("upload subdir must be a plain relative path: {subdir}");
        }
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn public_url(site_url: Option<&str>, subdir: &str, file: &str) -> Option<String> {
    let site = site_url?.trim_end_matches('/');
    let subdir = subdir.trim_matches('/');
    Some(if subdir.is_empty() {
        format!("{site}/wp-content/uploads/{file}")
    } else {
        format!("{site}/wp-content/uploads/{subdir}/{file}")
    })
}

pub fn download_image(
    fetch: &mut dyn Fetch,
    url: &Url,
    options: &DownloadOptions,
) -> Result<DownloadReport> {
    let subdir = options
        .subdir
        .clone()
        .unwrap_or_else(|| Utc::now().format("%Y/%m").to_string());
    validate_subdir(&subdir)?;
    let target_dir = options.uploads_dir.join(&subdir);

    let requested = match &options.filename {
        Some(name) => sanitize_filename(name),
        None => filename_from_url(url),
    };

    if image_extension_of(&requested).is_some() {
        let path = target_dir.join(&requested);
        if path.exists() && !options.overwrite {
            return existing_report(path, options.site_url.as_deref(), &subdir, &requested);
        }
    }

    let page = fetch.fetch(url)?;
    if !page.is_success() {
        bail!("download of {url} failed with HTTP {}", page.status);
    }
    let mime = page.mime_type().unwrap_or_default();
    let Some(extension) = extension_for_mime(&mime) else {
        bail!("{url} is not an image (content type {mime:?})");
    };
    if page.body.len() as u64 > options.max_bytes {
        bail!(
            "{url} is {} bytes, over the {} byte limit",
            page.body.len(),
            options.max_bytes
        );
    }

    let filename = stored_filename(&requested, extension);
    let path = target_dir.join(&filename);
    if path.exists() && !options.overwrite {
        return existing_report(path, options.site_url.as_deref(), &subdir, &filename);
    }

    fs::create_dir_all(&target_dir)
        .with_context(|| format!("failed to create {}", target_dir.display()))?;
    fs::write(&path, &page.body).with_context(|| format!("failed to write {}", path.display()))?;
    info!(%url, path = %path.display(), bytes = page.body.len(), "downloaded image");

    Ok(DownloadReport {
        public_url: public_url(options.site_url.as_deref(), &subdir, &filename),
        bytes: page.body.len() as u64,
        content_type: Some(mime),
        sha256: sha256_hex(&page.body),
        skipped: false,
        path,
    })
}

fn existing_report(
    path: PathBuf,
    site_url: Option<&str>,
    subdir: &str,
    filename: &str,
) -> Result<DownloadReport> {
    let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    debug!(path = %path.display(), "image already present; skipping download");
    let content_type = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension)
        .map(str::to_string);
    Ok(DownloadReport {
        public_url: public_url(site_url, subdir, filename),
        bytes: bytes.len() as u64,
        content_type,
        sha256: sha256_hex(&bytes),
        skipped: true,
        path,
    })
}

fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "avif" => Some("image/avif"),
        _ => None,
    }
}
