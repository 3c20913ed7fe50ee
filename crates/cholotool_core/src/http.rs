use std::io::Read;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::config::ToolConfig;

pub const DEFAULT_MAX_BODY_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub max_body_bytes: u64,
}

impl HttpClientConfig {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            max_retries: 2,
            retry_delay_ms: 500,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub elapsed_ms: u64,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Media type without parameters, lowercased.
    pub fn mime_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Anything that can GET a URL. Non-success statuses are returned, not raised.
pub trait Fetch {
    fn fetch(&mut self, url: &Url) -> Result<FetchedPage>;
}

pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn wait_before_retry(&self, attempt: usize) {
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let delay = backoff_delay_ms(self.config.retry_delay_ms, attempt, jitter);
        debug!(attempt, delay_ms = delay, "backing off before retry");
        sleep(Duration::from_millis(delay));
    }
}

/// `base * 2^attempt + jitter`, saturating.
fn backoff_delay_ms(base_ms: u64, attempt: usize, jitter_ms: u64) -> u64 {
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
    base_ms
        .saturating_mul(2u64.saturating_pow(exponent))
        .saturating_add(jitter_ms)
}

impl Fetch for HttpClient {
    fn fetch(&mut self, url: &Url) -> Result<FetchedPage> {
        let started = Instant::now();
        for attempt in 0..=self.config.max_retries {
            debug!(%url, attempt, "GET");
            let response = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if attempt < self.config.max_retries && is_retryable_status(status) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    if let Some(length) = response.content_length()
                        && length > self.config.max_body_bytes
                    {
                        bail!(
                            "{url} declares {length} bytes, over the {} byte limit",
                            self.config.max_body_bytes
                        );
                    }
                    let body = read_limited(response, self.config.max_body_bytes)
                        .with_context(|| format!("failed to read body of {url}"))?;
                    let elapsed_ms =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    return Ok(FetchedPage {
                        url: url.to_string(),
                        status: status.as_u16(),
                        content_type,
                        body,
                        elapsed_ms,
                    });
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to GET {url}"));
                }
            }
        }

        bail!("GET {url} exhausted retry budget")
    }
}

fn read_limited(response: impl Read, max_bytes: u64) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    response
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut body)
        .context("body read failed")?;
    if body.len() as u64 > max_bytes {
        bail!("body exceeds the {max_bytes} byte limit");
    }
    Ok(body)
}

pub fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid URL: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("unsupported URL scheme {} in {raw}", url.scheme());
    }
    Ok(url)
}

fn is_retryable_status(status: StatusCode) -> bool {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::NOT_IMPLEMENTED | StatusCode::HTTP_VERSION_NOT_SUPPORTED => false,
        other => other.is_server_error(),
    }
}

/// Only transport failures that can clear up on their own.
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
