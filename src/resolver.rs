/// Locator resolution: turn an arbitrary URL into a directly fetchable video locator
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use scraper::{Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{PipelineError, PipelineResult};

/// File extensions accepted as direct video locators
pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "avi", "mov", "mkv", "flv", "wmv", "webm", "ogg"];

/// Resolves a source URL into a direct video locator
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, url: &str) -> PipelineResult<String>;
}

/// HTTP resolver: extension check, header probe, then HTML scraping
#[derive(Clone)]
pub struct HttpResolver {
    client: Client,
}

impl HttpResolver {
    /// Create a new resolver instance
    pub fn new(timeout: Duration) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn resolve(&self, url: &str) -> PipelineResult<String> {
        if has_video_extension(url) {
            debug!("🎯 Direct video locator by extension: {}", url);
            return Ok(url.to_string());
        }

        let page_url = Url::parse(url).map_err(|e| PipelineError::InvalidLocator {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        // Header-only probe first
        let head = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| PipelineError::transient(url, e))?;

        if head.status().is_success() && is_video_content_type(content_type(&head).as_deref()) {
            debug!("🎯 Direct video locator by content type: {}", url);
            return Ok(url.to_string());
        }

        info!("📄 Fetching page to look for a video locator: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::transient(url, e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(PipelineError::transient(url, format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(PipelineError::InvalidLocator {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let content_type = content_type(&response);
        if is_video_content_type(content_type.as_deref()) {
            return Ok(url.to_string());
        }
        if !is_html_content_type(content_type.as_deref()) {
            debug!("Content type {:?} is neither video nor HTML", content_type);
            return Err(PipelineError::NotAVideo(url.to_string()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::transient(url, e))?;
        debug!("📄 Downloaded {} characters of HTML content", html.len());

        match extract_video_locator(&html, &page_url) {
            Some(locator) => {
                info!("✅ Resolved {} -> {}", url, locator);
                Ok(locator)
            }
            None => Err(PipelineError::NotAVideo(url.to_string())),
        }
    }
}

/// Whether the URL path ends in a known video extension
pub fn has_video_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let path = path.to_lowercase();

    match path.rsplit_once('.') {
        Some((_, ext)) => VIDEO_EXTENSIONS.contains(&ext),
        None => false,
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
}

fn is_video_content_type(content_type: Option<&str>) -> bool {
    content_type.map(|ct| ct.trim_start().starts_with("video/")).unwrap_or(false)
}

fn is_html_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
        .unwrap_or(false)
}

/// Scan an HTML page for a video locator.
///
/// Priority: first `<video src>`, then first `<source src>`, then the first
/// quoted string mentioning a video extension or "video". Relative locators
/// are joined against the page URL.
pub fn extract_video_locator(html: &str, page_url: &Url) -> Option<String> {
    let document = Html::parse_document(html);

    for selector_str in ["video[src]", "source[src]"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            let found = document
                .select(&selector)
                .filter_map(|el| el.value().attr("src"))
                .map(str::trim)
                .find(|src| !src.is_empty());

            if let Some(src) = found {
                debug!("Found locator via {}: {}", selector_str, src);
                return Some(absolutize(page_url, src));
            }
        }
    }

    quoted_candidates(html)
        .into_iter()
        .find(|candidate| looks_like_video_reference(candidate))
        .map(|candidate| {
            debug!("Found locator via pattern fallback: {}", candidate);
            absolutize(page_url, &candidate)
        })
}

fn quoted_candidates(html: &str) -> Vec<String> {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    let re = QUOTED.get_or_init(|| Regex::new(r#""([^"\s<>]+)"|'([^'\s<>]+)'"#).expect("valid regex"));

    re.captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn looks_like_video_reference(candidate: &str) -> bool {
    static MIME: OnceLock<Regex> = OnceLock::new();
    let mime = MIME.get_or_init(|| Regex::new(r"^video/[a-z0-9.+-]+$").expect("valid regex"));

    let lower = candidate.to_lowercase();
    // A bare MIME type such as type="video/mp4" is not a locator
    if mime.is_match(&lower) {
        return false;
    }

    let has_extension = VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lower.contains(&format!(".{}", ext)));
    has_extension || lower.contains("video")
}

fn absolutize(page_url: &Url, src: &str) -> String {
    page_url
        .join(src)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| src.to_string())
}
