//! Source ingestion: turn a locator (local path or HTTP(S) URL) into plain text.

use crate::utils::http::build_client;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("source text too short ({chars} chars, need at least {min})")]
    TooShort { chars: usize, min: usize },
}

#[async_trait]
pub trait Ingester: Send + Sync {
    async fn extract(&self, locator: &str) -> Result<String, IngestError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_min_chars() -> usize {
    200
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

/// Reject text below the configured minimum.
pub fn ensure_length(text: &str, min_chars: usize) -> Result<(), IngestError> {
    let chars = text.trim().chars().count();
    if chars < min_chars {
        return Err(IngestError::TooShort {
            chars,
            min: min_chars,
        });
    }
    Ok(())
}

/// Plain-text and HTML sources only. Rich formats (PDF, office documents) are rejected.
pub struct BasicIngester {
    client: Client,
    min_chars: usize,
}

impl BasicIngester {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            client: build_client(Duration::from_secs(config.fetch_timeout_secs)),
            min_chars: config.min_chars,
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Unreachable(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(IngestError::Unreachable(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/plain")
            .to_ascii_lowercase();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::Unreachable(format!("{}: {}", url, e)))?;

        if content_type.starts_with("text/html") || content_type.starts_with("application/xhtml") {
            Ok(html_to_text(&body))
        } else if content_type.starts_with("text/") {
            Ok(body)
        } else {
            Err(IngestError::Unsupported(format!(
                "{} has content type {}",
                url, content_type
            )))
        }
    }

    async fn read_file(&self, path: &Path) -> Result<String, IngestError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let content = match ext.as_str() {
            "" | "txt" | "md" | "markdown" | "text" => tokio::fs::read_to_string(path).await,
            "html" | "htm" => tokio::fs::read_to_string(path).await.map(|h| html_to_text(&h)),
            other => {
                return Err(IngestError::Unsupported(format!(
                    "'.{}' files are not supported",
                    other
                )))
            }
        };
        content.map_err(|e| IngestError::Unreachable(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl Ingester for BasicIngester {
    async fn extract(&self, locator: &str) -> Result<String, IngestError> {
        let locator = locator.trim();
        let text = if locator.starts_with("http://") || locator.starts_with("https://") {
            self.fetch(locator).await?
        } else if locator.contains("://") {
            return Err(IngestError::Unsupported(format!("scheme of '{}'", locator)));
        } else {
            self.read_file(Path::new(locator)).await?
        };

        let text = collapse_whitespace(&text);
        ensure_length(&text, self.min_chars)?;
        tracing::debug!(locator, chars = text.chars().count(), "source ingested");
        Ok(text)
    }
}

fn html_to_text(html: &str) -> String {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let script = SCRIPT.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
            .expect("static regex")
    });
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("static regex"));

    let without_scripts = script.replace_all(html, " ");
    let text = tag.replace_all(&without_scripts, " ");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
