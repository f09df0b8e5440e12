// Source acquisition
// Turns files and web pages into plain text ready for ingestion


use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use scraper::{Html, Node};
use tracing::debug;
use ureq::Agent;
use url::Url;

use crate::{Result, RetrievalError};

/// Elements whose text is never part of the readable page
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

const USER_AGENT: &str = concat!("tenant-rag/", env!("CARGO_PKG_VERSION"));

/// Readable text of an HTML document.
///
/// Script and style content is dropped. Each line is trimmed, runs of two
/// spaces split a line into separate phrases, and the non-empty phrases are
/// joined with newlines.
#[inline]
pub fn extract_text_from_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::with_capacity(html.len() / 2);

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| SKIPPED_ELEMENTS.contains(&element.name()))
        });
        if !hidden {
            raw.push_str(text);
        }
    }

    normalize_whitespace(&raw)
}

fn normalize_whitespace(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .flat_map(|line| line.split("  "))
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a URL, accepting only HTTP and HTTPS with a host
#[inline]
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| RetrievalError::InvalidInput(format!("invalid URL '{}': {}", url, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(RetrievalError::InvalidInput(format!(
            "URL must use HTTP or HTTPS: {}",
            url
        )));
    }
    if parsed.host_str().is_none() {
        return Err(RetrievalError::InvalidInput(format!(
            "URL must have a host: {}",
            url
        )));
    }

    Ok(parsed)
}

/// Download a page and return its readable text.
///
/// The request runs on tokio's blocking pool and is bounded by `timeout`.
/// Non-success statuses and transport failures are returned as errors.
#[inline]
pub async fn fetch_url_text(url: &str, timeout: Duration) -> Result<String> {
    let url = validate_url(url)?;

    tokio::task::spawn_blocking(move || fetch_blocking(&url, timeout))
        .await
        .map_err(|e| RetrievalError::Other(anyhow!("fetch task failed: {}", e)))?
}

fn fetch_blocking(url: &Url, timeout: Duration) -> Result<String> {
    let agent: Agent = Agent::config_builder()
        .timeout_global(Some(timeout))
        .user_agent(USER_AGENT)
        .build()
        .into();

    debug!("Making HTTP GET request to: {}", url);
    let html = match agent.get(url.as_str()).call() {
        Ok(mut response) => response
            .body_mut()
            .read_to_string()
            .with_context(|| format!("Failed to read response body from {}", url))?,
        Err(ureq::Error::StatusCode(status)) => {
            debug!("HTTP request failed with status {}: {}", status, url);
            return Err(anyhow!("HTTP error {} fetching {}", status, url).into());
        }
        Err(e) => {
            return Err(anyhow::Error::from(e)
                .context(format!("Failed to make HTTP request to {}", url))
                .into());
        }
    };

    debug!("Fetched {} bytes from {}", html.len(), url);
    Ok(extract_text_from_html(&html))
}

/// Read a document from disk as text.
///
/// `.pdf` files have their text extracted, `.html`/`.htm` files go through
/// [`extract_text_from_html`] and everything else must be UTF-8 text.
#[inline]
pub fn read_source_file(path: &Path) -> Result<String> {
    if has_extension(path, &["pdf"]) {
        return read_pdf(path);
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::InvalidData {
            RetrievalError::InvalidInput(format!("{} is not UTF-8 text", path.display()))
        } else {
            RetrievalError::Io(e)
        }
    })?;

    if has_extension(path, &["html", "htm"]) {
        debug!("Extracting text from HTML file {}", path.display());
        Ok(extract_text_from_html(&content))
    } else {
        Ok(content)
    }
}

fn read_pdf(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    debug!("Extracting text from {} byte PDF {}", bytes.len(), path.display());

    let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
        RetrievalError::InvalidInput(format!("{} is not a readable PDF: {}", path.display(), e))
    })?;
    Ok(normalize_whitespace(&text))
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| extensions.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
