//! Best-effort collection of planned-outage notices from the utility site.
//!
//! Strategies, in order: PDF bulletins linked from the page, then keyword
//! fragments of the visible page text, then a raw regex scan of the HTML.
//! Every failure is logged and degrades to the next strategy; callers always
//! get a (possibly empty) list.

pub mod client;
pub mod page;
pub mod pdf;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::notices::{self, OutageNotice};

pub use client::HttpClient;

pub struct NoticeFetcher {
    client: HttpClient,
    config: FetchConfig,
}

impl NoticeFetcher {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        let client = HttpClient::new(&config)?;
        Ok(Self { client, config })
    }

    /// Fetch, parse and merge. Never fails.
    pub async fn run(&self) -> Vec<OutageNotice> {
        let source = self.config.source_url.as_str();

        let html = match self.client.get_page(source).await {
            Ok(html) => html,
            Err(e) => {
                warn!(source, error = %format!("{e:#}"), "Failed to fetch source");
                String::new()
            }
        };

        let links = page::pdf_links(&html, source);
        let notices = if links.is_empty() {
            self.from_page(&html)
        } else {
            info!(count = links.len(), "Found PDF bulletins");
            self.from_pdfs(&links).await
        };

        notices::merge_and_sort(notices)
    }

    async fn from_pdfs(&self, links: &[String]) -> Vec<OutageNotice> {
        let mut notices = Vec::new();
        for link in links.iter().take(self.config.max_pdfs) {
            match self.pdf_notices(link).await {
                Ok(found) => {
                    debug!(pdf = %link, count = found.len(), "Parsed bulletin");
                    notices.extend(found);
                }
                Err(e) => warn!(pdf = %link, error = %format!("{e:#}"), "Failed to parse PDF bulletin"),
            }
        }
        notices
    }

    async fn pdf_notices(&self, link: &str) -> anyhow::Result<Vec<OutageNotice>> {
        let bytes = self.client.get_pdf(link).await?;
        let source = link.to_string();
        // PDF parsing is CPU-bound and lopdf can panic on malformed files
        off_runtime(move || -> anyhow::Result<Vec<OutageNotice>> {
            let text = pdf::pdf_text(&bytes)?;
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(notices::extract_notices(&text, &source))
        })
        .await
    }

    fn from_page(&self, html: &str) -> Vec<OutageNotice> {
        let source = self.config.source_url.as_str();
        let max = self.config.max_fragments;

        let fragments = page::text_fragments(html);
        let found = notices::keyword_fragments(fragments.iter().map(String::as_str), source, max);
        if !found.is_empty() {
            debug!(count = found.len(), "Notices from page text");
            return found;
        }

        let found = notices::scan_raw_html(html, source, max);
        debug!(count = found.len(), "Notices from raw HTML scan");
        found
    }
}

/// Run `parse` on the blocking pool; a panic inside it becomes an error.
async fn off_runtime<T, F>(parse: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(parse)
        .await
        .context("PDF parser panicked")?
}

/// One-shot convenience: build a fetcher and run it, treating a client
/// construction failure like an unreachable source.
pub async fn collect_notices(config: FetchConfig) -> Vec<OutageNotice> {
    match NoticeFetcher::new(config) {
        Ok(fetcher) => fetcher.run().await,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Failed to initialise fetcher");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parser_panic_becomes_an_error() {
        let result: anyhow::Result<Vec<OutageNotice>> =
            off_runtime(|| panic!("font dictionary without /Type")).await;
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("PDF parser panicked"));
    }

    #[tokio::test]
    async fn parser_errors_pass_through() {
        let result: anyhow::Result<()> = off_runtime(|| anyhow::bail!("Failed to parse PDF")).await;
        assert_eq!(result.unwrap_err().to_string(), "Failed to parse PDF");
    }
}
