//! Thin reqwest wrapper for the notice source page and its PDF bulletins.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::config::{FetchConfig, USER_AGENT};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    page_timeout: Duration,
    pdf_timeout: Duration,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            page_timeout: config.page_timeout,
            pdf_timeout: config.pdf_timeout,
        })
    }

    /// GET a page as text, decoded with the response charset.
    pub async fn get_page(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .timeout(self.page_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()?;
        resp.text().await.context("Failed to read page body")
    }

    /// GET a PDF bulletin as raw bytes.
    pub async fn get_pdf(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .timeout(self.pdf_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()?;
        let body = resp.bytes().await.context("Failed to read PDF body")?;
        Ok(body.to_vec())
    }
}
