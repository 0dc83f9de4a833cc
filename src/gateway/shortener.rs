//! URL-shortener client.
//!
//! `GET {endpoint}?url={long_url}` with RapidAPI headers. The service answers
//! with a small XML document whose first element holds the short link.
//! Transient failures are retried by the middleware; the caller decides what
//! to do with a final error (the token store falls back to the long URL).

use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use url::Url;

use crate::config::Config;
use crate::errors::GatewayError;

#[derive(Clone)]
pub struct ShortenerClient {
    client: ClientWithMiddleware,
    endpoint: Url,
    api_host: String,
    api_key: String,
}

impl ShortenerClient {
    pub fn new(
        endpoint: &str,
        api_host: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| GatewayError::Parse(format!("invalid shortener url: {}", e)))?;

        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            endpoint,
            api_host: api_host.into(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from config; `None` when no shortener is configured.
    pub fn from_config(cfg: &Config) -> Result<Option<Self>, GatewayError> {
        let Some(endpoint) = cfg.shortener_url.as_deref() else {
            return Ok(None);
        };
        let client = Self::new(
            endpoint,
            cfg.shortener_host.clone(),
            cfg.shortener_api_key.clone().unwrap_or_default(),
            Duration::from_secs(cfg.http_timeout_secs),
            cfg.http_max_retries,
        )?;
        Ok(Some(client))
    }

    pub async fn shorten(&self, long_url: &str) -> Result<String, GatewayError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("url", long_url);

        let resp = self
            .client
            .get(url)
            .header("x-rapidapi-host", &self.api_host)
            .header("x-rapidapi-key", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        let short = first_element_text(&body)
            .ok_or_else(|| GatewayError::Parse("shortener response has no link element".into()))?;

        tracing::debug!(long_url, short_url = %short, "url shortened");
        Ok(short)
    }
}

/// Text content of the first element of an XML document.
///
/// Skips the prolog, comments, and doctype. Returns `None` for documents
/// without elements, self-closing first elements, or blank content.
pub fn first_element_text(xml: &str) -> Option<String> {
    let mut rest = xml;
    loop {
        let start = rest.find('<')?;
        rest = &rest[start..];
        if rest.starts_with("<?") {
            rest = &rest[rest.find("?>")? + 2..];
        } else if rest.starts_with("<!--") {
            rest = &rest[rest.find("-->")? + 3..];
        } else if rest.starts_with("<!") {
            rest = &rest[rest.find('>')? + 1..];
        } else {
            break;
        }
    }

    let tag_end = rest.find('>')?;
    let open_tag = &rest[1..tag_end];
    if open_tag.ends_with('/') {
        return None;
    }
    let name = open_tag.split_whitespace().next()?;
    let content = &rest[tag_end + 1..];
    let close = format!("</{}>", name);
    let inner = &content[..content.find(&close)?];

    let text = unescape(strip_tags(inner).trim());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ── Tests ──────────────────────────────────────────────────────
