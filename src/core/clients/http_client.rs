use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    Client, ClientBuilder, Method,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::UpstreamError;
use crate::core::metrics::proxy_metrics::UPSTREAM_REQUESTS;
use crate::core::utils::create_error_preview;

const JSON_ACCEPT: &str = "application/json,text/plain;q=0.9,*/*;q=0.1";
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.1";
const REDACTED: &str = "<redacted>";

/// Third-party services the proxy talks to, used for metric labels and log prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Beaconchain,
    Glacier,
    Llama,
    ValidatorQueue,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Beaconchain => "beaconcha.in",
            Provider::Glacier => "glacier",
            Provider::Llama => "defillama",
            Provider::ValidatorQueue => "validatorqueue.com",
        }
    }
}

/// Join a base URL and a path, tolerating slashes on either side
pub fn construct_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// `https://glacier-api.avax.network/` -> `glacier-api.avax.network`
pub fn host_label(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

/// One outbound call. `display_url` is what ends up in logs and error bodies.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    provider: Provider,
    method: Method,
    url: String,
    display_url: String,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl UpstreamRequest {
    pub fn get(provider: Provider, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            provider,
            method: Method::GET,
            display_url: url.clone(),
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(provider: Provider, url: impl Into<String>, body: Value) -> Self {
        let mut request = Self::get(provider, url);
        request.method = Method::POST;
        request.body = Some(body);
        request
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds `Authorization: Bearer <key>` when a key is configured
    pub fn bearer(self, key: Option<&str>) -> Self {
        match key {
            Some(key) => self.header(AUTHORIZATION.as_str(), format!("Bearer {}", key)),
            None => self,
        }
    }

    /// Hide a credential that is embedded in the URL itself (DefiLlama pro paths)
    pub fn redact(mut self, secret: &str) -> Self {
        if !secret.is_empty() {
            self.display_url = self
                .display_url
                .replace(&urlencoding::encode(secret).into_owned(), REDACTED)
                .replace(secret, REDACTED);
        }
        self
    }

    pub fn display_url(&self) -> &str {
        &self.display_url
    }
}

lazy_static! {
    static ref SCRIPT_BLOCK: Regex = Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap();
    static ref STYLE_BLOCK: Regex = Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap();
    static ref HTML_COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Reduce an HTML page to a single line of visible text so regexes survive markup changes
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(html, " ");
    let text = STYLE_BLOCK.replace_all(&text, " ");
    let text = HTML_COMMENT.replace_all(&text, " ");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Thin reqwest wrapper shared by every handler
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch_json(&self, request: &UpstreamRequest) -> Result<Value, UpstreamError> {
        let body = self.send(request, JSON_ACCEPT).await?;
        serde_json::from_str(&body).map_err(|e| {
            warn!(
                "(Upstream) {} returned malformed JSON from {}: {}",
                request.provider.label(),
                request.display_url,
                e
            );
            UpstreamError::parse(&request.display_url, create_error_preview(&body, 500), &e)
        })
    }

    /// Fetches an HTML page and returns its visible text
    pub async fn fetch_page_text(&self, request: &UpstreamRequest) -> Result<String, UpstreamError> {
        let body = self.send(request, HTML_ACCEPT).await?;
        Ok(html_to_text(&body))
    }

    /// Tries each candidate in order; the first response that parses and passes `accept` wins.
    /// Only the last failure is reported when every candidate fails.
    pub async fn fetch_first_json<F>(
        &self,
        candidates: &[UpstreamRequest],
        accept: F,
    ) -> Result<(usize, Value), UpstreamError>
    where
        F: Fn(&Value) -> bool,
    {
        let mut last_error = None;
        for (idx, request) in candidates.iter().enumerate() {
            match self.fetch_json(request).await {
                Ok(json) if accept(&json) => return Ok((idx, json)),
                Ok(_) => {
                    warn!(
                        "(Upstream) {} response from {} has an unexpected shape, trying next candidate",
                        request.provider.label(),
                        request.display_url
                    );
                    last_error = Some(UpstreamError::schema(
                        &request.display_url,
                        "unexpected response shape",
                    ));
                }
                Err(e) => {
                    warn!("(Upstream) Candidate {} failed: {}", idx, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| UpstreamError::schema("", "no upstream candidates configured")))
    }

    /// Returns the body of a 2xx response. Non-2xx bodies are captured into the error.
    async fn send(&self, request: &UpstreamRequest, accept: &str) -> Result<String, UpstreamError> {
        debug!(
            "(Upstream) {} {} {}",
            request.method,
            request.provider.label(),
            request.display_url
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(ACCEPT, accept);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                // reqwest errors carry the full URL, which may embed a key
                let e = e.without_url();
                UPSTREAM_REQUESTS
                    .with_label_values(&[request.provider.label(), "error"])
                    .inc();
                warn!(
                    "(Upstream) {} request to {} failed: {}",
                    request.provider.label(),
                    request.display_url,
                    e
                );
                return Err(UpstreamError::transport(&request.display_url, &e));
            }
        };

        let status = response.status();
        UPSTREAM_REQUESTS
            .with_label_values(&[request.provider.label(), &status.as_u16().to_string()])
            .inc();

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::transport(&request.display_url, &e.without_url()))?;

        if !status.is_success() {
            warn!(
                "(Upstream) {} returned {} for {}: {}",
                request.provider.label(),
                status.as_u16(),
                request.display_url,
                create_error_preview(&body, 200)
            );
            return Err(UpstreamError::http(&request.display_url, status.as_u16(), body));
        }

        Ok(body)
    }
}
