//! Wrapping HTTP transport used by every adapter, resolver strategy and fetch.
//!
//! The transport owns three policies that must never be bypassed by call
//! sites:
//!   * verb policy: HEAD probes are transparently issued as GET
//!     (`HttpConfig::downgrade_head`);
//!   * retry policy: 429/500/502/503/504 are retried with exponential
//!     backoff, GET only, bounded by `HttpConfig::max_attempts`;
//!   * header profiles: browser-like header sets selectable per request,
//!     rotated by the artifact fetcher on failure.
//!
//! Clients are cheap to build and are scoped per logical operation, so
//! retry state and cookies never leak between adapters.

use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::{HarvestError, Result};

/// Statuses treated as transient.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub fn is_retryable(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    /// Total attempts per GET, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Issue GET whenever a caller asks for HEAD.
    pub downgrade_head: bool,
    pub cookie_store: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            downgrade_head: true,
            cookie_store: false,
        }
    }
}

impl HttpConfig {
    /// Same policies with a session cookie jar, for sites that gate
    /// downloads behind a landing-page visit.
    pub fn with_cookies(&self) -> Self {
        Self { cookie_store: true, ..self.clone() }
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Header sets, from plain to most browser-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    Browser,
    AcceptPdf,
    AcceptAny,
    BrowserWithReferer,
}

impl HeaderProfile {
    /// Order the artifact fetcher walks through on failure.
    pub const ROTATION: [HeaderProfile; 4] = [
        HeaderProfile::Browser,
        HeaderProfile::AcceptPdf,
        HeaderProfile::AcceptAny,
        HeaderProfile::BrowserWithReferer,
    ];

    pub fn headers(&self, url: &str, user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let accept = match self {
            HeaderProfile::Browser | HeaderProfile::BrowserWithReferer => {
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8"
            }
            HeaderProfile::AcceptPdf => "application/pdf",
            HeaderProfile::AcceptAny => "*/*",
        };
        headers.insert(ACCEPT, HeaderValue::from_static(accept));

        if *self == HeaderProfile::BrowserWithReferer {
            if let Some(origin) = origin_of(url) {
                if let Ok(v) = HeaderValue::from_str(&origin) {
                    headers.insert(REFERER, v);
                }
            }
        }
        headers
    }
}

/// `scheme://host[:port]/` of a URL.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.join("/").ok().map(|u| u.to_string())
}

/// A fetched markup page.
#[derive(Debug, Clone)]
pub struct Page {
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
    user_agent: String,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .cookie_store(config.cookie_store)
            .build()
            .map_err(|e| HarvestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string();

        Ok(Self { client, config, user_agent })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The verb actually put on the wire for a requested verb.
    pub fn effective_method(&self, method: Method) -> Method {
        if method == Method::HEAD && self.config.downgrade_head {
            debug!("Downgrading HEAD request to GET");
            Method::GET
        } else {
            method
        }
    }

    /// Sends a request under the verb and retry policies.
    ///
    /// Non-success statuses are returned, not raised; once retries are
    /// exhausted the last response is handed back. `customize` is applied
    /// on every attempt (query strings, extra headers).
    pub async fn send<F>(
        &self,
        method: Method,
        url: &str,
        profile: HeaderProfile,
        customize: F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let method = self.effective_method(method);
        let retry_allowed = method == Method::GET;
        let max_attempts = if retry_allowed { self.config.max_attempts.max(1) } else { 1 };

        let mut attempt = 1;
        loop {
            let builder = self
                .client
                .request(method.clone(), url)
                .headers(profile.headers(url, &self.user_agent));
            let outcome = customize(builder).send().await;

            match outcome {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !is_retryable(status) || attempt >= max_attempts {
                        return Ok(resp);
                    }
                    warn!(url, status, attempt, "Transient status, backing off");
                }
                Err(e) if e.is_connect() && attempt < max_attempts => {
                    warn!(url, attempt, error = %e, "Connection failed, backing off");
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.config.backoff_for(attempt)).await;
            attempt += 1;
        }
    }

    /// GET with the plain browser profile.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send(Method::GET, url, HeaderProfile::Browser, |rb| rb).await
    }

    pub async fn get_with(&self, url: &str, profile: HeaderProfile) -> Result<Response> {
        self.send(Method::GET, url, profile, |rb| rb).await
    }

    /// Probe a URL. Goes out as GET unless the downgrade policy is off.
    pub async fn head(&self, url: &str) -> Result<Response> {
        self.send(Method::HEAD, url, HeaderProfile::Browser, |rb| rb).await
    }

    /// GET a JSON document; non-success statuses become `HarvestError::Status`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
    ) -> Result<T> {
        let resp = self
            .send(Method::GET, url, HeaderProfile::AcceptAny, |mut rb| {
                rb = rb.query(query);
                for (name, value) in headers {
                    rb = rb.header(*name, value.as_str());
                }
                rb
            })
            .await?;
        let resp = ensure_success(resp)?;
        Ok(resp.json::<T>().await?)
    }

    /// GET a text document with a query string.
    pub async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let resp = self
            .send(Method::GET, url, HeaderProfile::Browser, |rb| rb.query(query))
            .await?;
        let resp = ensure_success(resp)?;
        Ok(resp.text().await?)
    }

    /// GET a markup page, keeping the post-redirect URL.
    pub async fn get_page(&self, url: &str) -> Result<Page> {
        self.get_page_with(url, &[]).await
    }

    pub async fn get_page_with(&self, url: &str, query: &[(&str, String)]) -> Result<Page> {
        let resp = self
            .send(Method::GET, url, HeaderProfile::Browser, |rb| rb.query(query))
            .await?;
        let resp = ensure_success(resp)?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(Page { final_url, status, body })
    }
}

/// Turns a non-2xx response into `HarvestError::Status`.
pub fn ensure_success(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(HarvestError::Status {
            status: resp.status().as_u16(),
            url: resp.url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn fast_config() -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(1),
            ..HttpConfig::default()
        }
    }

    #[test]
    fn test_head_is_downgraded_by_default() {
        let client = HttpClient::new(HttpConfig::default()).unwrap();
        assert_eq!(client.effective_method(Method::HEAD), Method::GET);
        assert_eq!(client.effective_method(Method::POST), Method::POST);
    }

    #[test]
    fn test_head_kept_when_policy_disabled() {
        let cfg = HttpConfig { downgrade_head: false, ..HttpConfig::default() };
        let client = HttpClient::new(cfg).unwrap();
        assert_eq!(client.effective_method(Method::HEAD), Method::HEAD);
    }

    #[test]
    fn test_backoff_doubles() {
        let cfg = HttpConfig { backoff_base: Duration::from_millis(100), ..HttpConfig::default() };
        assert_eq!(cfg.backoff_for(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff_for(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_referer_only_on_last_profile() {
        let url = "https://www.nature.com/articles/s41586-020-2649-2";
        let plain = HeaderProfile::Browser.headers(url, "ua");
        assert!(plain.get(REFERER).is_none());

        let referer = HeaderProfile::BrowserWithReferer.headers(url, "ua");
        assert_eq!(referer.get(REFERER).unwrap(), "https://www.nature.com/");

        let pdf = HeaderProfile::AcceptPdf.headers(url, "ua");
        assert_eq!(pdf.get(ACCEPT).unwrap(), "application/pdf");
    }

    #[tokio::test]
    async fn test_head_probe_goes_out_as_get() {
        let mut server = Server::new_async().await;
        let get_mock = server
            .mock("GET", "/probe")
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create_async()
            .await;
        let head_mock = server.mock("HEAD", "/probe").expect(0).create_async().await;

        let client = HttpClient::new(fast_config()).unwrap();
        let resp = client.head(&format!("{}/probe", server.url())).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        get_mock.assert_async().await;
        head_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_status_retried_three_times() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = HttpClient::new(fast_config()).unwrap();
        let resp = client.get(&format!("{}/flaky", server.url())).await.unwrap();
        assert_eq!(resp.status().as_u16(), 503);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = HttpClient::new(fast_config()).unwrap();
        let err = client
            .get_page(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Status { status: 404, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/limited")
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let client = HttpClient::new(fast_config()).unwrap();
        let err = client
            .get_json::<serde_json::Value>(&format!("{}/limited", server.url()), &[], &[])
            .await
            .unwrap_err();
        assert!(err.is_transient_status());
        mock.assert_async().await;
    }
}
