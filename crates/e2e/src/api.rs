//! HTTP client wrapper for API tests

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use testbed_common::{PollConfig, Poller, Readiness};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// Configuration for an API client
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL that relative endpoints are joined onto
    pub base_url: String,

    /// Per-request timeout, unless a request overrides it
    pub timeout: Duration,

    /// Headers sent with every request
    pub default_headers: BTreeMap<String, String>,

    /// Bearer token sent with every request
    pub bearer_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("accept".to_string(), "application/json".to_string());
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(10),
            default_headers,
            bearer_token: None,
        }
    }
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub json: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Serialize `body` as the JSON request body
    pub fn json<T: Serialize>(mut self, body: &T) -> E2eResult<Self> {
        self.json = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A fully-read HTTP response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub elapsed: Duration,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json<T: DeserializeOwned>(&self) -> E2eResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn json_value(&self) -> E2eResult<serde_json::Value> {
        self.json()
    }

    /// Fail unless the response has exactly `expected` status
    pub fn expect_status(&self, expected: u16) -> E2eResult<&Self> {
        if self.status == expected {
            Ok(self)
        } else {
            Err(E2eError::UnexpectedStatus {
                method: self.method.clone(),
                url: self.url.clone(),
                status: self.status,
                expected,
                body: truncate(&self.body, 200),
            })
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Thin wrapper over `reqwest` that resolves endpoints against a base URL
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> E2eResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    /// Client with default configuration against `base_url`
    pub fn for_base_url(base_url: impl Into<String>) -> E2eResult<Self> {
        Self::new(ApiConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Clone of this client that authenticates as `token`
    pub fn with_bearer_token(&self, token: impl Into<String>) -> Self {
        let mut config = self.config.clone();
        config.bearer_token = Some(token.into());
        Self {
            http: self.http.clone(),
            config,
        }
    }

    /// Resolve an endpoint; absolute URLs pass through unchanged
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub async fn get(&self, endpoint: &str, options: RequestOptions) -> E2eResult<ApiResponse> {
        self.send(Method::GET, endpoint, options).await
    }

    pub async fn post(&self, endpoint: &str, options: RequestOptions) -> E2eResult<ApiResponse> {
        self.send(Method::POST, endpoint, options).await
    }

    pub async fn put(&self, endpoint: &str, options: RequestOptions) -> E2eResult<ApiResponse> {
        self.send(Method::PUT, endpoint, options).await
    }

    pub async fn patch(&self, endpoint: &str, options: RequestOptions) -> E2eResult<ApiResponse> {
        self.send(Method::PATCH, endpoint, options).await
    }

    pub async fn delete(&self, endpoint: &str, options: RequestOptions) -> E2eResult<ApiResponse> {
        self.send(Method::DELETE, endpoint, options).await
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        options: RequestOptions,
    ) -> E2eResult<ApiResponse> {
        let url = self.url(endpoint);
        let mut request = self.http.request(method.clone(), &url);

        for (name, value) in &self.config.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.json {
            request = request.json(body);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;
        let elapsed = start.elapsed();

        debug!("{} {} -> {} ({} ms)", method, url, status, elapsed.as_millis());

        Ok(ApiResponse {
            method: method.to_string(),
            url,
            status,
            headers,
            body,
            elapsed,
        })
    }

    /// Poll a GET until the endpoint answers with `status`.
    ///
    /// Connection failures and other statuses count as not ready, so this
    /// can be used while a service is still coming up.
    pub async fn wait_for_status(
        &self,
        endpoint: &str,
        status: u16,
        config: PollConfig,
    ) -> E2eResult<ApiResponse> {
        let url = self.url(endpoint);
        let response = Poller::new(config)
            .describe(format!("GET {} to return {}", url, status))
            .run(|| async {
                match self.get(endpoint, RequestOptions::default()).await {
                    Ok(resp) if resp.status == status => Ok(Readiness::Ready(resp)),
                    Ok(resp) => {
                        debug!("{} returned {} while waiting for {}", url, resp.status, status);
                        Ok(Readiness::Pending)
                    }
                    Err(E2eError::Http(e)) => {
                        debug!("{} not reachable yet: {}", url, e);
                        Ok(Readiness::Pending)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        info!("{} returned {}", url, status);
        Ok(response)
    }
}
