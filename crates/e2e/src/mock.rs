//! Mock helpers
//!
//! Two flavours:
//! - [`MockRoute`]: browser-side interception, rendered into the Playwright
//!   script as a `page.route` handler that fulfills matching requests
//! - [`MockBackend`]: a real HTTP server (wiremock) for API-level tests

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use testbed_common::{PollConfig, Poller, Readiness};
use tracing::{debug, info};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::error::{E2eError, E2eResult};

/// A request interception rule installed in the browser context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRoute {
    /// URL glob as understood by Playwright (`**/api/users*`)
    pub url: String,

    /// Only intercept this HTTP method; others fall through
    #[serde(default)]
    pub method: Option<String>,

    #[serde(default = "default_status")]
    pub status: u16,

    /// Response body; strings are sent verbatim, anything else as JSON
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub delay_ms: u64,

    /// Abort the request instead of answering it
    #[serde(default)]
    pub abort: bool,
}

fn default_status() -> u16 {
    200
}

impl MockRoute {
    fn base(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: None,
            status: 200,
            body: None,
            content_type: None,
            headers: BTreeMap::new(),
            delay_ms: 0,
            abort: false,
        }
    }

    /// Answer with a JSON body
    pub fn json(url: &str, body: serde_json::Value) -> Self {
        Self {
            body: Some(body),
            content_type: Some("application/json".to_string()),
            ..Self::base(url)
        }
    }

    /// Answer with a plain text body
    pub fn text(url: &str, body: &str) -> Self {
        Self {
            body: Some(serde_json::Value::String(body.to_string())),
            content_type: Some("text/plain".to_string()),
            ..Self::base(url)
        }
    }

    /// Answer with an empty body and the given status
    pub fn status(url: &str, status: u16) -> Self {
        Self {
            status,
            ..Self::base(url)
        }
    }

    /// Fail the request at the network level
    pub fn abort(url: &str) -> Self {
        Self {
            abort: true,
            ..Self::base(url)
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_ascii_uppercase());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    fn body_text(&self) -> String {
        match &self.body {
            None => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Render as a Playwright `page.route` call
    pub fn to_js(&self) -> String {
        let mut js = format!("    await page.route({}, async (route) => {{\n", js_str(&self.url));

        if let Some(m) = &self.method {
            js.push_str(&format!(
                "      if (route.request().method() !== {}) {{ return route.fallback(); }}\n",
                js_str(m)
            ));
        }
        if self.delay_ms > 0 {
            js.push_str(&format!(
                "      await new Promise((r) => setTimeout(r, {}));\n",
                self.delay_ms
            ));
        }

        if self.abort {
            js.push_str("      await route.abort();\n");
        } else {
            let headers =
                serde_json::to_string(&self.headers).unwrap_or_else(|_| "{}".to_string());
            let content_type = self
                .content_type
                .as_deref()
                .map(js_str)
                .unwrap_or_else(|| "undefined".to_string());
            js.push_str(&format!(
                "      await route.fulfill({{ status: {}, contentType: {}, headers: {}, body: {} }});\n",
                self.status,
                content_type,
                headers,
                js_str(&self.body_text())
            ));
        }

        js.push_str("    });\n");
        js
    }
}

/// Quote a string as a JS literal
pub(crate) fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// HTTP mock server for API tests
pub struct MockBackend {
    server: MockServer,
}

impl MockBackend {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        info!("Mock backend listening at {}", server.uri());
        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Answer `method path` with a JSON body
    pub async fn stub_json(
        &self,
        http_method: &str,
        url_path: &str,
        status: u16,
        body: serde_json::Value,
    ) {
        debug!("Stubbing {} {} -> {}", http_method, url_path, status);
        Mock::given(method(http_method.to_ascii_uppercase().as_str()))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer with `pending_status` for the first `pending` calls, then
    /// with `status` and `body`. Useful for exercising polling callers.
    pub async fn stub_sequence(
        &self,
        http_method: &str,
        url_path: &str,
        pending: u64,
        pending_status: u16,
        status: u16,
        body: serde_json::Value,
    ) {
        let verb = http_method.to_ascii_uppercase();
        Mock::given(method(verb.as_str()))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(pending_status))
            .up_to_n_times(pending)
            .with_priority(1)
            .mount(&self.server)
            .await;
        Mock::given(method(verb.as_str()))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Number of requests received for `url_path`
    pub async fn received(&self, url_path: &str) -> E2eResult<usize> {
        let requests = self.server.received_requests().await.ok_or_else(|| {
            E2eError::Mock(format!(
                "request recording is disabled on {}; cannot count requests",
                self.server.uri()
            ))
        })?;
        Ok(requests.iter().filter(|r| r.url.path() == url_path).count())
    }

    /// Wait until at least `count` requests have hit `url_path`
    pub async fn wait_for_requests(
        &self,
        url_path: &str,
        count: usize,
        config: PollConfig,
    ) -> E2eResult<usize> {
        let seen = Poller::new(config)
            .describe(format!("{} request(s) to {}", count, url_path))
            .run(|| async {
                let seen = self.received(url_path).await?;
                let ready = (seen >= count).then_some(seen);
                Ok::<_, E2eError>(Readiness::from(ready))
            })
            .await?;
        Ok(seen)
    }

    pub async fn reset(&self) {
        self.server.reset().await;
    }
}
