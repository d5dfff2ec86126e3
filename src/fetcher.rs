//! Upstream fetcher: cookie-aware requests with manual redirect handling

use crate::error::{RelayError, Result};
use crate::session::{Origin, SessionStore};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION};
use reqwest::{redirect, Client, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Identity presented to every upstream site.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/116.0";

/// Configuration for the fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Connection timeout (default: 10 seconds)
    pub connect_timeout: Duration,
    /// Request timeout, per hop (default: 30 seconds)
    pub request_timeout: Duration,
    /// Value of the User-Agent header
    pub user_agent: String,
    /// Maximum number of redirects followed per fetch (default: 10)
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 10,
        }
    }
}

/// An outgoing upstream request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<String>,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// POST an already form-encoded body.
    pub fn post_form(url: Url, body: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        Self {
            method: Method::POST,
            url,
            body: Some(body),
            headers,
        }
    }
}

/// What came back from upstream, after redirects.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Address of the last hop.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Issues upstream requests on behalf of the relay
pub struct Fetcher {
    client: Client,
    config: FetcherConfig,
    session: Arc<SessionStore>,
}

impl Fetcher {
    /// Create a fetcher with default configuration
    pub fn new(session: Arc<SessionStore>) -> Result<Self> {
        Self::with_config(FetcherConfig::default(), session)
    }

    /// Create a fetcher with custom configuration
    pub fn with_config(config: FetcherConfig, session: Arc<SessionStore>) -> Result<Self> {
        // Redirects are followed by hand so every hop's cookies get recorded.
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| RelayError::FetchError {
                url: "client_init".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            config,
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// GET a URL
    pub async fn get(&self, url: &Url) -> Result<FetchResponse> {
        self.fetch(FetchRequest::get(url.clone())).await
    }

    /// Perform a request, following redirects and recording cookies on every hop.
    ///
    /// HTTP error statuses are not errors here; only transport failures are.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let FetchRequest {
            mut method,
            mut url,
            mut body,
            mut headers,
        } = request;
        let start = url.to_string();
        let mut redirects = 0;

        info!("Fetching {} {}", method, url);

        loop {
            let response = self.send_once(&method, &url, body.clone(), &headers).await?;
            let status = response.status();

            let origin = Origin::of(&url);
            let stored = self.session.record(&origin, response.headers());
            if stored > 0 {
                debug!("Recorded {} cookies from {}", stored, origin);
            }

            let next = if is_followed_redirect(status) {
                response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|location| url.join(location).ok())
            } else {
                None
            };

            let Some(next) = next else {
                let response_headers = response.headers().clone();
                let bytes = response.bytes().await.map_err(|e| RelayError::FetchError {
                    url: url.to_string(),
                    source: e,
                })?;
                debug!("Fetched {} bytes from {} ({})", bytes.len(), url, status);
                return Ok(FetchResponse {
                    url,
                    status,
                    headers: response_headers,
                    body: bytes.to_vec(),
                });
            };

            if redirects >= self.config.max_redirects {
                warn!("Giving up on {} after {} redirects", start, redirects);
                return Err(RelayError::TooManyRedirects {
                    url: start,
                    hops: redirects,
                });
            }
            redirects += 1;

            // 301/302/303 turn the request into a body-less GET; 307/308 replay it.
            if matches!(status.as_u16(), 301..=303) && method != Method::GET && method != Method::HEAD {
                method = Method::GET;
                body = None;
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }

            debug!("Following {} redirect from {} to {}", status.as_u16(), url, next);
            url = next;
        }
    }

    /// Single request without redirect handling
    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<String>,
        headers: &HeaderMap,
    ) -> Result<reqwest::Response> {
        let mut headers = headers.clone();

        if let Some(jar) = self.session.cookie_header(&Origin::of(url)) {
            let merged = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{existing}; {jar}"),
                None => jar,
            };
            match HeaderValue::from_str(&merged) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(_) => warn!("Session cookies for {} are not a valid header value", url),
            }
        }

        let mut builder = self.client.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        builder.send().await.map_err(|e| RelayError::FetchError {
            url: url.to_string(),
            source: e,
        })
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}
