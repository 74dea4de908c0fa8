use async_trait::async_trait;
use chrono::Utc;
use feed_core::{
    is_retriable_status, parse_retry_after, Error, FetchError, FetchResult, Fetcher, HttpMethod,
    ResolvedRequest, Result, RetryPolicy,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest response excerpt quoted in a fetch error
const ERROR_BODY_EXCERPT: usize = 256;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection-level settings shared by every provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub connect_timeout_seconds: f64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_seconds: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("feedsink/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT.as_secs_f64(),
            pool_max_idle_per_host: 10,
            pool_idle_timeout_seconds: 90,
        }
    }
}

/// Fetches pages over HTTP, retrying transient failures with backoff
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn with_settings(settings: &HttpSettings, policy: RetryPolicy) -> Result<Self> {
        Ok(Self::new(Self::build_client(settings)?, policy))
    }

    /// Builds a pooled client; request timeouts are set per attempt, not here
    pub fn build_client(settings: &HttpSettings) -> Result<Client> {
        Client::builder()
            .use_rustls_tls()
            .user_agent(settings.user_agent.as_str())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout_seconds))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(
                Duration::try_from_secs_f64(settings.connect_timeout_seconds)
                    .ok()
                    .filter(|timeout| !timeout.is_zero())
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            )
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))
    }

    async fn send(&self, request: &ResolvedRequest) -> reqwest::Result<Response> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credentials) = &request.basic_auth {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder.send().await
    }
}

/// Failure of one attempt that may be worth repeating
struct Transient {
    status: Option<u16>,
    message: String,
    retry_after: Option<Duration>,
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ResolvedRequest) -> std::result::Result<FetchResult, FetchError> {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let transient = match self.send(request).await {
                Ok(response) if response.status().is_success() => {
                    let status = response.status().as_u16();
                    let headers = collect_headers(response.headers());
                    match response.bytes().await {
                        Ok(body) => {
                            debug!(
                                "{} {} -> {} ({} bytes, attempt {})",
                                request.method,
                                request.url,
                                status,
                                body.len(),
                                attempt
                            );
                            return Ok(FetchResult {
                                status,
                                headers,
                                body: body.to_vec(),
                                elapsed: started.elapsed(),
                                attempts: attempt,
                            });
                        }
                        // the connection dropped or stalled after the headers arrived
                        Err(e) => Transient {
                            status: Some(status),
                            message: format!("failed to read response body: {}", e),
                            retry_after: None,
                        },
                    }
                }
                Ok(response) if is_retriable_status(response.status().as_u16()) => {
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| parse_retry_after(value, Utc::now()));
                    Transient {
                        status: Some(response.status().as_u16()),
                        message: format!("HTTP {}", response.status()),
                        retry_after,
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(FetchError::non_retriable(
                        Some(status.as_u16()),
                        attempt,
                        format!("HTTP {}: {}", status, excerpt(&body)),
                    ));
                }
                Err(e) if is_transient(&e) => Transient {
                    status: None,
                    message: e.to_string(),
                    retry_after: None,
                },
                Err(e) => {
                    return Err(FetchError::non_retriable(None, attempt, e.to_string()));
                }
            };

            if attempt >= max_attempts {
                return Err(FetchError::retriable(
                    transient.status,
                    attempt,
                    transient.message,
                ));
            }

            let computed = backoff.next_delay();
            let delay = transient
                .retry_after
                .map(|wait| wait.min(self.policy.max_delay()))
                .unwrap_or(computed);
            warn!(
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                url = %request.url,
                "Transient fetch failure: {}, retrying",
                transient.message
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Only connection failures and timeouts are retried
fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    collected
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    if body.len() <= ERROR_BODY_EXCERPT {
        return body;
    }
    let mut end = ERROR_BODY_EXCERPT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let body = "é".repeat(200);
        let cut = excerpt(&body);
        assert!(cut.len() <= ERROR_BODY_EXCERPT);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(excerpt("  short  "), "short");
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("link", "<a>; rel=\"prev\"".parse().unwrap());
        headers.append("link", "<b>; rel=\"next\"".parse().unwrap());
        let collected = collect_headers(&headers);
        assert_eq!(collected["link"], "<a>; rel=\"prev\", <b>; rel=\"next\"");
    }

    #[test]
    fn test_default_settings_build_a_client() {
        let settings = HttpSettings::default();
        assert!(settings.user_agent.starts_with("feedsink/"));
        assert!(HttpFetcher::with_settings(&settings, RetryPolicy::default()).is_ok());
    }

    #[test]
    fn test_infinite_connect_timeout_still_builds_a_client() {
        let settings = HttpSettings {
            connect_timeout_seconds: f64::INFINITY,
            ..HttpSettings::default()
        };
        assert!(HttpFetcher::with_settings(&settings, RetryPolicy::default()).is_ok());
    }
}
