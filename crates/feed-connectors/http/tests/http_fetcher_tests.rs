//! HTTP fetcher behaviour against a mock server

use feed_core::{
    AuthConfig, FetchErrorKind, Fetcher, HttpMethod, PageToken, Pagination, RequestSpec,
    RequestTemplate, ResolvedRequest, RetryPolicy, Variables,
};
use feed_http_connector::{HttpFetcher, HttpSettings};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        multiplier: 2.0,
        jitter: 0.5,
        seed: Some(7),
    }
}

fn fetcher(policy: RetryPolicy) -> HttpFetcher {
    HttpFetcher::with_settings(&HttpSettings::default(), policy).unwrap()
}

fn get(url: String) -> ResolvedRequest {
    ResolvedRequest {
        method: HttpMethod::Get,
        url,
        headers: Vec::new(),
        query: Vec::new(),
        body: None,
        basic_auth: None,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_retries_transient_status_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2]})))
        .mount(&server)
        .await;

    let result = fetcher(fast_policy(5))
        .fetch(&get(format!("{}/feed", server.uri())))
        .await
        .unwrap();

    assert_eq!(result.status, 200);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.retries(), 1);
    let body: serde_json::Value = serde_json::from_slice(&result.body).unwrap();
    assert_eq!(body["items"], json!([1, 2]));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such feed"))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(fast_policy(5))
        .fetch(&get(format!("{}/missing", server.uri())))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::NonRetriable);
    assert_eq!(err.status, Some(404));
    assert_eq!(err.attempts, 1);
    assert!(err.message.contains("no such feed"));
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = fetcher(fast_policy(3))
        .fetch(&get(format!("{}/flaky", server.uri())))
        .await
        .unwrap_err();

    assert!(err.is_retriable());
    assert_eq!(err.status, Some(500));
    assert_eq!(err.attempts, 3);
}

#[tokio::test]
async fn test_retry_after_overrides_backoff() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    // the computed backoff alone would wait ten seconds
    let policy = RetryPolicy {
        initial_delay_ms: 10_000,
        max_delay_ms: 10_000,
        jitter: 0.0,
        ..RetryPolicy::default()
    };
    let started = Instant::now();
    let result = fetcher(policy)
        .fetch(&get(format!("{}/limited", server.uri())))
        .await
        .unwrap();

    assert_eq!(result.attempts, 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_attempt_timeout_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut request = get(format!("{}/slow", server.uri()));
    request.timeout = Duration::from_millis(50);
    let err = fetcher(fast_policy(2)).fetch(&request).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Retriable);
    assert_eq!(err.status, None);
    assert_eq!(err.attempts, 2);
}

#[tokio::test]
async fn test_refused_connection_is_retried_until_exhausted() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = fetcher(fast_policy(3))
        .fetch(&get(format!("http://127.0.0.1:{}/feed", port)))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Retriable);
    assert_eq!(err.status, None);
    assert_eq!(err.attempts, 3);
}

#[tokio::test]
async fn test_malformed_url_fails_without_retrying() {
    let err = fetcher(fast_policy(3))
        .fetch(&get("not a url".to_string()))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::NonRetriable);
    assert_eq!(err.attempts, 1);
}

#[tokio::test]
async fn test_seeded_policy_repeats_the_same_outcome() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let url = format!("{}/down", server.uri());
    let first = fetcher(fast_policy(3)).fetch(&get(url.clone())).await.unwrap_err();
    let second = fetcher(fast_policy(3)).fetch(&get(url)).await.unwrap_err();
    assert_eq!(first, second);

    let mut a = fast_policy(3).backoff();
    let mut b = fast_policy(3).backoff();
    for _ in 0..3 {
        assert_eq!(a.next_delay(), b.next_delay());
    }
}

#[tokio::test]
async fn test_rendered_request_carries_auth_and_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search/mls-9"))
        .and(header("authorization", "Bearer s3cret"))
        .and(header("x-feed", "listings"))
        .and(query_param("offset", "40"))
        .and(query_param("limit", "20"))
        .and(body_json(json!({"modified_since": "2021-02-03"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let spec = RequestSpec {
        method: HttpMethod::Post,
        url: format!("{}/search/{{{{ provider_id }}}}", server.uri()),
        headers: BTreeMap::from([("X-Feed".to_string(), "listings".to_string())]),
        params: BTreeMap::new(),
        body: Some(json!({"modified_since": "{{ since_date }}"})),
        timeout_seconds: 5.0,
    };
    let template = RequestTemplate::new(
        spec,
        AuthConfig::Bearer {
            token: "s3cret".to_string(),
        },
        Pagination::Offset {
            param: "offset".to_string(),
            limit_param: Some("limit".to_string()),
            page_size: 20,
            start: 0,
        },
    );
    let since = chrono::DateTime::parse_from_rfc3339("2021-02-03T04:05:06Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let request = template
        .render(&Variables::for_run("mls-9", since), Some(&PageToken::Offset(40)))
        .unwrap();

    let result = fetcher(fast_policy(1)).fetch(&request).await.unwrap();
    assert_eq!(result.attempts, 1);
}
