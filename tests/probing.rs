use proxy_sieve::proxy::checker::verdict;
use proxy_sieve::{
    lookup_own_address, FailureKind, NativeProber, ProbeError, Prober, Proxy, ProxyType,
};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Target the probe asks for; the mock proxy answers without resolving it
const TEST_URL: &str = "http://ip-echo.invalid/";

fn proxy_for(server: &MockServer) -> Proxy {
    let addr = server.address();
    Proxy::new(addr.ip().to_string(), addr.port(), ProxyType::Http)
}

#[tokio::test]
async fn test_lookup_own_address() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7\n"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let address = lookup_own_address(&client, &server.uri()).await.unwrap();
    assert_eq!(address, "203.0.113.7");
}

#[tokio::test]
async fn test_lookup_own_address_rejects_garbage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    assert!(lookup_own_address(&client, &server.uri()).await.is_err());
}

#[tokio::test]
async fn test_lookup_own_address_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    assert!(lookup_own_address(&client, &server.uri()).await.is_err());
}

#[tokio::test]
async fn test_native_probe_through_forwarding_proxy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("198.51.100.4"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = proxy_for(&server);
    let body = NativeProber::default()
        .probe(&proxy, TEST_URL, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(body, "198.51.100.4");

    let result = verdict(&proxy, Ok(body), "203.0.113.7");
    assert!(result.is_working());
}

#[tokio::test]
async fn test_native_probe_proxy_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let proxy = proxy_for(&server);
    let err = NativeProber::default()
        .probe(&proxy, TEST_URL, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err, ProbeError::Failed("received HTTP code 502".to_string()));
    assert_eq!(err.failure_kind(), FailureKind::ProxyError);
}
