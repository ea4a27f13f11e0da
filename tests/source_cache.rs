use proxy_sieve::{CrawlerConfig, FetchOutcome, ProxyCrawler, ProxySource, ProxyType};
use std::time::{Duration, SystemTime};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = "# free proxies\n1.1.1.1:8080\n\nsocks5://2.2.2.2:1080\nnot-a-proxy\n1.1.1.1:8080/\n";

fn crawler(dir: &std::path::Path) -> ProxyCrawler {
    let config = CrawlerConfig::new()
        .with_cache_dir(dir)
        .with_timeout(Duration::from_secs(5));
    ProxyCrawler::with_config(config).unwrap()
}

#[tokio::test]
async fn test_fresh_cache_skips_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/http.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let crawler = crawler(dir.path());
    let url = format!("{}/http.txt", server.uri());

    let first = crawler.fetch(&url).await;
    assert!(matches!(first, FetchOutcome::Fresh(_)));
    let second = crawler.fetch(&url).await;
    assert_eq!(first, second);
    assert_eq!(
        std::fs::read_to_string(crawler.cache_path(&url)).unwrap(),
        FEED
    );
}

#[tokio::test]
async fn test_stale_copy_used_when_download_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/http.txt"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let crawler = crawler(dir.path());
    let url = format!("{}/http.txt", server.uri());

    let cached = crawler.cache_path(&url);
    std::fs::write(&cached, FEED).unwrap();
    std::fs::File::options()
        .write(true)
        .open(&cached)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(7 * 3600))
        .unwrap();

    let result = crawler
        .crawl_source(&ProxySource::new(&url, ProxyType::Http))
        .await;
    assert!(result.is_success());
    assert!(result.degraded);
    assert_eq!(result.proxies.len(), 3);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].line_number, 5);
    assert_eq!(result.proxies[1].canonical(), "socks5://2.2.2.2:1080");
    assert!(result.proxies.iter().all(|p| p.source == url));
}

#[tokio::test]
async fn test_unavailable_source_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let crawler = crawler(dir.path());
    let url = format!("{}/gone.txt", server.uri());

    assert_eq!(crawler.fetch(&url).await, FetchOutcome::Unavailable);
    let result = crawler
        .crawl_source(&ProxySource::new(&url, ProxyType::Socks4))
        .await;
    assert!(!result.is_success());
    assert!(result.proxies.is_empty());
}

#[tokio::test]
async fn test_csv_feed_skips_header_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("dest_ip,dest_port\n9.9.9.9,3128\n\"8.8.8.8\",\"80\"\n7.7.7.7\n"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let crawler = crawler(dir.path());
    let url = format!("{}/list.csv", server.uri());

    let result = crawler
        .crawl_source(&ProxySource::new(&url, ProxyType::Http))
        .await;
    let canonical: Vec<_> = result.proxies.iter().map(|p| p.canonical()).collect();
    assert_eq!(canonical, vec!["http://9.9.9.9:3128", "http://8.8.8.8:80"]);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.diagnostics.len(), 1);
}
