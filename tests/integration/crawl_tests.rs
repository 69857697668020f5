//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use ripple_scraper::config::{load_config, parse_config, Config};
use ripple_scraper::crawler::{crawl, Coordinator, CrawlSetup, HttpFetcher};
use ripple_scraper::host::page_fn;
use ripple_scraper::storage::{
    Frontier, MemoryDataset, MemoryFrontier, RequestStatus, SqliteStorage,
};
use ripple_scraper::{ConfigError, ScraperError};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TITLE_PROGRAM: &str = r#"
[page-function]
source = '''
[fields]
title = "title"
'''
"#;

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

fn titled(title: &str, links: &str) -> ResponseTemplate {
    html(&format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, links
    ))
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate, calls: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

/// Writes a config with a database in `dir` and parses it
fn create_test_config(dir: &TempDir, base_url: &str, crawler_extra: &str, rest: &str) -> Config {
    let db_path = dir.path().join("crawl.db");
    let content = format!(
        r#"
[crawler]
start-urls = ["{base}/"]
link-selector = "a[href]"
use-request-queue = true
{crawler_extra}

[[pseudo-urls]]
purl = "{base}/docs/*"

[output]
database-path = "{db}"

{rest}
"#,
        base = base_url,
        crawler_extra = crawler_extra,
        db = db_path.display(),
        rest = rest,
    );
    parse_config(&content, dir.path()).expect("Failed to parse test config")
}

fn open_db(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(&dir.path().join("crawl.db")).expect("Failed to open crawl database")
}

fn titles(storage: &SqliteStorage) -> Vec<String> {
    let mut titles: Vec<String> = storage
        .records()
        .unwrap()
        .iter()
        .filter_map(|record| record.get("title").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    titles.sort();
    titles
}

#[tokio::test]
async fn test_crawl_follows_matching_links() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(
        &server,
        "/",
        titled(
            "Home",
            r#"<a href="/docs/a">A</a><a href="docs/b">B</a><a href="/blog/x">not followed</a>"#,
        ),
        1,
    )
    .await;
    mount(&server, "/docs/a", titled("A", r#"<a href="/docs/b">B</a><a href="/">home</a>"#), 1).await;
    mount(&server, "/docs/b", titled("B", ""), 1).await;
    mount(&server, "/blog/x", titled("X", ""), 0).await;

    let config = create_test_config(&dir, &server.uri(), "", TITLE_PROGRAM);
    let stats = crawl(config, true).await.expect("Crawl failed");

    assert_eq!(stats.pages_handled, 3);
    assert_eq!(stats.records_emitted, 3);
    assert_eq!(stats.pages_failed, 0);

    let storage = open_db(&dir);
    assert_eq!(titles(&storage), vec!["A", "B", "Home"]);
    assert_eq!(storage.pending_count().await.unwrap(), 0);
    assert_eq!(
        storage.count_requests_by_status().unwrap().get(&RequestStatus::Handled),
        Some(&3)
    );

    for record in storage.records().unwrap() {
        assert_eq!(record["#error"], json!(false));
        assert!(record["#debug"]["requestId"].is_string());
        assert!(!record.contains_key("lineage"));
    }
}

#[tokio::test]
async fn test_lineage_is_persisted() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(&server, "/", titled("Home", r#"<a href="/docs/a">A</a>"#), 1).await;
    mount(&server, "/docs/a", titled("A", ""), 1).await;

    let config = create_test_config(&dir, &server.uri(), "", TITLE_PROGRAM);
    crawl(config, true).await.expect("Crawl failed");

    let storage = open_db(&dir);
    let records = storage.records().unwrap();
    let id_of = |title: &str| {
        records
            .iter()
            .find(|record| record["title"] == json!(title))
            .and_then(|record| record["#debug"]["requestId"].as_str())
            .unwrap()
            .to_string()
    };
    let root_id = id_of("Home");
    let child_id = id_of("A");

    let root = storage.get_request(&root_id).unwrap().unwrap();
    let child = storage.get_request(&child_id).unwrap().unwrap();
    assert_eq!(root.lineage.depth, 0);
    assert!(root.lineage.child_ids.contains(&child_id));
    assert_eq!(child.lineage.depth, 1);
    assert_eq!(child.lineage.parent_id.as_deref(), Some(root_id.as_str()));
}

#[tokio::test]
async fn test_max_crawling_depth() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(&server, "/", titled("Home", r#"<a href="/docs/1">1</a>"#), 1).await;
    mount(&server, "/docs/1", titled("1", r#"<a href="/docs/2">2</a>"#), 1).await;
    mount(&server, "/docs/2", titled("2", ""), 0).await;

    let config = create_test_config(&dir, &server.uri(), "max-crawling-depth = 1", TITLE_PROGRAM);
    let stats = crawl(config, true).await.expect("Crawl failed");

    assert_eq!(stats.pages_handled, 2);
    assert_eq!(titles(&open_db(&dir)), vec!["1", "Home"]);
}

#[tokio::test]
async fn test_failed_request_is_retried_then_recorded() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(&server, "/", titled("Home", r#"<a href="/docs/broken">x</a>"#), 1).await;
    mount(&server, "/docs/broken", ResponseTemplate::new(500), 2).await;

    let config =
        create_test_config(&dir, &server.uri(), "max-request-retries = 1", TITLE_PROGRAM);
    let stats = crawl(config, true).await.expect("Crawl failed");

    assert_eq!(stats.pages_handled, 1);
    assert_eq!(stats.pages_failed, 1);
    assert_eq!(stats.retries, 1);

    let records = open_db(&dir).records().unwrap();
    assert_eq!(records.len(), 2);
    let failed = records
        .iter()
        .find(|record| record["#error"] == json!(true))
        .expect("missing error record");
    assert_eq!(failed["#debug"]["retryCount"], json!(2));
    assert!(failed["#debug"]["errorMessages"][0]
        .as_str()
        .unwrap()
        .contains("500"));
    assert!(!failed.contains_key("title"));
}

#[tokio::test]
async fn test_max_results_stops_crawl() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let links: String = (0..10)
        .map(|i| format!(r#"<a href="/docs/{}">{}</a>"#, i, i))
        .collect();
    mount(&server, "/", titled("Home", &links), 1).await;
    for i in 0..10 {
        Mock::given(method("GET"))
            .and(path(format!("/docs/{}", i)))
            .respond_with(titled(&format!("Doc {}", i), ""))
            .mount(&server)
            .await;
    }

    let config = create_test_config(
        &dir,
        &server.uri(),
        "max-results-per-crawl = 3\nmax-concurrency = 1",
        TITLE_PROGRAM,
    );
    let stats = crawl(config, true).await.expect("Crawl failed");

    assert!(stats.limit_reached);
    let storage = open_db(&dir);
    assert_eq!(storage.records().unwrap().len(), 3);
    assert!(storage.pending_count().await.unwrap() > 0);
}

#[tokio::test]
async fn test_resume_continues_pending_requests() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(
        &server,
        "/",
        titled("Home", r#"<a href="/docs/a">A</a><a href="/docs/b">B</a>"#),
        1,
    )
    .await;
    mount(&server, "/docs/a", titled("A", ""), 1).await;
    mount(&server, "/docs/b", titled("B", ""), 1).await;

    let first = create_test_config(&dir, &server.uri(), "max-pages-per-crawl = 1", TITLE_PROGRAM);
    let stats = crawl(first, true).await.expect("First crawl failed");
    assert_eq!(stats.pages_handled, 1);
    assert_eq!(open_db(&dir).pending_count().await.unwrap(), 2);

    let second = create_test_config(&dir, &server.uri(), "", TITLE_PROGRAM);
    let stats = crawl(second, false).await.expect("Resumed crawl failed");
    assert_eq!(stats.pages_handled, 2);

    assert_eq!(titles(&open_db(&dir)), vec!["A", "B", "Home"]);
}

#[tokio::test]
async fn test_pseudo_url_template_shapes_request() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(&server, "/", titled("Home", r#"<a href="/docs/search">s</a>"#), 1).await;
    Mock::given(method("POST"))
        .and(path("/docs/search"))
        .and(header("x-api-key", "secret"))
        .and(body_string("q=rust"))
        .respond_with(titled("Results", ""))
        .expect(1)
        .mount(&server)
        .await;

    let content = format!(
        r#"
[crawler]
start-urls = ["{base}/"]
link-selector = "a"
use-request-queue = true

[[pseudo-urls]]
purl = "{base}/docs/*"
method = "POST"
payload = "q=rust"
headers = {{ x-api-key = "secret" }}

{program}
"#,
        base = server.uri(),
        program = TITLE_PROGRAM
    );
    let config = parse_config(&content, dir.path()).unwrap();
    let stats = crawl(config, true).await.expect("Crawl failed");

    assert_eq!(stats.pages_handled, 2);
    assert_eq!(stats.pages_failed, 0);
}

#[tokio::test]
async fn test_selector_program_enqueues_pages() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(&server, "/", titled("Page 1", r#"<a class="next" href="/list/2">next</a>"#), 1).await;
    mount(&server, "/list/2", titled("Page 2", r#"<a class="next" href="/list/3">next</a>"#), 1).await;
    mount(&server, "/list/3", titled("Page 3", ""), 1).await;

    std::fs::write(
        dir.path().join("extract.toml"),
        "enqueue = { selector = \"a.next\" }\n\n[fields]\ntitle = \"title\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("crawl.toml"),
        format!(
            r#"
[crawler]
start-urls = ["{}/"]
use-request-queue = true

[page-function]
path = "extract.toml"
"#,
            server.uri()
        ),
    )
    .unwrap();

    let config = load_config(&dir.path().join("crawl.toml")).expect("Failed to load config");
    assert!(config.output.database_path.is_none());

    let stats = crawl(config, true).await.expect("Crawl failed");
    assert_eq!(stats.pages_handled, 3);
    assert_eq!(stats.records_emitted, 3);
}

#[tokio::test]
async fn test_broken_page_function_fails_before_fetching() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount(&server, "/", titled("Home", ""), 0).await;

    let broken = r#"
[page-function]
source = "[fields]\ntitle = \"a[\"\n"
"#;
    let config = create_test_config(&dir, &server.uri(), "", broken);
    let err = crawl(config, true).await.unwrap_err();

    assert!(matches!(
        err,
        ScraperError::Config(ConfigError::PageFunction(_))
    ));
}

#[tokio::test]
async fn test_native_page_function_with_deferred_finish() {
    let server = MockServer::start().await;
    mount(&server, "/", titled("Home", ""), 1).await;

    let content = format!(
        r#"
[crawler]
start-urls = ["{}/"]

[custom-data]
label = "native"
"#,
        server.uri()
    );
    let config = parse_config(&content, Path::new(".")).unwrap();

    let function = page_fn(|context| async move {
        context.will_finish_later();
        let remote = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.finish(None).unwrap();
        });

        let title = context
            .page()
            .select_text(&ripple_scraper::crawler::parse_selector("title")?)
            .into_iter()
            .next();
        Ok(json!({
            "title": title,
            "label": context.custom_data()["label"],
        }))
    });

    let setup = CrawlSetup::with_page_function(config, function).unwrap();
    let fetcher = Arc::new(HttpFetcher::from_config(&setup.config().crawler).unwrap());
    let dataset = Arc::new(MemoryDataset::new());
    let coordinator = Coordinator::new(
        setup,
        Arc::new(MemoryFrontier::new()),
        dataset.clone(),
        fetcher,
    )
    .await
    .unwrap();

    let stats = coordinator.run().await.unwrap();
    assert_eq!(stats.pages_handled, 1);

    let records = dataset.records().unwrap();
    assert_eq!(records[0]["title"], json!("Home"));
    assert_eq!(records[0]["label"], json!("native"));
}
