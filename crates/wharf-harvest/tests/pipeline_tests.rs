//! End-to-end tests for the harvest pipeline
//!
//! These tests exercise the full flow against a mock archive service:
//! - enumeration and catalog idempotency
//! - fetch, resume after failure, and dual-source completion recovery
//! - both segment failure policies
//! - payload fetching with length verification
//! - the final merge

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;
use wharf_common::checksum::sha256_hex;
use wharf_harvest::catalog::{self, Task};
use wharf_harvest::config::{HarvestConfig, HarvestPaths, SegmentPolicy};
use wharf_harvest::merge;
use wharf_harvest::pool::HarvestContext;
use wharf_harvest::runner::run_harvest;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> HarvestConfig {
    HarvestConfig {
        index_url: server.uri(),
        data_url: server.uri(),
        site_filter: "example.com/*".to_string(),
        concurrency: 2,
        max_attempts: 2,
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(40),
        request_timeout: Duration::from_secs(5),
        polite_delay: None,
        ..HarvestConfig::default()
    }
}

fn record_line(url: &str, status: &str, mime: &str, length: u64, timestamp: &str) -> String {
    format!(
        r#"{{"url":"{url}","status":"{status}","mime-detected":"{mime}","length":"{length}","timestamp":"{timestamp}","filename":"warc/{}.warc.gz","offset":"0"}}"#,
        sha256_hex(url.as_bytes())
    )
}

async fn mount_probe(server: &MockServer, segment: &str, pages: u32) {
    Mock::given(method("GET"))
        .and(path(format!("/{segment}-index")))
        .and(query_param("showNumPages", "true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!("{{\"pages\": {pages}}}\n")),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, segment: &str, page: u32, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/{segment}-index")))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(server)
        .await;
}

fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn test_full_pipeline_enumerate_fetch_merge() {
    let server = MockServer::start().await;
    mount_probe(&server, "SEG-A", 2).await;
    mount_probe(&server, "SEG-B", 1).await;
    mount_page(
        &server,
        "SEG-A",
        0,
        format!(
            "{}\n{}\n",
            record_line("https://example.com/world", "200", "text/html", 500, "20250101000000"),
            record_line("https://example.com/sport", "200", "text/html", 300, "20250101000000"),
        ),
    )
    .await;
    mount_page(
        &server,
        "SEG-A",
        1,
        format!(
            "{}\n",
            record_line("https://example.com/world", "200", "text/html", 900, "20200101000000"),
        ),
    )
    .await;
    mount_page(
        &server,
        "SEG-B",
        0,
        format!(
            "{}\n{}\n",
            record_line("https://www.example.com/world/", "404", "text/html", 9999, "20260101000000"),
            record_line("https://example.com/culture", "200", "text/html", 100, "20240101000000"),
        ),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let paths = HarvestPaths::new(dir.path());
    let ctx = Arc::new(HarvestContext::new(test_config(&server)).unwrap());

    let segments = vec!["SEG-A".to_string(), "SEG-B".to_string()];
    let enumerated = catalog::enumerate_index_tasks(&ctx.client, &segments, &paths.catalog_file())
        .await
        .unwrap();
    assert_eq!(enumerated.generated, 3);

    let tasks = catalog::load_tasks(&paths.catalog_file()).unwrap();
    let (_stop_tx, stop_rx) = stop_channel();
    let summary = run_harvest(Arc::clone(&ctx), &paths, tasks.clone(), stop_rx)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);

    // A second run does no network work at all: every task is already in
    // the ledger (the page mocks expect exactly one request each).
    let (_stop_tx, stop_rx) = stop_channel();
    let again = run_harvest(Arc::clone(&ctx), &paths, tasks, stop_rx)
        .await
        .unwrap();
    assert_eq!(again.skipped, 3);
    assert_eq!(again.succeeded, 0);

    // Merge: all spellings of /world collapse to one entity, the larger
    // successful capture wins despite its older timestamp.
    let merged = merge::merge_containers(&paths.containers_dir()).unwrap();
    assert_eq!(merged.len(), 3);
    let world = merged.get("example.com/world").expect("world entity");
    assert_eq!(world.status, "200");
    assert_eq!(world.length, 900);

    let written = merge::write_merged(&merged, &paths.merged_file()).unwrap();
    assert_eq!(written, 3);
}

#[tokio::test]
async fn test_resume_retries_only_incomplete_tasks() {
    let server = MockServer::start().await;
    mount_probe(&server, "SEG-C", 2).await;
    mount_page(
        &server,
        "SEG-C",
        0,
        format!(
            "{}\n",
            record_line("https://example.com/alpha", "200", "text/html", 10, "20240101000000"),
        ),
    )
    .await;
    // Page 1 is down for the whole first run; two attempts, then give up.
    Mock::given(method("GET"))
        .and(path("/SEG-C-index"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let paths = HarvestPaths::new(dir.path());
    let ctx = Arc::new(HarvestContext::new(test_config(&server)).unwrap());

    let segments = vec!["SEG-C".to_string()];
    catalog::enumerate_index_tasks(&ctx.client, &segments, &paths.catalog_file())
        .await
        .unwrap();
    let tasks = catalog::load_tasks(&paths.catalog_file()).unwrap();

    let (_stop_tx, stop_rx) = stop_channel();
    let first = run_harvest(Arc::clone(&ctx), &paths, tasks.clone(), stop_rx)
        .await
        .unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(first.failed, 1);
    assert!(paths.failures_file().exists());

    // The service recovers; only the incomplete page is fetched again.
    server.reset().await;
    mount_page(
        &server,
        "SEG-C",
        1,
        format!(
            "{}\n",
            record_line("https://example.com/beta", "200", "text/html", 20, "20240101000000"),
        ),
    )
    .await;

    let (_stop_tx, stop_rx) = stop_channel();
    let second = run_harvest(Arc::clone(&ctx), &paths, tasks, stop_rx)
        .await
        .unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(second.succeeded, 1);
    assert_eq!(second.failed, 0);

    // Both pages' records appear exactly once in the merged output.
    let merged = merge::merge_containers(&paths.containers_dir()).unwrap();
    assert_eq!(merged.len(), 2);
    assert!(merged.contains_key("example.com/alpha"));
    assert!(merged.contains_key("example.com/beta"));
}

#[tokio::test]
async fn test_completion_survives_a_lost_ledger() {
    let server = MockServer::start().await;
    mount_probe(&server, "SEG-D", 1).await;
    mount_page(
        &server,
        "SEG-D",
        0,
        format!(
            "{}\n",
            record_line("https://example.com/only", "200", "text/html", 10, "20240101000000"),
        ),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let paths = HarvestPaths::new(dir.path());
    let ctx = Arc::new(HarvestContext::new(test_config(&server)).unwrap());

    let segments = vec!["SEG-D".to_string()];
    catalog::enumerate_index_tasks(&ctx.client, &segments, &paths.catalog_file())
        .await
        .unwrap();
    let tasks = catalog::load_tasks(&paths.catalog_file()).unwrap();

    let (_stop_tx, stop_rx) = stop_channel();
    let first = run_harvest(Arc::clone(&ctx), &paths, tasks.clone(), stop_rx)
        .await
        .unwrap();
    assert_eq!(first.succeeded, 1);

    // Simulate the log lagging the output store across an unclean
    // shutdown: the ledger file is gone, the containers are not.
    std::fs::remove_file(paths.ledger_file()).unwrap();

    let (_stop_tx, stop_rx) = stop_channel();
    let second = run_harvest(Arc::clone(&ctx), &paths, tasks, stop_rx)
        .await
        .unwrap();
    // Completion is recovered from the containers; the page mock expects
    // exactly one request across both runs.
    assert_eq!(second.skipped, 1);
    assert_eq!(second.succeeded, 0);
}

#[tokio::test]
async fn test_segment_policies() {
    async fn mount_flaky_segment(server: &MockServer) {
        mount_probe(server, "SEG-F", 3).await;
        Mock::given(method("GET"))
            .and(path("/SEG-F-index"))
            .and(query_param("page", "0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
        for page in [1u32, 2] {
            Mock::given(method("GET"))
                .and(path("/SEG-F-index"))
                .and(query_param("page", page.to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                    "{}\n",
                    record_line(
                        &format!("https://example.com/page{page}"),
                        "200",
                        "text/html",
                        10,
                        "20240101000000"
                    ),
                )))
                .mount(server)
                .await;
        }
    }

    // Fail-fast: the fatal first page cancels the segment's remaining
    // pages. One worker keeps the ordering deterministic.
    {
        let server = MockServer::start().await;
        mount_flaky_segment(&server).await;
        let mut config = test_config(&server);
        config.concurrency = 1;
        config.segment_policy = SegmentPolicy::FailFast;

        let dir = TempDir::new().unwrap();
        let paths = HarvestPaths::new(dir.path());
        let ctx = Arc::new(HarvestContext::new(config).unwrap());
        let segments = vec!["SEG-F".to_string()];
        catalog::enumerate_index_tasks(&ctx.client, &segments, &paths.catalog_file())
            .await
            .unwrap();
        let tasks = catalog::load_tasks(&paths.catalog_file()).unwrap();

        let (_stop_tx, stop_rx) = stop_channel();
        let summary = run_harvest(ctx, &paths, tasks, stop_rx).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.aborted, 2);
        assert_eq!(summary.succeeded, 0);
    }

    // Partial: the same segment keeps its healthy pages.
    {
        let server = MockServer::start().await;
        mount_flaky_segment(&server).await;
        let mut config = test_config(&server);
        config.concurrency = 1;
        config.segment_policy = SegmentPolicy::Partial;

        let dir = TempDir::new().unwrap();
        let paths = HarvestPaths::new(dir.path());
        let ctx = Arc::new(HarvestContext::new(config).unwrap());
        let segments = vec!["SEG-F".to_string()];
        catalog::enumerate_index_tasks(&ctx.client, &segments, &paths.catalog_file())
            .await
            .unwrap();
        let tasks = catalog::load_tasks(&paths.catalog_file()).unwrap();

        let (_stop_tx, stop_rx) = stop_channel();
        let summary = run_harvest(ctx, &paths, tasks, stop_rx).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.aborted, 0);
        assert_eq!(summary.succeeded, 2);
    }
}

#[tokio::test]
async fn test_payload_fetch_stores_verified_ranges() {
    let server = MockServer::start().await;
    let body_a = vec![b'a'; 24];
    let body_b = vec![b'b'; 16];
    Mock::given(method("GET"))
        .and(path("/warc/file-a.warc.gz"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body_a.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/warc/file-b.warc.gz"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body_b.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let paths = HarvestPaths::new(dir.path());
    std::fs::create_dir_all(paths.root()).unwrap();
    std::fs::write(
        paths.merged_file(),
        concat!(
            r#"{"url":"https://example.com/a","status":"200","length":"24","offset":"100","filename":"warc/file-a.warc.gz","timestamp":"2024"}"#, "\n",
            r#"{"url":"https://example.com/b","status":"200","length":"16","offset":"0","filename":"warc/file-b.warc.gz","timestamp":"2024"}"#, "\n",
            r#"{"url":"https://example.com/skip","status":"404","length":"10","offset":"0","filename":"warc/file-c.warc.gz","timestamp":"2024"}"#, "\n",
        ),
    )
    .unwrap();

    let tasks = catalog::range_tasks_from_index(&paths.merged_file()).unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| matches!(t, Task::Range { .. })));

    let ctx = Arc::new(HarvestContext::new(test_config(&server)).unwrap());
    let (_stop_tx, stop_rx) = stop_channel();
    let summary = run_harvest(Arc::clone(&ctx), &paths, tasks.clone(), stop_rx)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);

    let key_a = sha256_hex(b"https://example.com/a");
    let stored = paths
        .payloads_dir()
        .join("batch_0000")
        .join(format!("{key_a}.warc.gz"));
    assert!(stored.exists());
    assert_eq!(std::fs::read(&stored).unwrap(), body_a);

    // Resuming skips everything; the range mocks expect one request each.
    let (_stop_tx, stop_rx) = stop_channel();
    let again = run_harvest(ctx, &paths, tasks, stop_rx).await.unwrap();
    assert_eq!(again.skipped, 2);
    assert_eq!(again.succeeded, 0);
}
