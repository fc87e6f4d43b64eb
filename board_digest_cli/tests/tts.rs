use board_digest_cli::config::RetryPolicy;
use board_digest_cli::convert::{self, ArtifactPlan, ChunkSink, SinkError};
use board_digest_cli::sinks::GoogleTtsSink;
use board_digest_cli::TextChunk;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const TTS_PATH: &str = "/translate_tts";

fn sink(server: &MockServer) -> GoogleTtsSink {
    GoogleTtsSink::new(Duration::from_secs(5))
        .unwrap()
        .with_endpoint(format!("{}{TTS_PATH}", server.uri()))
}

fn query(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Answers each segment with `seg{idx};` so the output order is visible.
fn echo_index(request: &Request) -> ResponseTemplate {
    let idx = query(request, "idx").unwrap_or_default();
    ResponseTemplate::new(200).set_body_bytes(format!("seg{idx};").into_bytes())
}

/// `n` sentences of 95 chars; no two fit in one request.
fn sentences(n: usize) -> String {
    (0..n).map(|_| "あ".repeat(94) + "。").collect()
}

#[tokio::test]
async fn segments_are_requested_in_order_and_joined() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TTS_PATH))
        .and(query_param("tl", "ja"))
        .and(query_param("client", "tw-ob"))
        .respond_with(echo_index)
        .expect(3)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.mp3");
    let text = "あ".repeat(90) + "。" + &"い".repeat(90) + "。" + &"う".repeat(30) + "。";

    sink(&server).convert(&text, "ja", &output).await.unwrap();

    assert_eq!(std::fs::read_to_string(&output).unwrap(), "seg0;seg1;seg2;");
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| query(r, "q").is_some_and(|q| q.chars().count() <= 100)));
    assert_eq!(query(&requests[2], "q").unwrap(), "う".repeat(30) + "。");
    assert_eq!(query(&requests[2], "total").unwrap(), "3");
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TTS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let err = sink(&server)
        .convert("こんにちは。", "ja", &dir.path().join("out.mp3"))
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::RateLimited(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn other_error_statuses_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TTS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.mp3");

    let err = sink(&server).convert("こんにちは。", "ja", &output).await.unwrap_err();

    assert!(matches!(err, SinkError::Failed(_)));
    assert!(!err.is_transient());
    assert!(!output.exists());
}

#[tokio::test]
async fn blank_text_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(echo_index)
        .expect(0)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let err = sink(&server)
        .convert(" \n ", "ja", &dir.path().join("out.mp3"))
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::EmptyText));
}

#[tokio::test]
async fn slow_but_steady_chunk_is_not_treated_as_hung() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TTS_PATH))
        .respond_with(move |request: &Request| echo_index(request).set_delay(Duration::from_millis(150)))
        .expect(10)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let plan = ArtifactPlan {
        base_path: dir.path().join("digest.mp3"),
        language: "ja".to_string(),
        max_bytes: 1024,
    };
    let policy = RetryPolicy {
        max_retries: 2,
        delay: Duration::ZERO,
        call_timeout: Duration::from_secs(1),
    };
    let sink = GoogleTtsSink::new(policy.call_timeout)
        .unwrap()
        .with_endpoint(format!("{}{TTS_PATH}", server.uri()));

    let chunks = [TextChunk::new(1, sentences(10))];
    let report = convert::convert(&chunks, &sink, &plan, &policy).await;

    assert!(report.all_succeeded);
    assert_eq!(report.per_chunk[0].attempts, 1);
}

#[tokio::test]
async fn retry_resumes_after_last_finished_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TTS_PATH))
        .and(query_param("idx", "3"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TTS_PATH))
        .respond_with(echo_index)
        .expect(10)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let plan = ArtifactPlan {
        base_path: dir.path().join("digest.mp3"),
        language: "ja".to_string(),
        max_bytes: 1024,
    };
    let policy = RetryPolicy {
        max_retries: 2,
        delay: Duration::ZERO,
        call_timeout: Duration::from_secs(5),
    };

    let chunks = [TextChunk::new(1, sentences(10))];
    let report = convert::convert(&chunks, &sink(&server), &plan, &policy).await;

    assert!(report.all_succeeded);
    assert_eq!(report.per_chunk[0].attempts, 2);
    let audio = std::fs::read_to_string(&report.per_chunk[0].path).unwrap();
    let expected: String = (0..10).map(|i| format!("seg{i};")).collect();
    assert_eq!(audio, expected);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 11);
    assert_eq!(
        requests.iter().filter(|r| query(r, "idx").as_deref() == Some("0")).count(),
        1
    );
}
