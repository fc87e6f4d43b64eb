use board_digest_cli::transport::{DiscordTransport, LineNotifyTransport, Transport};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MESSAGES_PATH: &str = "/api/v10/channels/123/messages";

fn discord(server: &MockServer) -> DiscordTransport {
    DiscordTransport::new("secret", "123")
        .unwrap()
        .with_api_base(format!("{}/api/v10", server.uri()))
}

#[tokio::test]
async fn discord_message_uses_bot_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .and(header("Authorization", "Bot secret"))
        .and(body_string_contains("hello"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(discord(&server).send_message("hello").await);
}

#[tokio::test]
async fn discord_retries_once_after_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 0.01, "global": false })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert!(discord(&server).send_message("hi").await);
}

#[tokio::test]
async fn discord_gives_up_after_second_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 0.0 })))
        .expect(2)
        .mount(&server)
        .await;

    assert!(!discord(&server).send_message("hi").await);
}

#[tokio::test]
async fn discord_rejection_is_reported_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Missing Access"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(!discord(&server).send_message("hi").await);
}

#[tokio::test]
async fn discord_uploads_file_as_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .and(body_string_contains("payload_json"))
        .and(body_string_contains("digest_1.txt"))
        .and(body_string_contains("本文です"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("digest_1.txt");
    std::fs::write(&file, "本文です").unwrap();

    assert!(discord(&server).send_file(&file, "caption").await);
}

#[tokio::test]
async fn missing_file_is_a_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    assert!(!discord(&server).send_file(&dir.path().join("nope.mp3"), "c").await);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn line_notify_posts_form_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/notify"))
        .and(header("Authorization", "Bearer line-token"))
        .and(body_string_contains("message="))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let line = LineNotifyTransport::new("line-token")
        .unwrap()
        .with_endpoint(format!("{}/api/notify", server.uri()));
    assert!(line.send_message("こんにちは").await);
}

#[tokio::test]
async fn line_notify_cannot_attach_files() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a.mp3");
    std::fs::write(&file, b"ID3").unwrap();
    let line = LineNotifyTransport::new("t")
        .unwrap()
        .with_endpoint(format!("{}/api/notify", server.uri()));

    assert!(!line.send_file(&file, "caption").await);
}
