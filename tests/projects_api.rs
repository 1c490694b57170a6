//! Identifier fetcher against a mock API.

use std::path::PathBuf;

use ownermail::client::{ApiClient, ApiError};
use ownermail::config::ApiConfig;
use ownermail::projects;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        endpoint: format!("{}/", server.uri()),
        timeout_secs: 5,
        ..ApiConfig::default()
    }
}

fn projects_page(ids: std::ops::RangeInclusive<u64>, last: bool) -> Value {
    let content: Vec<Value> = ids.map(|id| json!({"id": id, "name": format!("project {}", id)})).collect();
    json!({"content": content, "last": last})
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/uaa/oauth/token"))
        .and(body_string_contains("grant_type=apitoken"))
        .and(body_string_contains("scope=openid"))
        .and(body_string_contains("token=user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "jwt-123", "token_type": "bearer"})))
        .expect(1)
        .mount(server)
        .await;
}

async fn fetch(server: &MockServer, output: PathBuf) -> anyhow::Result<projects::FetchReport> {
    let config = api_config(server);
    tokio::task::spawn_blocking(move || {
        let client = ApiClient::new(&config)?;
        projects::run(&client, "user-token", 200, output)
    })
    .await
    .expect("fetch task panicked")
}

#[tokio::test]
async fn test_two_pages_write_250_ids() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/rs/project"))
        .and(query_param("page", "0"))
        .and(query_param("size", "200"))
        .and(query_param("sort", "id,asc"))
        .and(header("Authorization", "Bearer jwt-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(projects_page(1..=200, false)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rs/project"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(projects_page(201..=250, true)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("project_ids.csv");
    let report = fetch(&server, output.clone()).await.unwrap();

    assert_eq!(report.ids.len(), 250);
    let written = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 250);
    assert_eq!(lines[0], "1");
    assert_eq!(lines[249], "250");
}

#[tokio::test]
async fn test_empty_page_stops_despite_metadata() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/rs/project"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": [], "last": false, "totalPages": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = fetch(&server, dir.path().join("ids.csv")).await.unwrap();
    assert!(report.ids.is_empty());
}

#[tokio::test]
async fn test_bare_list_is_single_page() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/rs/project"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}, {"id": null}, {"id": 3}, {"id": 9}])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = fetch(&server, dir.path().join("ids.csv")).await.unwrap();
    assert_eq!(report.ids, vec!["3", "9"]);
}

#[tokio::test]
async fn test_rejected_token_writes_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/uaa/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("ids.csv");
    let err = fetch(&server, output.clone()).await.unwrap_err();

    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Authentication { status, body }) => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(body, "bad token");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!output.exists());
}

#[tokio::test]
async fn test_token_response_without_access_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/uaa/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id_token": "x"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetch(&server, dir.path().join("ids.csv")).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::MalformedResponse(_))));
}

#[tokio::test]
async fn test_unexpected_page_shape_aborts() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/rs/project"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(projects_page(1..=200, false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rs/project"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"projects": []})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("ids.csv");
    let err = fetch(&server, output.clone()).await.unwrap_err();

    assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::MalformedResponse(_))));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_server_error_on_listing_is_fatal() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/rs/project"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetch(&server, dir.path().join("ids.csv")).await.unwrap_err();
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Http { status, .. }) => assert_eq!(status.as_u16(), 503),
        other => panic!("unexpected error: {:?}", other),
    }
}
