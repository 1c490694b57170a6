//! Owner email extraction against a mock API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ownermail::client::ApiClient;
use ownermail::config::ApiConfig;
use ownermail::files;
use ownermail::owners::{self, OwnerExtractor, OwnerReport};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_collaborators(server: &MockServer, project_id: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/api/project/access/{}/collaborator", project_id)))
        .and(header("Authorization", "Api-Token secret"))
        .and(header("Accept", "application/json"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn ok_json(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// Write `ids` to an input file, run the extractor, return the report and the output path.
async fn extract(server: &MockServer, dir: &Path, ids: &str) -> (OwnerReport, PathBuf) {
    let input = dir.join("project_ids.csv");
    let output = dir.join("emails.csv");
    std::fs::write(&input, ids).unwrap();

    let config = ApiConfig {
        endpoint: server.uri(),
        timeout_secs: 5,
        ..ApiConfig::default()
    };
    let out = output.clone();
    let report = tokio::task::spawn_blocking(move || {
        let client = ApiClient::new(&config).unwrap();
        let extractor = OwnerExtractor::new(&client, "Api-Token", "secret").with_delay(Duration::ZERO);
        let project_ids = files::read_project_ids(&input).unwrap();
        owners::run_to_file(&extractor, &project_ids, &out).unwrap()
    })
    .await
    .expect("extractor task panicked");

    (report, output)
}

#[tokio::test]
async fn test_only_owner_email_is_written() {
    let server = MockServer::start().await;
    mount_collaborators(
        &server,
        "42",
        ok_json(json!([
            {"permissionSetName": "Project Owner", "email": "a@x.com"},
            {"permissionSetName": "Viewer", "email": "b@x.com"}
        ])),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (report, output) = extract(&server, dir.path(), "42\n").await;

    assert_eq!(std::fs::read_to_string(output).unwrap(), "a@x.com\n");
    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.projects[0].collaborators, 2);
    assert_eq!(report.projects[0].owners, 1);
    assert_eq!(report.projects[0].added, 1);
    assert!(report.projects[0].role_stats.is_none());
}

#[tokio::test]
async fn test_same_email_across_projects_is_written_once() {
    let server = MockServer::start().await;
    mount_collaborators(
        &server,
        "1",
        ok_json(json!({"content": [{"permissionSetName": "PROJECT_OWNER", "email": "z@x.com"}]})),
    )
    .await;
    mount_collaborators(
        &server,
        "2",
        ok_json(json!({"collaborators": [
            {"role": "owner", "user": {"email": "z@x.com"}},
            {"isOwner": true, "username": "m@x.com"}
        ]})),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (report, output) = extract(&server, dir.path(), "1,2\n2\n").await;

    assert_eq!(std::fs::read_to_string(output).unwrap(), "m@x.com\nz@x.com\n");
    assert_eq!(report.projects.len(), 2);
    assert_eq!(report.projects[1].owners, 2);
    assert_eq!(report.projects[1].added, 1);
}

#[tokio::test]
async fn test_failing_project_does_not_stop_the_run() {
    let server = MockServer::start().await;
    mount_collaborators(&server, "10", ResponseTemplate::new(500)).await;
    mount_collaborators(
        &server,
        "11",
        ResponseTemplate::new(200).set_body_string("<html>not json</html>"),
    )
    .await;
    mount_collaborators(
        &server,
        "12",
        ok_json(json!([{"accessLevel": "Project-Owner", "mail": "ok@x.com"}])),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (report, output) = extract(&server, dir.path(), "10\n11\n12\n").await;

    let errors: Vec<Option<&str>> = report.projects.iter().map(|p| p.error.as_deref()).collect();
    assert_eq!(errors, vec![Some("HTTP error"), Some("Malformed JSON"), None]);
    assert_eq!(std::fs::read_to_string(output).unwrap(), "ok@x.com\n");
}

#[tokio::test]
async fn test_role_table_when_no_owners() {
    let server = MockServer::start().await;
    mount_collaborators(
        &server,
        "5",
        ok_json(json!([
            {"permissionSetName": "Viewer", "email": "a@x.com"},
            {"permissionSetName": "viewer", "email": "b@x.com"},
            {"role": "Ownership Viewer"},
            {"email": "c@x.com"}
        ])),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (report, output) = extract(&server, dir.path(), "5\n").await;

    let stats = report.projects[0].role_stats.clone().unwrap();
    assert_eq!(stats.get("VIEWER"), Some(&2));
    assert_eq!(stats.get("OWNERSHIP_VIEWER"), Some(&1));
    assert_eq!(stats.get("UNKNOWN"), Some(&1));
    assert_eq!(std::fs::read_to_string(output).unwrap(), "");
}

#[tokio::test]
async fn test_empty_id_list_still_writes_output() {
    let server = MockServer::start().await;

    let dir = tempfile::tempdir().unwrap();
    let (report, output) = extract(&server, dir.path(), "id\nname\n").await;

    assert!(report.projects.is_empty());
    assert!(output.exists());
    assert_eq!(std::fs::read_to_string(output).unwrap(), "");
}

#[tokio::test]
async fn test_rerun_produces_identical_file() {
    let server = MockServer::start().await;
    mount_collaborators(
        &server,
        "7",
        ok_json(json!([
            {"permissionSetName": "Project Owner", "email": "q@x.com"},
            {"permissionSetName": "Project Owner", "email": "b@x.com"},
            {"projectRole": {"name": "project owner"}, "login": "k@x.com"}
        ])),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (_, output) = extract(&server, dir.path(), "7\n").await;
    let first = std::fs::read(&output).unwrap();
    let (_, output) = extract(&server, dir.path(), "7\n").await;
    let second = std::fs::read(&output).unwrap();

    assert_eq!(first, second);
    assert_eq!(String::from_utf8(first).unwrap(), "b@x.com\nk@x.com\nq@x.com\n");
}
