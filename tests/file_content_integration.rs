use std::io::Write;

use httpmock::prelude::*;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use pulp_squeezer::client::PulpClient;
use pulp_squeezer::modules::{run_file_content, RunOptions};
use pulp_squeezer_core::config::ConnectionConfig;
use pulp_squeezer_core::contract::TargetState;
use pulp_squeezer_core::file_content::{sha256_file, FileContentParams};
use pulp_squeezer_core::SqueezerError;

const REPOS: &str = "/pulp/api/v3/repositories/file/file/";
const REPO_HREF: &str = "/pulp/api/v3/repositories/file/file/0191-files/";
const VERSION_HREF: &str = "/pulp/api/v3/repositories/file/file/0191-files/versions/3/";
const CONTENT: &str = "/pulp/api/v3/content/file/files/";
const CONTENT_HREF: &str = "/pulp/api/v3/content/file/files/0191-c1/";
const ARTIFACTS: &str = "/pulp/api/v3/artifacts/";
const ARTIFACT_HREF: &str = "/pulp/api/v3/artifacts/0191-a1/";
const UPLOAD_HREF: &str = "/pulp/api/v3/uploads/0191-u1/";
const TASK_HREF: &str = "/pulp/api/v3/tasks/0191-t1/";

fn client_for(server: &MockServer) -> PulpClient {
    let mut config = ConnectionConfig::new(server.base_url());
    config.task_poll_interval_ms = 10;
    config.task_timeout_secs = 5;
    PulpClient::new(&config).expect("client builds")
}

fn page(results: Value) -> Value {
    json!({ "count": results.as_array().map(Vec::len).unwrap_or(0), "next": null, "results": results })
}

fn fixture(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content).expect("write fixture");
    file
}

fn content_unit(sha256: &str) -> Value {
    json!({
        "pulp_href": CONTENT_HREF,
        "relative_path": "data/important_file.txt",
        "sha256": sha256,
        "artifact": ARTIFACT_HREF,
    })
}

async fn mock_files_repository(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path(REPOS).query_param("name", "files");
            then.status(200).json_body(page(json!([{
                "pulp_href": REPO_HREF,
                "name": "files",
                "latest_version_href": VERSION_HREF,
            }])));
        })
        .await;
}

async fn mock_completed_task(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(GET).path(TASK_HREF);
            then.status(200).json_body(json!({
                "pulp_href": TASK_HREF,
                "state": "completed",
                "created_resources": [VERSION_HREF, ARTIFACT_HREF, CONTENT_HREF]
            }));
        })
        .await
}

fn present(file: &NamedTempFile, chunk_size: u64) -> FileContentParams {
    FileContentParams {
        relative_path: Some("data/important_file.txt".into()),
        file: Some(file.path().to_path_buf()),
        repository: Some("files".into()),
        state: Some(TargetState::Present),
        chunk_size,
        ..Default::default()
    }
}

#[tokio::test]
async fn checksum_mismatch_fails_before_any_request() {
    let server = MockServer::start_async().await;
    let anything = server
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let upload = fixture(b"hello\n");

    let mut params = present(&upload, 1024);
    params.sha256 =
        Some("0000000000000000000000000000000000000000000000000000000000000000".into());
    let err = run_file_content(&client_for(&server), &params, RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqueezerError::ChecksumMismatch { .. }), "got: {err:?}");
    assert_eq!(anything.hits_async().await, 0);
}

#[tokio::test]
async fn unknown_repository_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(REPOS).query_param("name", "files");
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let content = server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let upload = fixture(b"hello\n");

    let err = run_file_content(&client_for(&server), &present(&upload, 1024), RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqueezerError::NotFound { .. }), "got: {err:?}");
    assert_eq!(content.hits_async().await, 0);
}

#[tokio::test]
async fn absent_removes_unit_from_repository() {
    let server = MockServer::start_async().await;
    mock_files_repository(&server).await;
    let digest = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(CONTENT)
                .query_param("sha256", digest)
                .query_param("relative_path", "data/important_file.txt")
                .query_param("repository_version", VERSION_HREF);
            then.status(200).json_body(page(json!([content_unit(digest)])));
        })
        .await;
    let modify = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{REPO_HREF}modify/"))
                .json_body(json!({ "remove_content_units": [CONTENT_HREF] }));
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;
    mock_completed_task(&server).await;

    let params = FileContentParams {
        sha256: Some(digest.to_uppercase()),
        relative_path: Some("data/important_file.txt".into()),
        repository: Some("files".into()),
        state: Some(TargetState::Absent),
        ..Default::default()
    };
    let report = run_file_content(&client_for(&server), &params, RunOptions::default())
        .await
        .unwrap();

    lookup.assert_async().await;
    modify.assert_async().await;
    assert!(report.changed);
    assert_eq!(report.payload["content"], Value::Null);
}

#[tokio::test]
async fn small_file_is_uploaded_in_one_request() {
    let server = MockServer::start_async().await;
    mock_files_repository(&server).await;
    let upload = fixture(b"hello\n");
    let digest = sha256_file(upload.path()).unwrap();

    let lookups = server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT).query_param("sha256", &digest);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let artifacts = server
        .mock_async(|when, then| {
            when.method(GET).path(ARTIFACTS).query_param("sha256", &digest);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(CONTENT)
                .body_contains("data/important_file.txt")
                .body_contains(REPO_HREF);
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;
    mock_completed_task(&server).await;
    let fetch = server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT_HREF);
            then.status(200).json_body(content_unit(&digest));
        })
        .await;

    let report = run_file_content(&client_for(&server), &present(&upload, 1024), RunOptions::default())
        .await
        .unwrap();

    // Once scoped to the repository version, once across all content.
    assert_eq!(lookups.hits_async().await, 2);
    artifacts.assert_async().await;
    create.assert_async().await;
    fetch.assert_async().await;
    assert!(report.changed);
    assert_eq!(report.payload["content"]["pulp_href"], json!(CONTENT_HREF));
    assert_eq!(report.payload["content"]["sha256"], json!(digest));
}

#[tokio::test]
async fn large_file_is_uploaded_in_chunks() {
    let server = MockServer::start_async().await;
    mock_files_repository(&server).await;
    let upload = fixture(b"0123456789");
    let digest = sha256_file(upload.path()).unwrap();

    server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(ARTIFACTS);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let start = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/pulp/api/v3/uploads/")
                .json_body(json!({ "size": 10 }));
            then.status(201).json_body(json!({ "pulp_href": UPLOAD_HREF, "size": 10 }));
        })
        .await;
    let mut chunks = Vec::new();
    for range in ["bytes 0-3/10", "bytes 4-7/10", "bytes 8-9/10"] {
        chunks.push(
            server
                .mock_async(|when, then| {
                    when.method(PUT).path(UPLOAD_HREF).header("content-range", range);
                    then.status(200).json_body(json!({ "pulp_href": UPLOAD_HREF }));
                })
                .await,
        );
    }
    let commit = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{UPLOAD_HREF}commit/"))
                .json_body(json!({ "sha256": digest }));
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path(CONTENT).json_body(json!({
                "relative_path": "data/important_file.txt",
                "artifact": ARTIFACT_HREF,
                "repository": REPO_HREF,
            }));
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;
    mock_completed_task(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT_HREF);
            then.status(200).json_body(content_unit(&digest));
        })
        .await;

    let report = run_file_content(&client_for(&server), &present(&upload, 4), RunOptions::default())
        .await
        .unwrap();

    start.assert_async().await;
    for chunk in &chunks {
        chunk.assert_async().await;
    }
    commit.assert_async().await;
    create.assert_async().await;
    assert!(report.changed);
}

#[tokio::test]
async fn query_without_state_changes_nothing() {
    let server = MockServer::start_async().await;
    mock_files_repository(&server).await;
    let digest = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(CONTENT)
                .query_param("repository_version", VERSION_HREF);
            then.status(200).json_body(page(json!([content_unit(digest)])));
        })
        .await;
    let modify = server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{REPO_HREF}modify/"));
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;

    let params = FileContentParams {
        sha256: Some(digest.into()),
        relative_path: Some("data/important_file.txt".into()),
        repository: Some("files".into()),
        ..Default::default()
    };
    let report = run_file_content(&client_for(&server), &params, RunOptions::default())
        .await
        .unwrap();

    assert!(!report.changed);
    assert_eq!(report.payload["content"]["pulp_href"], json!(CONTENT_HREF));
    assert_eq!(modify.hits_async().await, 0);
}

#[tokio::test]
async fn query_by_relative_path_lists_every_digest() {
    let server = MockServer::start_async().await;
    mock_files_repository(&server).await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(CONTENT)
                .query_param("relative_path", "data/important_file.txt")
                .query_param("repository_version", VERSION_HREF);
            then.status(200).json_body(page(json!([
                content_unit("5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"),
                content_unit("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
            ])));
        })
        .await;

    let params = FileContentParams {
        relative_path: Some("data/important_file.txt".into()),
        repository: Some("files".into()),
        ..Default::default()
    };
    let report = run_file_content(&client_for(&server), &params, RunOptions::default())
        .await
        .expect("partial query lists");

    lookup.assert_async().await;
    assert!(!report.changed);
    assert_eq!(report.payload["contents"].as_array().map(Vec::len), Some(2));
    assert!(report.payload.get("content").is_none());
}

#[tokio::test]
async fn existing_unit_is_added_to_repository_without_upload() {
    let server = MockServer::start_async().await;
    mock_files_repository(&server).await;
    let upload = fixture(b"hello\n");
    let digest = sha256_file(upload.path()).unwrap();

    // Mocks are matched in the order they were defined.
    let scoped = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(CONTENT)
                .query_param("repository_version", VERSION_HREF);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let global = server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT).query_param("sha256", &digest);
            then.status(200).json_body(page(json!([content_unit(&digest)])));
        })
        .await;
    let modify = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{REPO_HREF}modify/"))
                .json_body(json!({ "add_content_units": [CONTENT_HREF] }));
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;
    mock_completed_task(&server).await;
    let artifacts = server
        .mock_async(|when, then| {
            when.method(GET).path(ARTIFACTS);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let uploads = server
        .mock_async(|when, then| {
            when.method(POST).path(CONTENT);
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;

    let report = run_file_content(&client_for(&server), &present(&upload, 1024), RunOptions::default())
        .await
        .unwrap();

    scoped.assert_async().await;
    global.assert_async().await;
    modify.assert_async().await;
    assert_eq!(artifacts.hits_async().await, 0);
    assert_eq!(uploads.hits_async().await, 0);
    assert!(report.changed);
    assert_eq!(report.payload["content"]["pulp_href"], json!(CONTENT_HREF));
}

#[tokio::test]
async fn existing_artifact_is_reused_without_upload() {
    let server = MockServer::start_async().await;
    mock_files_repository(&server).await;
    let upload = fixture(b"hello\n");
    let digest = sha256_file(upload.path()).unwrap();

    server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT);
            then.status(200).json_body(page(json!([])));
        })
        .await;
    let artifacts = server
        .mock_async(|when, then| {
            when.method(GET).path(ARTIFACTS).query_param("sha256", &digest);
            then.status(200).json_body(page(json!([{ "pulp_href": ARTIFACT_HREF, "sha256": digest }])));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path(CONTENT).json_body(json!({
                "relative_path": "data/important_file.txt",
                "artifact": ARTIFACT_HREF,
                "repository": REPO_HREF,
            }));
            then.status(202).json_body(json!({ "task": TASK_HREF }));
        })
        .await;
    let chunked = server
        .mock_async(|when, then| {
            when.method(POST).path("/pulp/api/v3/uploads/");
            then.status(201).json_body(json!({ "pulp_href": UPLOAD_HREF }));
        })
        .await;
    mock_completed_task(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(CONTENT_HREF);
            then.status(200).json_body(content_unit(&digest));
        })
        .await;

    let report = run_file_content(&client_for(&server), &present(&upload, 1024), RunOptions::default())
        .await
        .unwrap();

    artifacts.assert_async().await;
    create.assert_async().await;
    assert_eq!(chunked.hits_async().await, 0);
    assert!(report.changed);
    assert_eq!(report.payload["content"]["artifact"], json!(ARTIFACT_HREF));
}
