//! End-to-end tests for `cross-send --once`

use assert_cmd::Command;
use axum::{routing::post, Json, Router};
use chrono::{Duration, Utc};
use libcrosscast::credentials::{CredentialPatch, CredentialRecord};
use libcrosscast::types::PostContent;
use libcrosscast::{
    CredentialStore, Database, Platform, PostStatus, ScheduledPost, ScheduledPostStore,
};
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const SECRET: &str = "s3cret-trigger";

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

struct TestEnv {
    _temp_dir: TempDir,
    config_path: String,
    db_path: String,
}

impl TestEnv {
    fn new(facebook_base: &str, trigger_secret: Option<&str>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let db_path = temp_dir.path().join("crosscast.db");

        let secret_line = trigger_secret
            .map(|s| format!("trigger_secret = \"{}\"", s))
            .unwrap_or_default();
        let config_content = format!(
            r#"
[database]
path = "{}"

[http]
min_spacing_ms = 0
max_retries = 0
timeout_secs = 5

[facebook]
api_base = "{}"
api_version = "v1"

[scheduling]
retry_delay = 60
{}
"#,
            escape_path_for_toml(&db_path.to_string_lossy()),
            facebook_base,
            secret_line
        );
        fs::write(&config_path, config_content).unwrap();

        Self {
            config_path: config_path.to_string_lossy().to_string(),
            db_path: db_path.to_string_lossy().to_string(),
            _temp_dir: temp_dir,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("cross-send").unwrap();
        cmd.env("CROSSCAST_CONFIG", &self.config_path)
            .env_remove("CROSSCAST_DB_PATH")
            .env_remove("CROSSCAST_TRIGGER_SECRET");
        cmd
    }

    /// Seed a page credential and one post that fell due a minute ago
    async fn seed_due_post(&self) -> String {
        let db = Database::new(&self.db_path).await.unwrap();

        let mut record = CredentialRecord::new(Platform::Facebook, "u1", "page-token");
        record.external_account_id = "page1".to_string();
        db.set("u1", Platform::Facebook, CredentialPatch::from_record(&record))
            .await
            .unwrap();

        let post = ScheduledPost::new(
            "u1".to_string(),
            vec!["Facebook".to_string()],
            PostContent {
                caption: "Doors open at 8".to_string(),
                ..Default::default()
            },
            Utc::now() - Duration::minutes(1),
            3,
        );
        db.schedule(&post).await.unwrap();
        post.id
    }

    async fn post_status(&self, id: &str) -> PostStatus {
        let db = Database::new(&self.db_path).await.unwrap();
        ScheduledPostStore::get(&db, id).await.unwrap().unwrap().status
    }
}

async fn facebook_fixture() -> String {
    let router = Router::new().route(
        "/v1/page1/feed",
        post(|| async { Json(json!({"id": "page1_42"})) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[test]
fn test_help_documents_once_and_exit_codes() {
    let mut cmd = Command::cargo_bin("cross-send").unwrap();

    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("--poll-interval"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_once_without_configured_secret_is_refused() {
    let env = TestEnv::new("http://127.0.0.1:9", None);

    env.command()
        .args(["--once", "--secret", "anything"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No reconciler trigger secret"));
}

#[test]
fn test_once_with_wrong_secret_is_refused() {
    let env = TestEnv::new("http://127.0.0.1:9", Some(SECRET));

    env.command()
        .args(["--once", "--secret", "guess"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid reconciler trigger secret"));
}

#[test]
fn test_once_with_nothing_due_reports_zero() {
    let env = TestEnv::new("http://127.0.0.1:9", Some(SECRET));

    let output = env
        .command()
        .arg("--once")
        .env("CROSSCAST_TRIGGER_SECRET", SECRET)
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["processedCount"], 0);
    assert_eq!(summary["results"], json!([]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_once_publishes_due_post() {
    let base = facebook_fixture().await;
    let env = TestEnv::new(&base, Some(SECRET));
    let id = env.seed_due_post().await;

    let mut cmd = env.command();
    cmd.args(["--once", "--secret", SECRET]);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["processedCount"], 1);
    assert_eq!(summary["results"][0]["postId"], id.as_str());
    assert_eq!(summary["results"][0]["status"], "completed");
    assert_eq!(summary["results"][0]["platforms"][0]["id"], "page1_42");

    assert_eq!(env.post_status(&id).await, PostStatus::Completed);

    // A second pass finds nothing left to publish
    let mut again = env.command();
    again.args(["--once", "--secret", SECRET]);
    let output = tokio::task::spawn_blocking(move || again.output().unwrap())
        .await
        .unwrap();
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["processedCount"], 0);
}
