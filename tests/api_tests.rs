//! Integration tests for the HTTP API.
//!
//! These tests spawn a real Axum server on a random port and use reqwest
//! to hit it with actual HTTP requests, backed by the in-memory stores.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use chronod::models::{Job, Run, RunStatus};
use chronod::server::{build_router, AppState};
use chronod::store::memory::{MemoryJobStore, MemoryRunStore};
use chronod::store::{JobStore, RunStore};

struct TestServer {
    base_url: String,
    job_store: Arc<MemoryJobStore>,
    run_store: Arc<MemoryRunStore>,
}

async fn spawn_server() -> TestServer {
    let job_store = Arc::new(MemoryJobStore::new());
    let run_store = Arc::new(MemoryRunStore::new());
    let state = Arc::new(AppState {
        job_store: Arc::clone(&job_store) as Arc<dyn JobStore>,
        run_store: Arc::clone(&run_store) as Arc<dyn RunStore>,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        job_store,
        run_store,
    }
}

fn job_body(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "cron_expr": "*/5 * * * *",
        "command": "echo",
        "args": ["hello"],
        "env": {"GREETING": "hi"},
    })
}

#[tokio::test]
async fn test_health() {
    let server = spawn_server().await;
    let resp = reqwest::get(format!("{}/healthz", server.base_url))
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_create_job_returns_created() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&job_body("api-job"))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 201);

    let job: Job = resp.json().await.expect("body");
    assert_eq!(job.name, "api-job");
    assert_eq!(job.max_retries, 3, "max_retries defaults to 3");
    assert!(job.next_run_at.is_some(), "next fire computed on creation");
    assert!(job.next_run_at.expect("next") > Utc::now() - chrono::Duration::seconds(1));
}

#[tokio::test]
async fn test_create_job_rejects_invalid_cron() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let mut body = job_body("bad-cron");
    body["cron_expr"] = serde_json::json!("not a cron");
    let resp = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&body)
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = resp.json().await.expect("body");
    assert_eq!(err["error"], "invalid_input");
}

#[tokio::test]
async fn test_create_job_rejects_unresolvable_command() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let mut body = job_body("ghost-command");
    body["command"] = serde_json::json!("definitely-not-a-real-binary-1f2e3d");
    let resp = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&body)
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = resp.json().await.expect("body");
    assert_eq!(err["error"], "invalid_input");
    assert!(
        err["message"]
            .as_str()
            .expect("message")
            .contains("not found in PATH"),
        "message: {}",
        err["message"]
    );

    // Nothing was stored.
    let jobs: Vec<Job> = reqwest::get(format!("{}/api/v1/jobs", server.base_url))
        .await
        .expect("request")
        .json()
        .await
        .expect("body");
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_update_job_rejects_unresolvable_command() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Job = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&job_body("command-swap"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("body");

    let resp = client
        .put(format!("{}/api/v1/jobs/{}", server.base_url, created.id))
        .json(&serde_json::json!({"command": "definitely-not-a-real-binary-1f2e3d"}))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);

    // The stored command is untouched.
    let fetched: Job = client
        .get(format!("{}/api/v1/jobs/{}", server.base_url, created.id))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("body");
    assert_eq!(fetched.command, "echo");
}

#[tokio::test]
async fn test_create_job_duplicate_name_conflicts() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&job_body("dup"))
        .send()
        .await
        .expect("request");
    assert_eq!(first.status(), 201);

    let second = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&job_body("dup"))
        .send()
        .await
        .expect("request");
    assert_eq!(second.status(), 409);
    let err: serde_json::Value = second.json().await.expect("body");
    assert_eq!(err["error"], "conflict");
}

#[tokio::test]
async fn test_get_update_delete_roundtrip() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Job = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&job_body("roundtrip"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("body");

    // Read back the input values.
    let fetched: Job = client
        .get(format!("{}/api/v1/jobs/{}", server.base_url, created.id))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("body");
    assert_eq!(fetched.name, "roundtrip");
    assert_eq!(fetched.command, "echo");
    assert_eq!(fetched.env.get("GREETING").map(String::as_str), Some("hi"));

    // Update and read back the modified values.
    let resp = client
        .put(format!("{}/api/v1/jobs/{}", server.base_url, created.id))
        .json(&serde_json::json!({"name": "renamed", "max_retries": 1}))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);
    let updated: Job = resp.json().await.expect("body");
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.max_retries, 1);

    // Delete, then reads yield not-found.
    let resp = client
        .delete(format!("{}/api/v1/jobs/{}", server.base_url, created.id))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("{}/api/v1/jobs/{}", server.base_url, created.id))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_unknown_job_returns_not_found() {
    let server = spawn_server().await;
    let resp = reqwest::get(format!(
        "{}/api/v1/jobs/{}",
        server.base_url,
        Uuid::now_v7()
    ))
    .await
    .expect("request");
    assert_eq!(resp.status(), 404);
    let err: serde_json::Value = resp.json().await.expect("body");
    assert_eq!(err["error"], "not_found");
}

#[tokio::test]
async fn test_list_jobs() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    for name in ["l1", "l2", "l3"] {
        client
            .post(format!("{}/api/v1/jobs", server.base_url))
            .json(&job_body(name))
            .send()
            .await
            .expect("request");
    }

    let jobs: Vec<Job> = reqwest::get(format!("{}/api/v1/jobs", server.base_url))
        .await
        .expect("request")
        .json()
        .await
        .expect("body");
    assert_eq!(jobs.len(), 3);

    let limited: Vec<Job> = reqwest::get(format!("{}/api/v1/jobs?limit=2", server.base_url))
        .await
        .expect("request")
        .json()
        .await
        .expect("body");
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_run_views() {
    let server = spawn_server().await;
    let job = server
        .job_store
        .create_job(chronod::models::NewJob {
            name: "with-runs".to_string(),
            description: String::new(),
            cron_expr: "* * * * *".to_string(),
            command: "echo".to_string(),
            args: Vec::new(),
            env: Default::default(),
            status: chronod::models::JobStatus::Active,
            max_retries: 0,
            timeout: None,
        })
        .await
        .expect("create job");

    let now = Utc::now();
    let run = server
        .run_store
        .create_run(Run::scheduled(job.id, 1, now, now))
        .await
        .expect("create run");

    let runs: Vec<Run> = reqwest::get(format!(
        "{}/api/v1/jobs/{}/runs",
        server.base_url, job.id
    ))
    .await
    .expect("request")
    .json()
    .await
    .expect("body");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, run.id);
    assert_eq!(runs[0].status, RunStatus::Scheduled);

    let one: Run = reqwest::get(format!("{}/api/v1/runs/{}", server.base_url, run.id))
        .await
        .expect("request")
        .json()
        .await
        .expect("body");
    assert_eq!(one.id, run.id);

    let all: Vec<Run> = reqwest::get(format!("{}/api/v1/runs", server.base_url))
        .await
        .expect("request")
        .json()
        .await
        .expect("body");
    assert_eq!(all.len(), 1);

    // Runs for a job that does not exist are a 404, not an empty list.
    let resp = reqwest::get(format!(
        "{}/api/v1/jobs/{}/runs",
        server.base_url,
        Uuid::now_v7()
    ))
    .await
    .expect("request");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_wire_format_durations_and_instants() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let mut body = job_body("wire");
    body["timeout"] = serde_json::json!("1h30m");
    let resp = client
        .post(format!("{}/api/v1/jobs", server.base_url))
        .json(&body)
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 201);

    let value: serde_json::Value = resp.json().await.expect("body");
    assert_eq!(value["timeout"], "1h30m");
    // RFC-3339 instants end in a zone designator.
    let created_at = value["created_at"].as_str().expect("created_at");
    assert!(
        created_at.ends_with('Z') || created_at.contains('+'),
        "created_at not RFC-3339: {}",
        created_at
    );
}
