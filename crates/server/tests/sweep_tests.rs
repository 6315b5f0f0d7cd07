//! Sweep jobs through the admin API.

mod common;

use axum::http::{Method, StatusCode};
use common::*;
use easel_metadata::SweepRepo;
use easel_metadata::models::SweepJobRow;
use easel_metadata::repos::SweepJobState;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Poll a sweep job until it reaches a terminal state.
async fn await_job(server: &TestServer, job_id: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = send_admin_json(
            &server.router,
            Method::GET,
            &format!("/v1/admin/sweeps/{job_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state = body["state"].as_str().unwrap_or("").to_string();
        if state == "finished" || state == "failed" {
            return body;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("sweep job did not finish in time: {body}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn admin_endpoints_require_the_admin_token() {
    let server = TestServer::new().await;

    let (status, body) = send_json(
        &server.router,
        Method::POST,
        "/v1/admin/sweeps",
        Some(serde_json::json!({ "step": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = send_json(&server.router, Method::GET, "/v1/admin/sweeps", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn triggered_sweep_advances_eligible_leads() {
    let server = TestServer::new().await;

    send_json(
        &server.router,
        Method::PUT,
        "/v1/leads/swept@example.com/context",
        Some(serde_json::json!({ "flow": "upload", "style": "oil" })),
    )
    .await;

    let (status, body) = send_admin_json(
        &server.router,
        Method::POST,
        "/v1/admin/sweeps",
        Some(serde_json::json!({ "step": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let job_id = body["sweep_job_id"].as_str().unwrap().to_string();

    let job = await_job(&server, &job_id).await;
    assert_eq!(job["state"], "finished");
    assert_eq!(job["stats"]["evaluated"], 1);
    assert_eq!(job["stats"]["sent"], 1);

    let (_, lead) = send_json(
        &server.router,
        Method::GET,
        "/v1/leads/swept@example.com",
        None,
    )
    .await;
    assert_eq!(lead["last_step_sent"], 1);
}

#[tokio::test]
async fn purchased_leads_are_never_swept() {
    let server = TestServer::new().await;

    send_json(
        &server.router,
        Method::PUT,
        "/v1/leads/converted@example.com/context",
        Some(serde_json::json!({ "flow": "upload" })),
    )
    .await;
    send_json(
        &server.router,
        Method::POST,
        "/v1/payments/events",
        Some(serde_json::json!({ "email": "converted@example.com" })),
    )
    .await;

    let (_, body) = send_admin_json(
        &server.router,
        Method::POST,
        "/v1/admin/sweeps",
        Some(serde_json::json!({ "step": 1 })),
    )
    .await;
    let job = await_job(&server, body["sweep_job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "finished");
    assert_eq!(job["stats"]["evaluated"], 0);
    assert_eq!(job["stats"]["sent"], 0);

    let (_, lead) = send_json(
        &server.router,
        Method::GET,
        "/v1/leads/converted@example.com",
        None,
    )
    .await;
    assert_eq!(lead["last_step_sent"], 0);
}

#[tokio::test]
async fn out_of_range_steps_are_rejected() {
    let server = TestServer::new().await;

    for step in [0, 7] {
        let (status, _) = send_admin_json(
            &server.router,
            Method::POST,
            "/v1/admin/sweeps",
            Some(serde_json::json!({ "step": step })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "step {step}");
    }
}

#[tokio::test]
async fn concurrent_sweeps_for_the_same_step_conflict() {
    let server = TestServer::new().await;

    // Simulate a still-running job for step 2.
    server
        .metadata()
        .create_sweep_job(&SweepJobRow {
            sweep_job_id: Uuid::new_v4(),
            step: 2,
            state: SweepJobState::Running.as_str().to_string(),
            started_at: Some(OffsetDateTime::now_utc()),
            finished_at: None,
            stats_json: None,
        })
        .await
        .unwrap();

    let (status, body) = send_admin_json(
        &server.router,
        Method::POST,
        "/v1/admin/sweeps",
        Some(serde_json::json!({ "step": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "metadata_error");
}

#[tokio::test]
async fn sweep_jobs_are_listed_newest_first() {
    let server = TestServer::new().await;

    let (_, first) = send_admin_json(
        &server.router,
        Method::POST,
        "/v1/admin/sweeps",
        Some(serde_json::json!({ "step": 1 })),
    )
    .await;
    await_job(&server, first["sweep_job_id"].as_str().unwrap()).await;

    let (_, second) = send_admin_json(
        &server.router,
        Method::POST,
        "/v1/admin/sweeps",
        Some(serde_json::json!({ "step": 1 })),
    )
    .await;
    await_job(&server, second["sweep_job_id"].as_str().unwrap()).await;

    let (status, body) = send_admin_json(
        &server.router,
        Method::GET,
        "/v1/admin/sweeps?limit=10",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["sweep_job_id"], second["sweep_job_id"]);
}

#[tokio::test]
async fn unknown_sweep_job_is_not_found() {
    let server = TestServer::new().await;
    let (status, _) = send_admin_json(
        &server.router,
        Method::GET,
        &format!("/v1/admin/sweeps/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_admin_json(
        &server.router,
        Method::GET,
        "/v1/admin/sweeps/not-a-uuid",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
