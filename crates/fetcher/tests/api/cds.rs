use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::helpers::{ok, test_logger, MockHttp};
use sealevel::{
    domains::cds::{CdsClient, CdsCredentials},
    Method, SshError,
};
use serde_json::json;

const API: &str = "https://cds.example/api";

fn credentials() -> CdsCredentials {
    CdsCredentials {
        url: API.to_string(),
        key: "secret-key".to_string(),
    }
}

fn has_token(request: &sealevel::HttpRequest) -> bool {
    request
        .headers
        .iter()
        .any(|(name, value)| name == "PRIVATE-TOKEN" && value == "secret-key")
}

#[tokio::test]
async fn submits_polls_and_downloads() {
    let polls = Arc::new(AtomicUsize::new(0));
    let polled = polls.clone();

    let mut http = MockHttp::new();
    http.expect_send().times(5).returning(move |request| {
        match request.url.as_str() {
            "https://cds.example/api/retrieve/v1/processes/some-dataset/execution" => {
                assert_eq!(request.method, Method::Post);
                assert!(has_token(&request));
                assert_eq!(request.json, Some(json!({"inputs": {"year": ["1980"]}})));
                ok(r#"{"jobID": "job-1", "status": "accepted"}"#)
            }
            "https://cds.example/api/retrieve/v1/jobs/job-1" => {
                assert!(has_token(&request));
                if polled.fetch_add(1, Ordering::SeqCst) == 0 {
                    ok(r#"{"jobID": "job-1", "status": "running"}"#)
                } else {
                    ok(r#"{"jobID": "job-1", "status": "successful"}"#)
                }
            }
            "https://cds.example/api/retrieve/v1/jobs/job-1/results" => {
                ok(r#"{"asset": {"value": {"href": "https://download.example/job-1.zip"}}}"#)
            }
            "https://download.example/job-1.zip" => ok("zipped bytes"),
            other => panic!("unexpected request to {}", other),
        }
    });

    let client = CdsClient::new(test_logger(), Arc::new(http), credentials())
        .with_poll_interval(Duration::from_millis(1));
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("download.zip");
    client
        .retrieve("some-dataset", json!({"year": ["1980"]}), &target)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "zipped bytes");
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_job_is_an_error() {
    let mut http = MockHttp::new();
    http.expect_send().times(2).returning(|request| {
        if request.url.ends_with("/execution") {
            ok(r#"{"jobID": "job-2", "status": "accepted"}"#)
        } else {
            ok(r#"{"jobID": "job-2", "status": "failed"}"#)
        }
    });

    let client = CdsClient::new(test_logger(), Arc::new(http), credentials())
        .with_poll_interval(Duration::from_millis(1));
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("never.zip");
    let result = client.retrieve("some-dataset", json!({}), &target).await;

    assert!(matches!(result, Err(SshError::Provider(message)) if message.contains("job-2")));
    assert!(!target.exists());
}
