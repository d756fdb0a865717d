mod mocks;

use apiverify::{
    poll, ApiMethodError, ExpectedStatus, HttpMethod, HttpResponse, LogStrategy, PollSpec, ProtocolError, StatusClass,
};
use mocks::{api_method, json_descriptor, Resources, ScriptedExecutor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn spec(interval_ms: u64, timeout_ms: u64) -> PollSpec {
    PollSpec::new(Duration::from_millis(interval_ms), Duration::from_millis(timeout_ms))
}

#[tokio::test(start_paused = true)]
async fn test_poll_times_out_with_last_response() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(200, r#"{"state": "queued"}"#)
            .respond(200, r#"{"state": "running"}"#)
            .respond(200, r#"{"state": "running", "progress": 50}"#),
    );
    let resources = Resources::new();
    let mut method = api_method(json_descriptor("jobs", HttpMethod::GET), &executor, &resources);

    let mut spec = spec(100, 350);
    spec.predicate = Box::new(|response: &HttpResponse| response.body_text().contains("done"));
    spec.log_strategy = LogStrategy::LastOnly;

    match poll(&mut method, spec).await.unwrap_err() {
        ApiMethodError::PollTimeout {
            attempts,
            elapsed,
            last_response,
        } => {
            // attempts at 0, 100, 200 and 300ms; a fifth would start past the deadline
            assert_eq!(attempts, 4);
            assert!(elapsed <= Duration::from_millis(350));
            let last = last_response.expect("last response is kept");
            assert_eq!(last.body_text(), r#"{"state": "running", "progress": 50}"#);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(executor.request_count(), 4);
    assert_eq!(
        method.last_response_body(),
        Some(r#"{"state": "running", "progress": 50}"#)
    );
}

#[tokio::test(start_paused = true)]
async fn test_poll_stops_when_predicate_holds() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(200, r#"{"state": "running"}"#)
            .respond(200, r#"{"state": "done"}"#)
            .respond(200, r#"{"state": "archived"}"#),
    );
    let resources = Resources::new();
    let mut method = api_method(json_descriptor("jobs", HttpMethod::GET), &executor, &resources);

    let mut spec = spec(100, 5_000);
    spec.predicate = Box::new(|response: &HttpResponse| response.body_text().contains("done"));

    let response = poll(&mut method, spec).await.unwrap();
    assert_eq!(response.body_text(), r#"{"state": "done"}"#);
    assert_eq!(executor.request_count(), 2);
    assert_eq!(method.last_response_body(), Some(r#"{"state": "done"}"#));
}

#[tokio::test(start_paused = true)]
async fn test_default_predicate_waits_for_success_status() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(503, "unavailable")
            .respond(503, "unavailable")
            .respond(200, r#"{"ready": true}"#),
    );
    let resources = Resources::new();
    let mut method = api_method(json_descriptor("health", HttpMethod::GET), &executor, &resources);

    let response = poll(&mut method, spec(50, 1_000)).await.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(executor.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_after_execute_runs_on_every_attempt() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(404, "")
            .respond(404, "")
            .respond(200, "{}"),
    );
    let resources = Resources::new();
    let mut method = api_method(json_descriptor("lookup", HttpMethod::GET), &executor, &resources);

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let response = method
        .call_with_retry()
        .interval(Duration::from_millis(10))
        .timeout(Duration::from_secs(1))
        .after_execute(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .log_strategy(LogStrategy::None)
        .execute()
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_until_status() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(200, "{}")
            .respond(202, "{}")
            .respond(404, "{}"),
    );
    let resources = Resources::new();
    let mut method = api_method(json_descriptor("delete", HttpMethod::DELETE), &executor, &resources);

    let response = method
        .call_with_retry()
        .interval(Duration::from_millis(10))
        .timeout(Duration::from_secs(1))
        .until_status(ExpectedStatus::Class(StatusClass::ClientError))
        .execute()
        .await
        .unwrap();

    assert_eq!(response.status_code, 404);
    assert_eq!(executor.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_aborts_polling() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .fail(ProtocolError::ConnectionFailed("connection reset".to_string()))
            .respond(200, "{}"),
    );
    let resources = Resources::new();
    let mut method = api_method(json_descriptor("flaky", HttpMethod::GET), &executor, &resources);

    let err = poll(&mut method, spec(10, 1_000)).await.unwrap_err();
    assert!(matches!(err, ApiMethodError::Protocol(ProtocolError::ConnectionFailed(_))));
    assert_eq!(executor.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_render_error_aborts_before_any_request() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = Resources::new().with("rq.json", r#"{"id": "{{job_id}}"}"#);
    let descriptor = json_descriptor("jobs", HttpMethod::POST).with_request_template("rq.json");
    let mut method = api_method(descriptor, &executor, &resources);

    let err = poll(&mut method, spec(10, 1_000)).await.unwrap_err();
    assert!(matches!(err, ApiMethodError::TemplateRender { .. }));
    assert_eq!(executor.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_polled_body_can_be_validated() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(202, r#"{"id": 3, "state": "running"}"#)
            .respond(200, r#"{"id": 3, "state": "done"}"#),
    );
    let resources = Resources::new().with("rs.json", r#"{"id": {{job_id}}, "state": "done"}"#);
    let descriptor = json_descriptor("jobs", HttpMethod::GET).with_response_template("rs.json");
    let mut method = api_method(descriptor, &executor, &resources);
    method.add_property("job_id", 3).unwrap();

    method
        .call_with_retry()
        .interval(Duration::from_millis(100))
        .timeout(Duration::from_secs(2))
        .until_status(ExpectedStatus::Code(200))
        .execute()
        .await
        .unwrap();

    method.validate_response([]).unwrap();
}
