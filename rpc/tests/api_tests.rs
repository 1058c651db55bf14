//! HTTP API behaviour over nullable infrastructure.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ballot_nullables::{FailureKind, NullClock, NullLedger, NullStore};
use ballot_reconciler::{ReconcilerConfig, VoteReconciler};
use ballot_rpc::RpcServer;

const JAN_1: u64 = 1_735_689_600;
const JAN_3: u64 = 1_735_862_400;
const JAN_8: u64 = 1_736_294_400;

struct Api {
    router: Router,
    ledger: Arc<NullLedger>,
    clock: Arc<NullClock>,
}

fn api() -> Api {
    let ledger = Arc::new(NullLedger::new());
    let clock = Arc::new(NullClock::new(JAN_3));
    let config = ReconcilerConfig {
        confirmation_depth: 2,
        retry_min_delay_ms: 1,
        retry_max_delay_ms: 2,
        ..Default::default()
    };
    let reconciler = VoteReconciler::new(
        Arc::new(NullStore::new()),
        ledger.clone(),
        clock.clone(),
        config,
    );
    Api {
        router: RpcServer::new(Arc::new(reconciler)).router(),
        ledger,
        clock,
    }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

async fn create_board(api: &Api, public_results: bool) {
    let (status, body) = send(
        &api.router,
        "POST",
        "/elections",
        Some(json!({
            "id": "board-2025",
            "title": "Board 2025",
            "start_date": JAN_1,
            "end_date": JAN_8,
            "candidates": [
                { "id": "alice", "name": "Alice" },
                { "id": "bob", "name": "Bob" }
            ],
            "settings": {
                "allow_multiple_votes": false,
                "require_verification": true,
                "public_results": public_results
            },
            "is_active": true
        })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "active");
    assert_eq!(body["total_votes"], 0);
}

fn ballot(voter: &str, candidate: &str) -> Value {
    json!({ "voter": voter, "candidate": candidate, "election": "board-2025" })
}

#[tokio::test]
async fn vote_lifecycle_over_http() {
    let api = api();
    create_board(&api, true).await;

    let (status, body) = send(
        &api.router,
        "POST",
        "/votes",
        Some(ballot("u1", "alice")),
        &[("x-forwarded-for", "198.51.100.4"), ("user-agent", "kiosk")],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["replayed"], false);
    assert_eq!(body["vote"]["status"], "pending");
    assert_eq!(body["vote"]["metadata"]["ip"], "198.51.100.4");
    assert_eq!(body["vote"]["metadata"]["user_agent"], "kiosk");
    let vote_id = body["vote"]["id"].as_str().unwrap().to_string();
    let tx_hash = body["vote"]["tx_hash"].as_str().unwrap().to_string();
    assert!(tx_hash.starts_with("0x"));

    let (status, body) = send(
        &api.router,
        "POST",
        "/votes",
        Some(ballot("u1", "bob")),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_vote");
    assert_eq!(api.ledger.submissions(), 1);

    api.ledger.mine_block();
    let confirm = format!("/votes/{vote_id}/confirm");
    let (status, body) = send(&api.router, "POST", &confirm, None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "pending");
    assert_eq!(body["confirmations"], 1);

    api.ledger.mine_block();
    let (status, body) = send(&api.router, "POST", &confirm, None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "verified");
    assert_eq!(body["vote"]["status"], "verified");
    assert_eq!(body["vote"]["block_number"], 1);

    let (_, body) = send(&api.router, "POST", &confirm, None, &[]).await;
    assert_eq!(body["outcome"], "already_verified");

    let (status, body) = send(&api.router, "GET", &format!("/votes/{vote_id}"), None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], vote_id.as_str());

    let (status, body) = send(
        &api.router,
        "GET",
        &format!("/transactions/{tx_hash}/vote"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], vote_id.as_str());

    let (status, body) = send(
        &api.router,
        "POST",
        &format!("/votes/{vote_id}/audit"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "canonical");

    let (_, body) = send(&api.router, "GET", "/elections/board-2025", None, &[]).await;
    assert_eq!(body["total_votes"], 1);

    let (_, body) = send(&api.router, "GET", "/elections/board-2025/results", None, &[]).await;
    assert_eq!(body["total_votes"], 1);
    assert_eq!(body["tallies"][0]["candidate"], "alice");
    assert_eq!(body["tallies"][0]["votes"], 1);

    let (_, body) = send(&api.router, "GET", "/elections/board-2025/tally", None, &[]).await;
    assert_eq!(body["recorded"], 1);
    assert_eq!(body["counted"], 1);
    assert_eq!(body["drift"], 0);
}

#[tokio::test]
async fn idempotency_key_replays_the_first_vote() {
    let api = api();
    create_board(&api, false).await;
    let headers = [("idempotency-key", "req-1")];

    let (status, first) =
        send(&api.router, "POST", "/votes", Some(ballot("u1", "alice")), &headers).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) =
        send(&api.router, "POST", "/votes", Some(ballot("u1", "alice")), &headers).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["vote"]["id"], first["vote"]["id"]);

    let (status, body) =
        send(&api.router, "POST", "/votes", Some(ballot("u2", "bob")), &headers).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "idempotency_conflict");
    assert_eq!(api.ledger.submissions(), 1);
}

#[tokio::test]
async fn rejects_malformed_and_unknown_references() {
    let api = api();
    create_board(&api, false).await;

    let (status, body) = send(&api.router, "GET", "/votes/not-hex", None, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let missing = "ab".repeat(32);
    let (status, body) = send(&api.router, "GET", &format!("/votes/{missing}"), None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "vote_not_found");

    let (status, _) = send(&api.router, "GET", "/elections/nope", None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        send(&api.router, "POST", "/votes", Some(ballot("u1", "carol")), &[]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_candidate");

    let (status, _) = send(&api.router, "POST", "/votes", Some(ballot("", "alice")), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(api.ledger.submissions(), 0);
}

#[tokio::test]
async fn closed_and_cancelled_elections_refuse_votes() {
    let api = api();
    create_board(&api, false).await;

    api.clock.set(JAN_8);
    let (status, body) =
        send(&api.router, "POST", "/votes", Some(ballot("u1", "alice")), &[]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "election_not_open");

    api.clock.set(JAN_3);
    let (status, body) =
        send(&api.router, "POST", "/elections/board-2025/cancel", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    let (status, _) = send(&api.router, "POST", "/votes", Some(ballot("u1", "alice")), &[]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn activation_toggles_status() {
    let api = api();
    create_board(&api, false).await;

    let (_, body) = send(
        &api.router,
        "POST",
        "/elections/board-2025/activate?active=false",
        None,
        &[],
    )
    .await;
    assert_eq!(body["status"], "upcoming");
    assert_eq!(body["is_active"], false);

    let (_, body) = send(&api.router, "POST", "/elections/board-2025/activate", None, &[]).await;
    assert_eq!(body["status"], "active");

    let (_, body) = send(&api.router, "GET", "/elections", None, &[]).await;
    assert_eq!(body["elections"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_election_is_a_conflict() {
    let api = api();
    create_board(&api, false).await;
    let (status, body) = send(
        &api.router,
        "POST",
        "/elections",
        Some(json!({
            "id": "board-2025",
            "title": "Again",
            "start_date": JAN_1,
            "end_date": JAN_8,
            "candidates": [{ "id": "alice", "name": "Alice" }]
        })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "election_exists");
}

#[tokio::test]
async fn unavailable_ledger_is_service_unavailable() {
    let api = api();
    create_board(&api, false).await;
    api.ledger.fail_next_submissions(4, FailureKind::Transport);

    let (status, body) =
        send(&api.router, "POST", "/votes", Some(ballot("u1", "alice")), &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "submission_failed");

    // The reservation was released, so the voter may try again.
    let (status, _) = send(&api.router, "POST", "/votes", Some(ballot("u1", "alice")), &[]).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn results_are_withheld_until_completion() {
    let api = api();
    create_board(&api, false).await;
    let (_, body) = send(&api.router, "GET", "/elections/board-2025/results", None, &[]).await;
    assert!(body["tallies"].is_null());

    api.clock.set(JAN_8);
    let (_, body) = send(&api.router, "GET", "/elections/board-2025/results", None, &[]).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["tallies"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn vote_listing_pages_by_cursor() {
    let api = api();
    create_board(&api, true).await;
    for voter in ["u1", "u2", "u3"] {
        let (status, _) =
            send(&api.router, "POST", "/votes", Some(ballot(voter, "bob")), &[]).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, first) = send(
        &api.router,
        "GET",
        "/elections/board-2025/votes?limit=2",
        None,
        &[],
    )
    .await;
    assert_eq!(first["votes"].as_array().unwrap().len(), 2);
    let next = first["next"].as_str().unwrap().to_string();

    let (_, second) = send(
        &api.router,
        "GET",
        &format!("/elections/board-2025/votes?limit=2&after={next}"),
        None,
        &[],
    )
    .await;
    assert_eq!(second["votes"].as_array().unwrap().len(), 1);
    assert!(second.get("next").is_none());
    assert_ne!(second["votes"][0]["id"], first["votes"][0]["id"]);
    assert_ne!(second["votes"][0]["id"], first["votes"][1]["id"]);
}

#[tokio::test]
async fn health_and_metrics() {
    let api = api();
    create_board(&api, false).await;
    send(&api.router, "POST", "/votes", Some(ballot("u1", "alice")), &[]).await;

    let (status, body) = send(&api.router, "GET", "/health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pending_votes"], 1);

    let (status, body) = send(&api.router, "GET", "/metrics", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("ballot_votes_submitted_total 1"));
}
