/// HttpApi against an in-process hyper server
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use wardlink_core::api::{HospitalApi, HttpApi};
use wardlink_core::config::Config;
use wardlink_core::error::WardError;
use wardlink_core::models::{LabReportStatus, LabReportUpdate, UnreadCounts};

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    target: String,
    auth: Option<String>,
    body: String,
}

type Log = Arc<Mutex<Vec<Seen>>>;

fn route(method: &str, target: &str, body: &str) -> (StatusCode, String) {
    match (method, target) {
        ("GET", "/api/notifications/unread-count") => (
            StatusCode::OK,
            r#"{"messageCount":3,"notificationCount":1}"#.to_string(),
        ),
        ("GET", "/api/chat/users") => (
            StatusCode::OK,
            r#"[{"_id":"u2","name":"Dr. Rao","role":"doctor","activityStatus":"online"},
                {"_id":"u3","name":"Sam","role":"janitor"}]"#
                .to_string(),
        ),
        ("POST", "/api/chat/send") => {
            let req: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
            let reply = serde_json::json!({
                "_id": "m9",
                "sender": {"_id": "u1", "name": "Nurse Joy"},
                "receiver": req["receiverId"],
                "message": req["message"],
                "createdAt": "2026-01-05T10:00:00Z"
            });
            (StatusCode::CREATED, reply.to_string())
        }
        ("PUT", "/api/chat/read/u%202") => (StatusCode::OK, r#"{"success":true}"#.to_string()),
        ("GET", "/api/search?q=blood%20test") => (
            StatusCode::OK,
            r#"{"patients":[{"_id":"p1","name":"Mira Shah","age":34}],"doctors":[]}"#.to_string(),
        ),
        ("PUT", "/api/lab-reports/lr1") => (
            StatusCode::OK,
            r#"{"_id":"lr1","patient":{"name":"Mira Shah"},"testName":"CBC","status":"completed","result":"normal"}"#
                .to_string(),
        ),
        ("PUT", "/api/notifications/missing/read") => (
            StatusCode::NOT_FOUND,
            r#"{"message":"Notification not found"}"#.to_string(),
        ),
        _ => (StatusCode::NOT_FOUND, r#"{"error":"no route"}"#.to_string()),
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    log: Log,
    delay: Duration,
) -> Response<Full<Bytes>> {
    let method = req.method().to_string();
    let target = req
        .uri()
        .path_and_query()
        .map(|p| p.to_string())
        .unwrap_or_default();
    let auth = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = req
        .into_body()
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();
    let body = String::from_utf8_lossy(&body).to_string();

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let (status, json) = route(&method, &target, &body);
    log.lock().unwrap().push(Seen {
        method,
        target,
        auth,
        body,
    });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// Start a server answering every request after `delay`; returns its base URL
async fn spawn_server(delay: Duration) -> (String, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let server_log = log.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let io = TokioIo::new(stream);
            let log = server_log.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| {
                    let log = log.clone();
                    async move { Ok::<_, Infallible>(handle(req, log, delay).await) }
                });
                let _ = http1::Builder::new().serve_connection(io, svc).await;
            });
        }
    });

    (format!("http://{}/api", addr), log)
}

fn client(api_url: &str, token: Option<&str>) -> HttpApi {
    let config = Config {
        api_url: api_url.to_string(),
        auth_token: token.map(str::to_string),
        request_timeout: Duration::from_millis(300),
        ..Default::default()
    };
    HttpApi::new(&config)
}

#[tokio::test]
async fn test_unread_count_with_bearer_token() {
    let (url, log) = spawn_server(Duration::ZERO).await;
    let api = client(&url, Some("tok-123"));

    let counts = api.unread_count().await.unwrap();
    assert_eq!(counts, UnreadCounts::new(3, 1));

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.target, "/api/notifications/unread-count");
    assert_eq!(seen.auth.as_deref(), Some("Bearer tok-123"));
}

#[tokio::test]
async fn test_no_token_sends_no_authorization() {
    let (url, log) = spawn_server(Duration::ZERO).await;
    let api = client(&url, None);

    let users = api.chat_users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].id, "u2");
    assert_eq!(users[0].unread_count, 0);
    assert!(log.lock().unwrap()[0].auth.is_none());
}

#[tokio::test]
async fn test_send_message_body_and_reply() {
    let (url, log) = spawn_server(Duration::ZERO).await;
    let api = client(&url, Some("t"));

    let sent = api.send_message("u2", "Bed 4 is ready").await.unwrap();
    assert_eq!(sent.id.as_deref(), Some("m9"));
    assert_eq!(sent.sender, "u1");
    assert_eq!(sent.receiver, "u2");
    assert_eq!(sent.message, "Bed 4 is ready");

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.method, "POST");
    let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(body, serde_json::json!({"receiverId": "u2", "message": "Bed 4 is ready"}));
}

#[tokio::test]
async fn test_path_segments_and_query_are_encoded() {
    let (url, log) = spawn_server(Duration::ZERO).await;
    let api = client(&url, None);

    api.mark_chat_read("u 2").await.unwrap();
    let results = api.search("blood test").await.unwrap();
    assert_eq!(results.patients.len(), 1);
    assert_eq!(results.total(), 1);

    let targets: Vec<String> = log.lock().unwrap().iter().map(|s| s.target.clone()).collect();
    assert_eq!(targets, vec!["/api/chat/read/u%202", "/api/search?q=blood%20test"]);
}

#[tokio::test]
async fn test_update_lab_report() {
    let (url, log) = spawn_server(Duration::ZERO).await;
    let api = client(&url, None);

    let update = LabReportUpdate {
        status: Some(LabReportStatus::Completed),
        result: Some("normal".to_string()),
    };
    let report = api.update_lab_report("lr1", &update).await.unwrap();
    assert_eq!(report.status, LabReportStatus::Completed);
    assert_eq!(report.patient.as_deref(), Some("Mira Shah"));

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.method, "PUT");
    let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(body, serde_json::json!({"status": "completed", "result": "normal"}));
}

#[tokio::test]
async fn test_error_status_maps_to_api_error() {
    let (url, _log) = spawn_server(Duration::ZERO).await;
    let api = client(&url, None);

    let err = api.mark_notification_read("missing").await.unwrap_err();
    assert!(err.is_rejection());
    match err {
        WardError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Notification not found");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let (url, _log) = spawn_server(Duration::from_secs(2)).await;
    let api = client(&url, None);

    let err = api.unread_count().await.unwrap_err();
    assert!(matches!(err, WardError::Timeout(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = client(&format!("http://{}/api", addr), None);
    let err = api.chat_users().await.unwrap_err();
    assert!(matches!(err, WardError::Connection(_)), "got {:?}", err);
    assert!(!err.is_rejection());
}
