use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use axum::extract::connect_info::MockConnectInfo;
use axum::http::StatusCode;
use axum_test::TestServer;
use ipgate_server::{build_router, build_state, AppState, ServerConfig};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADMIN: &str = "127.0.0.1";

struct Harness {
    _dir: tempfile::TempDir,
    path: PathBuf,
    state: AppState,
}

impl Harness {
    fn new(fixed_ips: &str, webhook_url: Option<String>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowed_ips.json");
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            allowlist_path: path.clone(),
            cache_ttl: Duration::from_secs(60),
            cache_check_interval: Duration::ZERO,
            fixed_ips: fixed_ips.into(),
            webhook_url,
            webhook_timeout: Duration::from_secs(5),
            dns_timeout: Duration::from_secs(2),
            cors_origins: None,
        };
        let state = match build_state(&cfg) {
            Ok(state) => state,
            Err(e) => panic!("build state: {e:#}"),
        };
        Self {
            _dir: dir,
            path,
            state,
        }
    }

    fn admin_only() -> Self {
        Self::new(ADMIN, None)
    }

    /// A server that sees every request as coming from `caller`.
    fn server_as(&self, caller: &str) -> TestServer {
        let ip: IpAddr = caller.parse().unwrap();
        let app = build_router(self.state.clone(), None)
            .layer(MockConnectInfo(SocketAddr::new(ip, 40_000)));
        TestServer::new(app).unwrap()
    }
}

// ── General gate ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_caller_is_forbidden() {
    let h = Harness::admin_only();
    let resp = h.server_as("198.51.100.77").get("/allowed-ips").await;

    assert_eq!(resp.status_code(), StatusCode::FORBIDDEN);
    let body: Value = resp.json();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn fixed_ip_passes_gate_but_is_never_listed() {
    let h = Harness::admin_only();
    let resp = h.server_as(ADMIN).get("/allowed-ips").await;

    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.json::<Value>(), json!({"allowed_ips": []}));
}

#[tokio::test]
async fn ipv4_mapped_peer_matches_dotted_quad_entry() {
    let h = Harness::admin_only();
    let resp = h.server_as("::ffff:127.0.0.1").get("/allowed-ips").await;
    assert_eq!(resp.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn added_ip_gains_access_and_loses_it_on_delete() {
    let h = Harness::admin_only();
    let admin = h.server_as(ADMIN);
    let client = h.server_as("203.0.113.5");

    assert_eq!(client.get("/allowed-ips").await.status_code(), StatusCode::FORBIDDEN);

    admin
        .post("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await
        .assert_status_ok();
    assert_eq!(client.get("/allowed-ips").await.status_code(), StatusCode::OK);

    admin
        .delete("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await
        .assert_status_ok();
    assert_eq!(client.get("/allowed-ips").await.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn uppercase_ipv6_entry_admits_its_owner() {
    let h = Harness::admin_only();
    let admin = h.server_as(ADMIN);

    admin
        .post("/allowed-ips")
        .json(&json!({"ip": "2001:DB8::5"}))
        .await
        .assert_status_ok();
    assert_eq!(
        h.server_as("2001:db8::5").get("/allowed-ips").await.status_code(),
        StatusCode::OK
    );

    let resp = admin
        .post("/allowed-ips")
        .json(&json!({"ip": "2001:db8::5"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);

    let resp = admin
        .post("/allowed-ips")
        .json(&json!({"ip": "::ffff:127.0.0.1"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);

    let list: Value = admin.get("/allowed-ips").await.json();
    assert_eq!(list, json!({"allowed_ips": [{"id": 1, "ip": "2001:db8::5"}]}));
}

// ── Admin gate ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dynamic_caller_can_read_but_not_mutate() {
    let h = Harness::admin_only();
    h.server_as(ADMIN)
        .post("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await
        .assert_status_ok();

    let client = h.server_as("203.0.113.5");
    assert_eq!(client.get("/allowed-ips").await.status_code(), StatusCode::OK);

    let resp = client
        .post("/allowed-ips")
        .json(&json!({"ip": "198.51.100.9"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::FORBIDDEN);

    let resp = client
        .put("/allowed-ips")
        .json(&json!({"old_ip": "203.0.113.5", "new_ip": "198.51.100.9"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::FORBIDDEN);

    let resp = client
        .delete("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::FORBIDDEN);

    // Nothing changed.
    let list: Value = h.server_as(ADMIN).get("/allowed-ips").await.json();
    assert_eq!(list, json!({"allowed_ips": [{"id": 1, "ip": "203.0.113.5"}]}));
}

// ── Allowlist CRUD ────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_duplicate() {
    let h = Harness::admin_only();
    let admin = h.server_as(ADMIN);

    let resp = admin
        .post("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(
        resp.json::<Value>(),
        json!({"message": "IP added successfully", "ip": {"id": 1, "ip": "203.0.113.5"}})
    );

    let resp = admin
        .post("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.json::<Value>(), json!({"error": "IP already exists"}));
}

#[tokio::test]
async fn create_persists_document() {
    let h = Harness::admin_only();
    h.server_as(ADMIN)
        .post("/allowed-ips")
        .json(&json!({"ip": "2001:db8::5"}))
        .await
        .assert_status_ok();

    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&h.path).unwrap()).unwrap();
    assert_eq!(doc, json!({"allowed_ips": [{"id": 1, "ip": "2001:db8::5"}]}));
}

#[tokio::test]
async fn create_unresolvable_domain_is_bad_request() {
    let h = Harness::admin_only();
    let resp = h
        .server_as(ADMIN)
        .post("/allowed-ips")
        .json(&json!({"ip": "no-such-host.invalid"}))
        .await;

    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert!(
        body["error"].as_str().unwrap().contains("no-such-host.invalid"),
        "{body}"
    );
}

#[tokio::test]
async fn create_with_bad_body_is_bad_request() {
    let h = Harness::admin_only();
    let admin = h.server_as(ADMIN);

    for body in [json!({}), json!({"ip": ""}), json!({"ip": 42}), json!({"ip": "a".repeat(256)})] {
        let resp = admin.post("/allowed-ips").json(&body).await;
        assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST, "body {body}");
        assert!(resp.json::<Value>()["error"].is_string());
    }
}

#[tokio::test]
async fn edit_replaces_ip_keeping_id() {
    let h = Harness::admin_only();
    let admin = h.server_as(ADMIN);
    admin
        .post("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await
        .assert_status_ok();

    let resp = admin
        .put("/allowed-ips")
        .json(&json!({"old_ip": "203.0.113.5", "new_ip": "198.51.100.9"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(
        resp.json::<Value>(),
        json!({
            "success": true,
            "message": "IP updated successfully",
            "allowed_ips": [{"id": 1, "ip": "198.51.100.9"}],
        })
    );
}

#[tokio::test]
async fn edit_error_statuses() {
    let h = Harness::admin_only();
    let admin = h.server_as(ADMIN);
    for ip in ["10.0.0.1", "10.0.0.2"] {
        admin
            .post("/allowed-ips")
            .json(&json!({"ip": ip}))
            .await
            .assert_status_ok();
    }

    let cases = [
        (json!({"old_ip": "10.9.9.9", "new_ip": "10.0.0.3"}), StatusCode::NOT_FOUND),
        (json!({"old_ip": "10.0.0.1", "new_ip": "10.0.0.2"}), StatusCode::BAD_REQUEST),
        (json!({"old_ip": "10.0.0.1", "new_ip": "10.0.0.1"}), StatusCode::BAD_REQUEST),
        (json!({"old_ip": "10.0.0.1"}), StatusCode::BAD_REQUEST),
    ];
    for (body, status) in cases {
        let resp = admin.put("/allowed-ips").json(&body).await;
        assert_eq!(resp.status_code(), status, "body {body}");
    }
}

#[tokio::test]
async fn delete_missing_is_not_found() {
    let h = Harness::admin_only();
    let resp = h
        .server_as(ADMIN)
        .delete("/allowed-ips")
        .json(&json!({"ip": "10.0.0.1"}))
        .await;

    assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(resp.json::<Value>(), json!({"error": "IP not found"}));
}

#[tokio::test]
async fn delete_returns_success_and_keeps_other_ids() {
    let h = Harness::admin_only();
    let admin = h.server_as(ADMIN);
    for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        admin
            .post("/allowed-ips")
            .json(&json!({"ip": ip}))
            .await
            .assert_status_ok();
    }

    let resp = admin
        .delete("/allowed-ips")
        .json(&json!({"ip": "10.0.0.2"}))
        .await;
    assert_eq!(
        resp.json::<Value>(),
        json!({"success": true, "message": "IP deleted"})
    );

    let list: Value = admin.get("/allowed-ips").await.json();
    assert_eq!(
        list,
        json!({"allowed_ips": [{"id": 1, "ip": "10.0.0.1"}, {"id": 3, "ip": "10.0.0.3"}]})
    );
}

#[tokio::test]
async fn corrupt_document_lists_empty() {
    let h = Harness::admin_only();
    std::fs::write(&h.path, "{\"allowed_ips\": [").unwrap();

    let resp = h.server_as(ADMIN).get("/allowed-ips").await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.json::<Value>(), json!({"allowed_ips": []}));
}

#[tokio::test]
async fn empty_document_lists_empty() {
    let h = Harness::admin_only();
    std::fs::write(&h.path, "").unwrap();

    let resp = h.server_as(ADMIN).get("/allowed-ips").await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.json::<Value>(), json!({"allowed_ips": []}));
}

// ── Notifications ─────────────────────────────────────────────────────────────

fn alert() -> Value {
    json!({
        "nome_empresa": "Acme",
        "client_name": "Jane",
        "number_client": "5511999990000",
        "msg": "Queue is stuck",
        "url_opa": "https://console.example.com/t/1",
    })
}

#[tokio::test]
async fn send_message_forwards_to_webhook() {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&sink)
        .await;

    let h = Harness::new(ADMIN, Some(format!("{}/hook", sink.uri())));
    let resp = h.server_as(ADMIN).post("/send-message").json(&alert()).await;

    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.json::<Value>(), json!({"message": "Message sent successfully"}));

    let received = sink.received_requests().await.unwrap();
    let payload: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(payload["embeds"][0]["url"], "https://console.example.com/t/1");
}

#[tokio::test]
async fn send_message_allows_dynamic_callers() {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&sink)
        .await;

    let h = Harness::new(ADMIN, Some(sink.uri()));
    h.server_as(ADMIN)
        .post("/allowed-ips")
        .json(&json!({"ip": "203.0.113.5"}))
        .await
        .assert_status_ok();

    let resp = h
        .server_as("203.0.113.5")
        .post("/send-message")
        .json(&alert())
        .await;
    assert_eq!(resp.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn send_message_webhook_failure_is_internal_error() {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&sink)
        .await;

    let h = Harness::new(ADMIN, Some(sink.uri()));
    let resp = h.server_as(ADMIN).post("/send-message").json(&alert()).await;

    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.json::<Value>(), json!({"error": "Error sending message"}));
}

#[tokio::test]
async fn send_message_without_webhook_is_internal_error() {
    let h = Harness::admin_only();
    let resp = h.server_as(ADMIN).post("/send-message").json(&alert()).await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn send_message_rejects_missing_fields() {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&sink)
        .await;

    let h = Harness::new(ADMIN, Some(sink.uri()));
    let resp = h
        .server_as(ADMIN)
        .post("/send-message")
        .json(&json!({"nome_empresa": "Acme", "msg": "hi"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn send_message_from_unknown_caller_never_reaches_webhook() {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&sink)
        .await;

    let h = Harness::new(ADMIN, Some(sink.uri()));
    let resp = h
        .server_as("198.51.100.77")
        .post("/send-message")
        .json(&alert())
        .await;
    assert_eq!(resp.status_code(), StatusCode::FORBIDDEN);
}
