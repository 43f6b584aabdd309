//! Router-level tests for the control plane
//!
//! The router is exercised in-process via `tower::ServiceExt::oneshot`; the
//! agent endpoint is a dead port, so convergence side effects are limited to
//! the store, the port registry, and the recording supervisor.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{fixture, Fixture};
use pgw::api::build_router;
use pgw::auth::{sign_token, Role};
use pgw::model::MappingState;
use pgw::Store;

fn admin_token(fx: &Fixture) -> String {
    sign_token("admin", Role::Admin, &fx.state.cfg.jwt_secret, 3600)
        .unwrap()
        .0
}

async fn send(fx: &Fixture, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(fx.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post(fx: &Fixture, uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", admin_token(fx)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(_fx: &Fixture, uri: &str, token: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn delete(fx: &Fixture, uri: &str) -> Request<Body> {
    Request::delete(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", admin_token(fx)))
        .body(Body::empty())
        .unwrap()
}

async fn create_proxy(fx: &Fixture, host: &str) -> String {
    let (status, body) = send(
        fx,
        post(
            fx,
            "/v1/proxies",
            json!({"type": "http", "host": host, "port": 3128, "enabled": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn create_client(fx: &Fixture, ip: &str) -> String {
    let (status, body) = send(fx, post(fx, "/v1/clients", json!({"ip_cidr": ip}))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let fx = fixture();
    let (status, _) = send(
        &fx,
        Request::get("/v1/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn login_issues_admin_token() {
    let fx = fixture();
    let request = Request::post("/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": "admin", "password": "hunter2"}).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&fx, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");
    assert!(body["expires_at"].is_string());

    // The issued token works against a protected route
    let token = body["token"].as_str().unwrap();
    let (status, _) = send(&fx, get(&fx, "/v1/proxies", token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_bad_password() {
    let fx = fixture();
    let request = Request::post("/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": "admin", "password": "wrong"}).to_string(),
        ))
        .unwrap();
    let (status, _) = send(&fx, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_token_is_401() {
    let fx = fixture();
    let (status, _) = send(
        &fx,
        Request::get("/v1/mappings").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agent_token_reads_but_cannot_create() {
    let fx = fixture();

    let (status, _) = send(&fx, get(&fx, "/v1/mappings", "agent-token")).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::post("/v1/proxies")
        .header(header::AUTHORIZATION, "Bearer agent-token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"type": "http", "host": "10.0.0.2", "port": 3128}).to_string(),
        ))
        .unwrap();
    let (status, _) = send(&fx, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn client_requires_ipv4_host() {
    let fx = fixture();

    // Bare address and /32 both normalise
    let (status, body) = send(
        &fx,
        post(&fx, "/v1/clients", json!({"ip_cidr": "192.168.2.3"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ip_cidr"], "192.168.2.3/32");

    let (status, body) = send(
        &fx,
        post(&fx, "/v1/clients", json!({"ip_cidr": "10.0.0.1/32"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ip_cidr"], "10.0.0.1/32");

    // Other prefixes and IPv6 rejected
    for bad in ["10.0.0.0/24", "::1", "garbage"] {
        let (status, _) = send(&fx, post(&fx, "/v1/clients", json!({"ip_cidr": bad}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bad} should be rejected");
    }
}

#[tokio::test]
async fn mapping_create_allocates_first_port() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let c1 = create_client(&fx, "192.168.2.3").await;

    let (status, body) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["local_redirect_port"], 15001);
    assert_eq!(body["state"], "PENDING");
    assert_eq!(body["client"]["ip_cidr"], "192.168.2.3/32");

    // The port marker exists and the supervisor was asked to start
    assert!(fx.state.registry.list().unwrap().contains(&15001));
    assert!(fx
        .supervisor
        .events
        .lock()
        .contains(&("start".to_string(), 15001)));
}

#[tokio::test]
async fn duplicate_proxy_rejected_409() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let c1 = create_client(&fx, "192.168.2.3").await;
    let c2 = create_client(&fx, "192.168.2.4").await;

    let (status, _) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c2, "proxy_id": p1})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "proxy already mapped");
}

#[tokio::test]
async fn foreign_port_request_rejected_400() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let p2 = create_proxy(&fx, "10.0.0.3").await;
    let c1 = create_client(&fx, "192.168.2.3").await;
    let c2 = create_client(&fx, "192.168.2.4").await;

    let (status, _) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &fx,
        post(
            &fx,
            "/v1/mappings",
            json!({"client_id": c2, "proxy_id": p2, "local_redirect_port": 15001}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "port 15001 is already used by another client");
}

#[tokio::test]
async fn same_client_reuses_port() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let p2 = create_proxy(&fx, "10.0.0.3").await;
    let c1 = create_client(&fx, "192.168.2.3").await;

    let (_, first) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;
    let (status, second) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p2})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["local_redirect_port"], 15001);
    assert_eq!(second["local_redirect_port"], 15001);
}

#[tokio::test]
async fn unknown_reference_rejected_400() {
    let fx = fixture();
    let (status, body) = send(
        &fx,
        post(
            &fx,
            "/v1/mappings",
            json!({"client_id": "nope", "proxy_id": "nope"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid client/proxy");
}

#[tokio::test]
async fn eager_probe_failure_marks_failed_but_returns_mapping() {
    let fx = common::fixture_with_agent(
        "http://127.0.0.1:9",
        pgw::check::CheckResult {
            status: pgw::model::ProxyStatus::Down,
            latency_ms: 0,
            exit_ip: String::new(),
        },
    );
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let c1 = create_client(&fx, "192.168.2.3").await;

    let (status, body) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "FAILED");

    // Proxy telemetry went DOWN, mapping stored FAILED
    let proxy = fx.store.get_proxy(&p1).unwrap();
    assert_eq!(proxy.status, pgw::model::ProxyStatus::Down);
    let mapping = &fx.store.list_mapping_records()[0];
    assert_eq!(mapping.state, MappingState::Failed);
}

#[tokio::test]
async fn mapping_state_write_and_sticky_failed() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let c1 = create_client(&fx, "192.168.2.3").await;

    let (_, created) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    // Agent reports FAILED through the state endpoint
    let request = Request::post(format!("/v1/mappings/state/{id}"))
        .header(header::AUTHORIZATION, "Bearer agent-token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"state": "FAILED", "local_redirect_port": 15001}).to_string(),
        ))
        .unwrap();
    let (status, _) = send(&fx, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Full live evidence present, yet FAILED stays sticky in the listing
    *fx.nat_probe.dump.lock() = Some(
        "iifname \"ens19\" ip saddr 192.168.2.3 tcp dport { 80, 443 } redirect to :15001\n"
            .to_string(),
    );
    let (status, body) = send(&fx, get(&fx, "/v1/mappings", "agent-token")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["state"], "FAILED");
}

#[tokio::test]
async fn mappings_sorted_by_client_ip() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let p2 = create_proxy(&fx, "10.0.0.3").await;
    // 192.168.2.10 sorts after 192.168.2.9 numerically, before it lexically
    let c_high = create_client(&fx, "192.168.2.10").await;
    let c_low = create_client(&fx, "192.168.2.9").await;

    send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c_high, "proxy_id": p1})),
    )
    .await;
    send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c_low, "proxy_id": p2})),
    )
    .await;

    let (_, body) = send(&fx, get(&fx, "/v1/mappings", "agent-token")).await;
    assert_eq!(body[0]["client"]["ip_cidr"], "192.168.2.9/32");
    assert_eq!(body[1]["client"]["ip_cidr"], "192.168.2.10/32");
}

#[tokio::test]
async fn proxies_sorted_by_host_port_id() {
    let fx = fixture();
    create_proxy(&fx, "10.0.0.9").await;
    create_proxy(&fx, "10.0.0.2").await;

    let (_, body) = send(&fx, get(&fx, "/v1/proxies", "agent-token")).await;
    assert_eq!(body[0]["host"], "10.0.0.2");
    assert_eq!(body[1]["host"], "10.0.0.9");
}

#[tokio::test]
async fn proxy_check_updates_telemetry() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;

    let request = Request::post(format!("/v1/proxies/{p1}/check"))
        .header(header::AUTHORIZATION, "Bearer agent-token")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&fx, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["exit_ip"], "203.0.113.9");

    let proxy = fx.store.get_proxy(&p1).unwrap();
    assert_eq!(proxy.status, pgw::model::ProxyStatus::Ok);
    assert_eq!(proxy.latency_ms, Some(40));
}

#[tokio::test]
async fn client_delete_cascades_and_releases_port() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let c1 = create_client(&fx, "192.168.2.3").await;

    send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;
    assert!(fx.state.registry.list().unwrap().contains(&15001));

    let (status, _) = send(&fx, delete(&fx, &format!("/v1/clients/{c1}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&fx, get(&fx, "/v1/mappings", "agent-token")).await;
    assert_eq!(body.as_array().unwrap().len(), 0);

    // Cleanup is asynchronous: wait for marker removal and supervisor stop
    for _ in 0..100 {
        if fx.state.registry.list().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(fx.state.registry.list().unwrap().is_empty());
    assert!(fx
        .supervisor
        .events
        .lock()
        .contains(&("stop".to_string(), 15001)));
}

#[tokio::test]
async fn proxy_delete_requires_admin_and_cascades() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let c1 = create_client(&fx, "192.168.2.3").await;
    send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;

    // Agent role may not delete
    let request = Request::delete(format!("/v1/proxies/{p1}"))
        .header(header::AUTHORIZATION, "Bearer agent-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&fx, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&fx, delete(&fx, &format!("/v1/proxies/{p1}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&fx, get(&fx, "/v1/mappings", "agent-token")).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn derived_state_upgrades_with_live_evidence() {
    let fx = fixture();
    let p1 = create_proxy(&fx, "10.0.0.2").await;
    let c1 = create_client(&fx, "192.168.2.3").await;
    let (_, created) = send(
        &fx,
        post(&fx, "/v1/mappings", json!({"client_id": c1, "proxy_id": p1})),
    )
    .await;
    assert_eq!(created["state"], "PENDING");

    // Simulate the forwarder: listen on the allocated port, and publish the
    // NAT rule into the probe's dump
    let listener = tokio::net::TcpListener::bind("127.0.0.1:15001").await.unwrap();
    *fx.nat_probe.dump.lock() = Some(
        "iifname \"ens19\" ip saddr 192.168.2.3 tcp dport { 80, 443 } redirect to :15001\n"
            .to_string(),
    );

    let (_, body) = send(&fx, get(&fx, "/v1/mappings", "agent-token")).await;
    assert_eq!(body[0]["state"], "APPLIED");

    // Without the listener the stored state is reported unchanged
    drop(listener);
    let (_, body) = send(&fx, get(&fx, "/v1/mappings", "agent-token")).await;
    assert_eq!(body[0]["state"], "PENDING");
}
