//! End-to-end convergence tests
//!
//! The control plane is served on a real local socket; the reconciler talks
//! to it through its HTTP client exactly as the separate agent process
//! would, with a recording applier standing in for nft.

mod common;

use std::sync::Arc;

use common::{fixture, Fixture, RecordingApplier};
use pgw::config::AgentConfig;
use pgw::model::{Client, Mapping, MappingState, Proxy, ProxyKind, ProxyStatus};
use pgw::reconcile::Reconciler;
use pgw::{ApiClient, Store};

fn proxy(id: &str, host: &str) -> Proxy {
    Proxy {
        id: id.into(),
        label: None,
        kind: ProxyKind::Http,
        host: host.into(),
        port: 3128,
        username: None,
        password: None,
        enabled: true,
        status: ProxyStatus::Down,
        latency_ms: None,
        exit_ip: None,
        last_checked_at: None,
    }
}

fn client(id: &str, ip_cidr: &str) -> Client {
    Client {
        id: id.into(),
        ip_cidr: ip_cidr.into(),
        note: String::new(),
        enabled: true,
    }
}

fn mapping(id: &str, client_id: &str, proxy_id: &str, port: u16) -> Mapping {
    Mapping {
        id: id.into(),
        client_id: client_id.into(),
        proxy_id: proxy_id.into(),
        protocol: ProxyKind::Http,
        local_redirect_port: port,
        state: MappingState::Pending,
        last_applied_at: None,
    }
}

/// Serve the fixture's router on an ephemeral port; returns its base URL.
async fn serve_api(fx: &Fixture) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = pgw::api::build_router(fx.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn reconciler(base_url: &str, applier: Arc<RecordingApplier>) -> Reconciler {
    let cfg = AgentConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        api_url: base_url.into(),
        agent_token: "agent-token".into(),
        wan_iface: "eth0".into(),
        lan_iface: "ens19".into(),
        reconcile_interval_secs: 15,
    };
    let api = ApiClient::new(base_url, "agent-token").unwrap();
    Reconciler::new(&cfg, api, applier)
}

#[tokio::test]
async fn reconcile_applies_rules_and_reports_applied() {
    let fx = fixture();
    fx.store.create_proxy(proxy("p1", "10.0.0.2"));
    fx.store.create_client(client("c1", "192.168.2.3/32"));
    fx.store
        .create_mapping(mapping("m1", "c1", "p1", 15001))
        .unwrap();

    let base = serve_api(&fx).await;
    let applier = Arc::new(RecordingApplier::default());
    let rec = reconciler(&base, applier.clone());

    rec.run().await.unwrap();

    // Tear-down preceded one atomic apply
    assert_eq!(*applier.teardowns.lock(), 1);
    let applied = applier.applied.lock();
    assert_eq!(applied.len(), 1);
    assert!(applied[0].contains(
        "iifname \"ens19\" ip saddr 192.168.2.3/32 tcp dport { 80, 443 } redirect to :15001"
    ));
    assert!(applied[0].contains("table inet pgw_filter"));
    drop(applied);

    // The reconciler reported APPLIED through the state endpoint
    let m = fx.store.get_mapping("m1").unwrap();
    assert_eq!(m.state, MappingState::Applied);
    assert_eq!(m.local_redirect_port, 15001);
    assert!(m.last_applied_at.is_some());
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let fx = fixture();
    fx.store.create_proxy(proxy("p1", "10.0.0.2"));
    fx.store.create_proxy(proxy("p2", "10.0.0.3"));
    fx.store.create_client(client("c1", "192.168.2.3/32"));
    fx.store.create_client(client("c2", "192.168.2.4/32"));
    fx.store
        .create_mapping(mapping("m1", "c1", "p1", 15001))
        .unwrap();
    fx.store
        .create_mapping(mapping("m2", "c2", "p2", 15002))
        .unwrap();

    let base = serve_api(&fx).await;
    let applier = Arc::new(RecordingApplier::default());
    let rec = reconciler(&base, applier.clone());

    rec.run().await.unwrap();
    rec.run().await.unwrap();

    let applied = applier.applied.lock();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], applied[1], "two runs over one mapping set");
}

#[tokio::test]
async fn apply_failure_marks_all_considered_failed() {
    let fx = fixture();
    fx.store.create_proxy(proxy("p1", "10.0.0.2"));
    fx.store.create_proxy(proxy("p2", "10.0.0.3"));
    fx.store.create_client(client("c1", "192.168.2.3/32"));
    fx.store.create_client(client("c2", "192.168.2.4/32"));
    fx.store
        .create_mapping(mapping("m1", "c1", "p1", 15001))
        .unwrap();
    fx.store
        .create_mapping(mapping("m2", "c2", "p2", 15002))
        .unwrap();

    let base = serve_api(&fx).await;
    let applier = Arc::new(RecordingApplier {
        fail_apply: true,
        ..Default::default()
    });
    let rec = reconciler(&base, applier);

    let err = rec.run().await.unwrap_err();
    assert!(err.to_string().contains("apply failed"));

    for id in ["m1", "m2"] {
        let m = fx.store.get_mapping(id).unwrap();
        assert_eq!(m.state, MappingState::Failed, "{id}");
        // The allocated port survives the failure verdict
        assert!(m.local_redirect_port >= 15001);
    }
}

#[tokio::test]
async fn unallocated_mappings_not_reported() {
    let fx = fixture();
    fx.store.create_proxy(proxy("p1", "10.0.0.2"));
    fx.store.create_client(client("c1", "192.168.2.3/32"));
    // Port 0: canonicalisation skips it, so no rule and no state report
    fx.store.create_mapping(mapping("m1", "c1", "p1", 0)).unwrap();

    let base = serve_api(&fx).await;
    let applier = Arc::new(RecordingApplier::default());
    let rec = reconciler(&base, applier.clone());

    rec.run().await.unwrap();

    assert!(!applier.applied.lock()[0].contains("redirect to"));
    let m = fx.store.get_mapping("m1").unwrap();
    assert_eq!(m.state, MappingState::Pending);
}

#[tokio::test]
async fn shared_port_prefixes_prune_to_one_rule() {
    let fx = fixture();
    for (pid, cid, cidr) in [
        ("p1", "c1", "192.168.0.0/16"),
        ("p2", "c2", "192.168.2.0/24"),
        ("p3", "c3", "192.168.2.3/32"),
    ] {
        fx.store.create_proxy(proxy(pid, pid));
        fx.store.create_client(client(cid, cidr));
    }
    // Raw inputs feed the reconciler directly: same port, nested prefixes
    fx.store
        .create_mapping(mapping("m1", "c1", "p1", 15001))
        .unwrap();
    fx.store
        .create_mapping(mapping("m2", "c2", "p2", 15001))
        .unwrap();
    fx.store
        .create_mapping(mapping("m3", "c3", "p3", 15001))
        .unwrap();

    let base = serve_api(&fx).await;
    let applier = Arc::new(RecordingApplier::default());
    let rec = reconciler(&base, applier.clone());

    rec.run().await.unwrap();

    let applied = applier.applied.lock();
    assert_eq!(applied[0].matches("redirect to :15001").count(), 1);
    assert!(applied[0].contains("ip saddr 192.168.0.0/16 tcp dport { 80, 443 }"));

    // All three mappings were considered and reported
    drop(applied);
    for id in ["m1", "m2", "m3"] {
        assert_eq!(
            fx.store.get_mapping(id).unwrap().state,
            MappingState::Applied
        );
    }
}

#[tokio::test]
async fn trigger_endpoint_runs_cycle_synchronously() {
    let fx = fixture();
    fx.store.create_proxy(proxy("p1", "10.0.0.2"));
    fx.store.create_client(client("c1", "192.168.2.3/32"));
    fx.store
        .create_mapping(mapping("m1", "c1", "p1", 15001))
        .unwrap();

    let base = serve_api(&fx).await;
    let applier = Arc::new(RecordingApplier::default());
    let rec = Arc::new(reconciler(&base, applier.clone()));

    // Serve the agent endpoint on its own socket
    let agent_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let agent_addr = agent_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(agent_listener, pgw::reconcile::trigger_router(rec))
            .await
            .unwrap();
    });

    let agent = pgw::AgentClient::new(format!("http://{agent_addr}")).unwrap();
    agent.reconcile().await.unwrap();

    // The trigger returned only after the apply completed
    assert_eq!(applier.applied.lock().len(), 1);
    assert_eq!(
        fx.store.get_mapping("m1").unwrap().state,
        MappingState::Applied
    );
}
