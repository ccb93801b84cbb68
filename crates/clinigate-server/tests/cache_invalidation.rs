use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;

use clinigate_cache::CacheStore;
use clinigate_core::TenantId;
use clinigate_realtime::{ChangeEvent, ChangeKind, MemoryFeed};
use clinigate_server::audit::RecordingAuditSink;
use clinigate_server::backend::MemoryBackend;
use clinigate_server::verifier::StaticVerifier;
use clinigate_server::{AppConfig, AppState, build_app};

struct TestGateway {
    base: String,
    state: AppState,
    feed: Arc<MemoryFeed>,
    backend: Arc<MemoryBackend>,
    _shutdown: tokio::sync::oneshot::Sender<()>,
    _server: JoinHandle<()>,
}

async fn start_gateway(config: AppConfig) -> TestGateway {
    let verifier = Arc::new(
        StaticVerifier::new()
            .with_token("tok-a", "clinic-a", "user-a")
            .with_token("tok-b", "clinic-b", "user-b"),
    );
    let backend = MemoryBackend::new();
    let feed = MemoryFeed::new();
    let state = AppState::new(
        config,
        verifier,
        backend.clone(),
        feed.clone(),
        Arc::new(RecordingAuditSink::new()),
    )
    .expect("build state");
    let app = build_app(state.clone());

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestGateway {
        base: format!("http://{addr}"),
        state,
        feed,
        backend,
        _shutdown: tx,
        _server: server,
    }
}

async fn get_envelope(gateway: &TestGateway, token: &str, path: &str) -> Value {
    reqwest::Client::new()
        .get(format!("{}{}", gateway.base, path))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Subscriptions are established off the request path; wait for them.
async fn wait_for_subscription(gateway: &TestGateway, tenant: &TenantId, table: &str) {
    for _ in 0..200 {
        if gateway.state.registry.is_subscribed(tenant, table) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("subscription for {tenant}/{table} was never established");
}

async fn wait_for_eviction(gateway: &TestGateway, key: &str) {
    for _ in 0..200 {
        if gateway.state.cache.get(key).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache entry {key} was never evicted");
}

#[tokio::test]
async fn change_event_evicts_only_the_publishing_tenant() {
    let gateway = start_gateway(AppConfig::default()).await;
    let clinic_a = TenantId::new("clinic-a");
    let clinic_b = TenantId::new("clinic-b");
    gateway
        .backend
        .insert("patients", &clinic_a, json!([{ "id": "pa-1" }]));
    gateway
        .backend
        .insert("patients", &clinic_b, json!([{ "id": "pb-1" }]));

    // Populate both tenants' entries.
    assert_eq!(
        get_envelope(&gateway, "tok-a", "/patients").await["cached"],
        false
    );
    assert_eq!(
        get_envelope(&gateway, "tok-b", "/patients").await["cached"],
        false
    );
    wait_for_subscription(&gateway, &clinic_a, "patients").await;
    wait_for_subscription(&gateway, &clinic_b, "patients").await;

    let delivered = gateway
        .feed
        .publish(&clinic_a, ChangeEvent::new(ChangeKind::Update, "patients"));
    assert!(delivered > 0);

    let key_a = CacheStore::resource_key("/patients", &clinic_a);
    let key_b = CacheStore::resource_key("/patients", &clinic_b);
    wait_for_eviction(&gateway, &key_a).await;
    assert!(gateway.state.cache.get(&key_b).is_some());

    // Clinic A refetches from the backend, clinic B stays cached.
    assert_eq!(
        get_envelope(&gateway, "tok-a", "/patients").await["cached"],
        false
    );
    assert_eq!(
        get_envelope(&gateway, "tok-b", "/patients").await["cached"],
        true
    );
}

#[tokio::test]
async fn change_event_evicts_only_the_matching_table() {
    let gateway = start_gateway(AppConfig::default()).await;
    let clinic_a = TenantId::new("clinic-a");
    gateway
        .backend
        .insert("patients", &clinic_a, json!([{ "id": "pa-1" }]));
    gateway
        .backend
        .insert("appointments", &clinic_a, json!([{ "id": "ap-1" }]));

    get_envelope(&gateway, "tok-a", "/patients").await;
    get_envelope(&gateway, "tok-a", "/appointments").await;
    wait_for_subscription(&gateway, &clinic_a, "appointments").await;

    gateway
        .feed
        .publish(&clinic_a, ChangeEvent::new(ChangeKind::Insert, "appointments"));

    let appointments_key = CacheStore::resource_key("/appointments", &clinic_a);
    let patients_key = CacheStore::resource_key("/patients", &clinic_a);
    wait_for_eviction(&gateway, &appointments_key).await;
    assert!(gateway.state.cache.get(&patients_key).is_some());
}

#[tokio::test]
async fn invalidated_read_repopulates_with_fresh_data() {
    let gateway = start_gateway(AppConfig::default()).await;
    let clinic_a = TenantId::new("clinic-a");
    gateway
        .backend
        .insert("patients", &clinic_a, json!([{ "id": "pa-1", "name": "Ada" }]));

    let body = get_envelope(&gateway, "tok-a", "/patients").await;
    assert_eq!(body["data"][0]["name"], "Ada");
    wait_for_subscription(&gateway, &clinic_a, "patients").await;

    // The backend row changes and the change feed announces it.
    gateway
        .backend
        .insert("patients", &clinic_a, json!([{ "id": "pa-1", "name": "Grace" }]));
    gateway
        .feed
        .publish(&clinic_a, ChangeEvent::new(ChangeKind::Update, "patients"));
    wait_for_eviction(&gateway, &CacheStore::resource_key("/patients", &clinic_a)).await;

    let body = get_envelope(&gateway, "tok-a", "/patients").await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["data"][0]["name"], "Grace");

    let body = get_envelope(&gateway, "tok-a", "/patients").await;
    assert_eq!(body["cached"], true);
    assert_eq!(body["data"][0]["name"], "Grace");
}

#[tokio::test]
async fn config_update_round_trip() {
    let gateway = start_gateway(AppConfig::default()).await;
    let clinic_a = TenantId::new("clinic-a");
    gateway.backend.insert(
        "architecture_configs",
        &clinic_a,
        json!({ "id": "cfg-1", "mode": "edge" }),
    );

    let body = get_envelope(&gateway, "tok-a", "/architecture/config").await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["data"]["mode"], "edge");
    assert_eq!(
        get_envelope(&gateway, "tok-a", "/architecture/config").await["cached"],
        true
    );
    wait_for_subscription(&gateway, &clinic_a, "architecture_configs").await;

    gateway.backend.insert(
        "architecture_configs",
        &clinic_a,
        json!({ "id": "cfg-1", "mode": "origin" }),
    );
    gateway.feed.publish(
        &clinic_a,
        ChangeEvent::new(ChangeKind::Update, "architecture_configs"),
    );
    wait_for_eviction(
        &gateway,
        &CacheStore::resource_key("/architecture/config", &clinic_a),
    )
    .await;

    let body = get_envelope(&gateway, "tok-a", "/architecture/config").await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["data"]["mode"], "origin");
}

#[tokio::test]
async fn entries_age_out_without_any_event() {
    let mut config = AppConfig::default();
    config.cache.default_ttl_secs = 1;
    let gateway = start_gateway(config).await;
    let clinic_a = TenantId::new("clinic-a");
    gateway
        .backend
        .insert("patients", &clinic_a, json!([{ "id": "pa-1" }]));

    assert_eq!(
        get_envelope(&gateway, "tok-a", "/patients").await["cached"],
        false
    );
    assert_eq!(
        get_envelope(&gateway, "tok-a", "/patients").await["cached"],
        true
    );

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(
        get_envelope(&gateway, "tok-a", "/patients").await["cached"],
        false
    );
}

#[tokio::test]
async fn one_subscription_per_tracked_table() {
    let gateway = start_gateway(AppConfig::default()).await;
    let clinic_a = TenantId::new("clinic-a");

    // Several requests race the same tenant's subscription setup.
    for _ in 0..3 {
        get_envelope(&gateway, "tok-a", "/patients").await;
    }
    wait_for_subscription(&gateway, &clinic_a, "patients").await;

    let tracked_tables = clinigate_core::TRACKED_RESOURCES.len();
    for _ in 0..200 {
        if gateway.state.registry.subscription_count(&clinic_a) == tracked_tables {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        gateway.state.registry.subscription_count(&clinic_a),
        tracked_tables
    );
}
