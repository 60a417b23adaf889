use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};
use store::{PersistenceConfig, Store};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use configs::AppConfig;
use server::routes::{self, AppState};
use server::{startup, Protocol};

struct TestApp {
    base_url: String,
    store: Arc<Store>,
}

async fn start_server(store: Arc<Store>, auth_key: Option<&str>) -> anyhow::Result<TestApp> {
    let state = AppState::new(Arc::clone(&store), auth_key.map(str::to_string));
    let app = routes::build_router(state, CorsLayer::very_permissive());
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr: SocketAddr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("server error: {e}");
        }
    });

    Ok(TestApp { base_url: format!("http://{addr}"), store })
}

async fn memory_app() -> anyhow::Result<TestApp> {
    start_server(Store::new(PersistenceConfig::memory()), None).await
}

fn tmp_file() -> PathBuf {
    std::env::temp_dir().join(format!("kvstore-http-{}.json", Uuid::new_v4()))
}

#[tokio::test]
async fn health_reports_key_count() -> anyhow::Result<()> {
    let app = memory_app().await?;
    app.store.create("a", json!(1)).await?;

    let res = reqwest::get(format!("{}/health", app.base_url)).await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body, json!({"status": "ok", "keys": 1}));
    Ok(())
}

#[tokio::test]
async fn create_read_update_delete_cycle() -> anyhow::Result<()> {
    let app = memory_app().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/", app.base_url))
        .json(&json!({"key": "user", "value": {"name": "ann"}}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .post(format!("{}/", app.base_url))
        .json(&json!({"key": "user", "value": 2}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], "key already exists: user");

    let body: Value = client.get(format!("{}/user", app.base_url)).send().await?.json().await?;
    assert_eq!(body, json!({"key": "user", "value": {"name": "ann"}}));

    let res = client
        .patch(format!("{}/", app.base_url))
        .json(&json!({"key": "user", "value": "bob"}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(app.store.read("user").await?, json!("bob"));

    let res = client
        .patch(format!("{}/", app.base_url))
        .json(&json!({"key": "ghost", "value": 1}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(format!("{}/user", app.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let res = client.get(format!("{}/user", app.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn malformed_bodies_are_rejected() -> anyhow::Result<()> {
    let app = memory_app().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/", app.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/", app.base_url))
        .json(&json!({"key": "  ", "value": 1}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn multi_key_reads_and_deletes() -> anyhow::Result<()> {
    let app = memory_app().await?;
    let client = reqwest::Client::new();
    app.store.create("a", json!(1)).await?;
    app.store.create("b", json!(2)).await?;

    let body: Value = client.get(format!("{}/b,a,zz", app.base_url)).send().await?.json().await?;
    assert_eq!(
        body,
        json!([
            {"key": "b", "value": 2},
            {"key": "a", "value": 1},
            {"key": "zz", "value": null}
        ])
    );

    let res = client.delete(format!("{}/a,zz", app.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body: Value = res.json().await?;
    assert_eq!(
        body,
        json!([
            {"key": "a", "value": {"deleted": true}},
            {"key": "zz", "value": {"error": "key not found"}}
        ])
    );

    let res = client.delete(format!("{}/x,y", app.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let body: Value = client.get(format!("{}/", app.base_url)).send().await?.json().await?;
    assert_eq!(body, json!([{"key": "b", "value": 2}]));
    Ok(())
}

#[tokio::test]
async fn auth_key_guards_everything_but_health() -> anyhow::Result<()> {
    let app = start_server(Store::new(PersistenceConfig::memory()), Some("s3cret")).await?;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/health", app.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(format!("{}/", app.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/", app.base_url))
        .header("Authorization", "wrong")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/", app.base_url))
        .header("Authorization", "s3cret")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/metrics", app.base_url))
        .header("Authorization", "Bearer s3cret")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.text().await?.contains("kvstore_operations_total"));
    Ok(())
}

#[tokio::test]
async fn writes_reach_disk_after_disconnect() -> anyhow::Result<()> {
    let path = tmp_file();
    let store = Store::new(PersistenceConfig::file(&path));
    store.connect().await?;
    let app = start_server(store, None).await?;

    let res = reqwest::Client::new()
        .post(format!("{}/", app.base_url))
        .json(&json!({"key": "k", "value": [1, 2, 3]}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);

    app.store.disconnect().await?;
    let on_disk: Value = serde_json::from_slice(&tokio::fs::read(&path).await?)?;
    assert_eq!(on_disk, json!({"k": [1, 2, 3]}));

    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}

#[tokio::test]
async fn bad_certificate_aborts_before_the_store_connects() -> anyhow::Result<()> {
    let path = tmp_file();
    let mut cfg = AppConfig::default();
    cfg.server.port = 0;
    cfg.server.certificate = Some("/nonexistent/kvstore-cert.pem".into());
    cfg.server.private_key = Some("/nonexistent/kvstore-key.pem".into());
    cfg.storage.location = path.to_string_lossy().into_owned();

    let err = startup::run_until(cfg, Protocol::Http, std::future::ready(()))
        .await
        .expect_err("startup must fail without certificate files");
    assert!(format!("{err:#}").contains("load TLS certificate"));
    assert!(!path.exists());
    Ok(())
}
