//! Admin REST endpoints served on a random port.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;

use common::{memory_store, seed_enrolled};
use weather_bot::admin::{AdminRouteState, admin_routes};
use weather_bot::model::UserId;
use weather_bot::store::{LibSqlBackend, UserStore};
use weather_bot::weather::ApiUsage;
use weather_bot::weather::usage::month_key;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(store: Arc<LibSqlBackend>) -> SocketAddr {
    let usage = ApiUsage::new(store.clone(), 1_000_000);
    let app = admin_routes(AdminRouteState { store, usage });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn get_json(addr: SocketAddr, path: &str) -> (u16, Value) {
    let response = tokio::time::timeout(
        TEST_TIMEOUT,
        reqwest::get(format!("http://{addr}{path}")),
    )
    .await
    .expect("request timed out")
    .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let addr = start_server(memory_store().await).await;
    let (status, body) = get_json(addr, "/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn stats_start_at_zero() {
    let addr = start_server(memory_store().await).await;
    let (status, body) = get_json(addr, "/api/stats").await;
    assert_eq!(status, 200);
    assert_eq!(body["users"], 0);
    assert_eq!(body["api_requests"]["requests"], 0);
    assert_eq!(body["api_requests"]["quota"], 1_000_000);
    assert_eq!(body["api_requests"]["percent"], 0);
}

#[tokio::test]
async fn stats_report_this_months_api_requests() {
    let store = memory_store().await;
    let month = month_key(chrono::Utc::now());
    for _ in 0..6_000 {
        store.increase_api_counter(&month).await.unwrap();
    }
    store.increase_api_counter("1999.01").await.unwrap();

    let addr = start_server(store).await;
    let (status, body) = get_json(addr, "/api/stats").await;
    assert_eq!(status, 200);
    assert_eq!(body["api_requests"]["month"], month.as_str());
    assert_eq!(body["api_requests"]["requests"], 6_000);
    assert_eq!(body["api_requests"]["percent"], 1);
}

#[tokio::test]
async fn stats_count_every_stored_user() {
    let store = memory_store().await;
    seed_enrolled(&store, 1, None).await;
    seed_enrolled(&store, 2, Some(20)).await;
    // Mid-onboarding rows count too.
    store.create_or_reset_user(UserId(3)).await.unwrap();

    let addr = start_server(store.clone()).await;
    let (_, body) = get_json(addr, "/api/stats").await;
    assert_eq!(body["users"], 3);

    store.delete_user(UserId(1)).await.unwrap();
    let (_, body) = get_json(addr, "/api/stats").await;
    assert_eq!(body["users"], 2);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let addr = start_server(memory_store().await).await;
    let response = reqwest::get(format!("http://{addr}/api/users"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
