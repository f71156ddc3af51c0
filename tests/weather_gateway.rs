//! `HttpWeatherService` against a stub gateway on a random port.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use secrecy::SecretString;
use tokio::net::TcpListener;

use weather_bot::config::WeatherServiceConfig;
use weather_bot::error::WeatherError;
use weather_bot::model::{EnrolledUser, UnitSystem, UserId};
use weather_bot::store::{LibSqlBackend, UserStore};
use weather_bot::weather::usage::month_key;
use weather_bot::weather::{ApiUsage, CityQuery, HttpWeatherService, WeatherService};

const TOKEN: &str = "gateway-token";
const PNG: &[u8] = b"\x89PNG\r\n\x1a\nforecast";

#[derive(Default)]
struct Gateway {
    broken_forecast: AtomicBool,
    requests: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl Gateway {
    fn record(&self, path: &str, params: &HashMap<String, String>) {
        self.requests
            .lock()
            .unwrap()
            .push((path.to_string(), params.clone()));
    }

    fn last_params(&self, path: &str) -> HashMap<String, String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, params)| params.clone())
            .unwrap_or_default()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn cities(
    State(gw): State<Arc<Gateway>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    gw.record("/v1/cities", &params);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let lang = params.get("lang").cloned().unwrap_or_default();
    let cities = match params.get("q").map(String::as_str) {
        Some("paris") => serde_json::json!([{
            "name": "Paris",
            "display_name": format!("Paris, FR ({lang})"),
            "latitude": 48.8566,
            "longitude": 2.3522,
        }]),
        Some("boom") => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Some(_) => serde_json::json!([]),
        None => serde_json::json!([{
            "name": "Somewhere",
            "display_name": "Somewhere, XX",
            "latitude": params.get("lat").and_then(|v| v.parse::<f64>().ok()),
            "longitude": params.get("lon").and_then(|v| v.parse::<f64>().ok()),
        }]),
    };
    Json(serde_json::json!({ "cities": cities })).into_response()
}

async fn forecast(
    State(gw): State<Arc<Gateway>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    gw.record("/v1/forecast.png", &params);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if gw.broken_forecast.load(Ordering::SeqCst) {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], PNG.to_vec()).into_response()
}

async fn conditions(
    State(gw): State<Arc<Gateway>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    gw.record("/v1/conditions", &params);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({
        "temp": 21,
        "feels_like": 19,
        "weather_code": 800,
        "description": "Clear sky",
        "wind_speed": 3,
        "humidity": 60,
        "pressure": 1013,
        "time": "14:00",
        "sunrise": "06:12",
        "sunset": "20:41",
    }))
    .into_response()
}

async fn start_gateway() -> (SocketAddr, Arc<Gateway>) {
    let gw = Arc::new(Gateway::default());
    let app = Router::new()
        .route("/v1/cities", get(cities))
        .route("/v1/forecast.png", get(forecast))
        .route("/v1/conditions", get(conditions))
        .with_state(gw.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, gw)
}

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), b"logo").unwrap();
        Self { dir }
    }

    fn artifact_dir(&self) -> PathBuf {
        self.dir.path().join("forecasts")
    }

    fn default_artifact(&self) -> PathBuf {
        self.dir.path().join("logo.png")
    }

    fn service(&self, base_url: String, token: &str) -> HttpWeatherService {
        HttpWeatherService::new(WeatherServiceConfig {
            base_url,
            api_token: SecretString::from(token.to_string()),
            artifact_dir: self.artifact_dir(),
            default_artifact: self.default_artifact(),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }
}

fn paris_user() -> EnrolledUser {
    EnrolledUser {
        id: UserId(42),
        dialog_message_id: None,
        lang: "fr".into(),
        city: "Paris".into(),
        latitude: 48.8566,
        longitude: 2.3522,
        units: UnitSystem::Metric,
    }
}

#[tokio::test]
async fn lookup_by_name_passes_language() {
    let (addr, gw) = start_gateway().await;
    let fx = Fixture::new();
    let service = fx.service(format!("http://{addr}/"), TOKEN);

    let cities = service
        .lookup_cities(&CityQuery::Name("paris".into()), "fr")
        .await
        .unwrap();

    assert_eq!(cities.len(), 1);
    assert_eq!(cities[0].name, "Paris");
    assert_eq!(cities[0].display_name, "Paris, FR (fr)");
    assert_eq!(gw.last_params("/v1/cities").get("q").unwrap(), "paris");
}

#[tokio::test]
async fn lookup_by_location_sends_coordinates() {
    let (addr, gw) = start_gateway().await;
    let fx = Fixture::new();
    let service = fx.service(format!("http://{addr}"), TOKEN);

    let cities = service
        .lookup_cities(
            &CityQuery::Location {
                latitude: 51.5,
                longitude: -0.12,
            },
            "en",
        )
        .await
        .unwrap();

    assert_eq!(cities[0].name, "Somewhere");
    assert_eq!(cities[0].latitude, 51.5);
    assert_eq!(cities[0].longitude, -0.12);
    let params = gw.last_params("/v1/cities");
    assert!(!params.contains_key("q"));
    assert_eq!(params.get("lang").unwrap(), "en");
}

#[tokio::test]
async fn no_match_is_an_empty_list() {
    let (addr, _) = start_gateway().await;
    let fx = Fixture::new();
    let service = fx.service(format!("http://{addr}"), TOKEN);

    let cities = service
        .lookup_cities(&CityQuery::Name("atlantis".into()), "en")
        .await
        .unwrap();
    assert!(cities.is_empty());
}

#[tokio::test]
async fn gateway_errors_map_to_status() {
    let (addr, _) = start_gateway().await;
    let fx = Fixture::new();

    let err = fx
        .service(format!("http://{addr}"), TOKEN)
        .lookup_cities(&CityQuery::Name("boom".into()), "en")
        .await
        .unwrap_err();
    assert!(matches!(err, WeatherError::Status { status: 500 }));

    let err = fx
        .service(format!("http://{addr}"), "wrong-token")
        .lookup_cities(&CityQuery::Name("paris".into()), "en")
        .await
        .unwrap_err();
    assert!(matches!(err, WeatherError::Status { status: 401 }));
}

#[tokio::test]
async fn unreachable_gateway_is_a_request_failure() {
    let fx = Fixture::new();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fx
        .service(format!("http://{addr}"), TOKEN)
        .lookup_cities(&CityQuery::Name("paris".into()), "en")
        .await
        .unwrap_err();
    assert!(matches!(err, WeatherError::RequestFailed { .. }));
}

#[tokio::test]
async fn forecast_is_written_to_a_temporary_file() {
    let (addr, gw) = start_gateway().await;
    let fx = Fixture::new();
    let service = fx.service(format!("http://{addr}"), TOKEN);

    let artifact = service.forecast_artifact(&paris_user()).await.unwrap();

    assert!(!artifact.shared);
    assert!(artifact.path().starts_with(fx.artifact_dir()));
    assert_eq!(std::fs::read(artifact.path()).unwrap(), PNG);
    let params = gw.last_params("/v1/forecast.png");
    assert_eq!(params.get("units").unwrap(), "metric");
    assert_eq!(params.get("lang").unwrap(), "fr");

    artifact.release().await;
    assert!(!artifact.path().exists());
}

#[tokio::test]
async fn each_forecast_gets_its_own_file() {
    let (addr, _) = start_gateway().await;
    let fx = Fixture::new();
    let service = fx.service(format!("http://{addr}"), TOKEN);

    let first = service.forecast_artifact(&paris_user()).await.unwrap();
    let second = service.forecast_artifact(&paris_user()).await.unwrap();
    assert_ne!(first.path(), second.path());
}

#[tokio::test]
async fn broken_forecast_falls_back_to_the_shared_image() {
    let (addr, gw) = start_gateway().await;
    gw.broken_forecast.store(true, Ordering::SeqCst);
    let fx = Fixture::new();
    let service = fx.service(format!("http://{addr}"), TOKEN);

    let artifact = service.forecast_artifact(&paris_user()).await.unwrap();

    assert!(artifact.shared);
    assert_eq!(artifact.path(), fx.default_artifact());
    artifact.release().await;
    assert!(fx.default_artifact().exists(), "shared image must survive release");
}

#[tokio::test]
async fn conditions_are_rendered_as_caption() {
    let (addr, _) = start_gateway().await;
    let fx = Fixture::new();
    let service = fx.service(format!("http://{addr}"), TOKEN);

    let caption = service
        .current_conditions_text(&paris_user())
        .await
        .unwrap();

    assert!(caption.starts_with("<b>Paris, 14:00</b>"));
    assert!(caption.contains("Clear sky"));
    assert!(caption.contains("<b>21°C</b>, feels like <b>19°C</b>"));
    assert!(caption.contains("Humidity: <b>60%</b>"));
    assert!(!caption.contains("Visibility"));
}

#[tokio::test]
async fn every_gateway_request_is_counted_for_the_month() {
    let (addr, gw) = start_gateway().await;
    gw.broken_forecast.store(true, Ordering::SeqCst);
    let fx = Fixture::new();
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let service = fx
        .service(format!("http://{addr}"), TOKEN)
        .with_usage(ApiUsage::new(store.clone(), 1_000_000));

    service
        .lookup_cities(&CityQuery::Name("paris".into()), "en")
        .await
        .unwrap();
    // Failed responses still spend quota.
    let artifact = service.forecast_artifact(&paris_user()).await.unwrap();
    artifact.release().await;
    service
        .current_conditions_text(&paris_user())
        .await
        .unwrap();

    let month = month_key(chrono::Utc::now());
    assert_eq!(store.get_api_counter_value(&month).await.unwrap(), 3);
}
