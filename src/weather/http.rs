//! HTTP client for the weather gateway.
//!
//! The gateway does the geocoding, rendering, and provider parsing; this
//! client only speaks its small JSON contract:
//!
//! - `GET /v1/cities?q=..&lang=..` or `?lat=..&lon=..&lang=..` returns
//!   `{"cities": [CityCandidate]}`
//! - `GET /v1/forecast.png?lat=..&lon=..&units=..&lang=..` returns a PNG
//! - `GET /v1/conditions?lat=..&lon=..&units=..&lang=..` returns
//!   [`CurrentConditions`]

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::WeatherServiceConfig;
use crate::error::WeatherError;
use crate::model::EnrolledUser;
use crate::weather::format::{CurrentConditions, format_current_conditions};
use crate::weather::usage::ApiUsage;
use crate::weather::{CityCandidate, CityQuery, ForecastArtifact, WeatherService};

#[derive(Debug, Deserialize)]
struct CitiesResponse {
    #[serde(default)]
    cities: Vec<CityCandidate>,
}

/// [`WeatherService`] backed by the weather gateway.
pub struct HttpWeatherService {
    config: WeatherServiceConfig,
    client: reqwest::Client,
    usage: Option<ApiUsage>,
}

impl HttpWeatherService {
    pub fn new(config: WeatherServiceConfig) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            usage: None,
        })
    }

    /// Count every gateway request in `usage`.
    pub fn with_usage(mut self, usage: ApiUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn location_params(user: &EnrolledUser) -> [(&'static str, String); 4] {
        [
            ("lat", user.latitude.to_string()),
            ("lon", user.longitude.to_string()),
            ("units", user.units.as_str().to_string()),
            ("lang", user.lang.clone()),
        ]
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response, WeatherError> {
        if let Some(usage) = &self.usage {
            usage.record().await;
        }
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.config.api_token.expose_secret())
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }

    async fn download_forecast(&self, user: &EnrolledUser) -> Result<ForecastArtifact, WeatherError> {
        let bytes = self
            .get("/v1/forecast.png", &Self::location_params(user))
            .await?
            .bytes()
            .await?;
        if bytes.is_empty() {
            return Err(WeatherError::InvalidResponse {
                reason: "empty forecast image".into(),
            });
        }

        tokio::fs::create_dir_all(&self.config.artifact_dir).await?;
        let path = self
            .config
            .artifact_dir
            .join(format!("forecast_{}_{}.png", user.id, uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &bytes).await?;
        Ok(ForecastArtifact::temporary(path))
    }
}

#[async_trait]
impl WeatherService for HttpWeatherService {
    async fn lookup_cities(
        &self,
        query: &CityQuery,
        lang: &str,
    ) -> Result<Vec<CityCandidate>, WeatherError> {
        let mut params = vec![("lang", lang.to_string())];
        match query {
            CityQuery::Name(name) => params.push(("q", name.clone())),
            CityQuery::Location {
                latitude,
                longitude,
            } => {
                params.push(("lat", latitude.to_string()));
                params.push(("lon", longitude.to_string()));
            }
        }

        let body: CitiesResponse = self
            .get("/v1/cities", &params)
            .await?
            .json()
            .await
            .map_err(|e| WeatherError::InvalidResponse {
                reason: e.to_string(),
            })?;
        tracing::debug!(count = body.cities.len(), "City lookup returned");
        Ok(body.cities)
    }

    async fn forecast_artifact(&self, user: &EnrolledUser) -> Result<ForecastArtifact, WeatherError> {
        match self.download_forecast(user).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                tracing::warn!(user_id = %user.id, "Forecast image unavailable, using default: {e}");
                Ok(ForecastArtifact::shared(&self.config.default_artifact))
            }
        }
    }

    async fn current_conditions_text(&self, user: &EnrolledUser) -> Result<String, WeatherError> {
        let conditions: CurrentConditions = self
            .get("/v1/conditions", &Self::location_params(user))
            .await?
            .json()
            .await
            .map_err(|e| WeatherError::InvalidResponse {
                reason: e.to_string(),
            })?;
        Ok(format_current_conditions(&conditions, user.units, &user.city))
    }
}
