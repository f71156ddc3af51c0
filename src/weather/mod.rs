//! Weather service contract: city lookup, forecast images, and current
//! conditions text.

pub mod format;
pub mod http;
pub mod usage;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WeatherError;
use crate::model::EnrolledUser;

pub use http::HttpWeatherService;
pub use usage::{ApiUsage, UsageSnapshot};

/// What the user gave us to find a city.
#[derive(Debug, Clone, PartialEq)]
pub enum CityQuery {
    /// Sanitized free text.
    Name(String),
    Location { latitude: f64, longitude: f64 },
}

/// A lookup result offered to the user for selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityCandidate {
    pub name: String,
    /// Name with country and state, shown on the button.
    pub display_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A forecast image on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastArtifact {
    pub path: PathBuf,
    /// Shared assets (the default logo) are never deleted.
    pub shared: bool,
}

impl ForecastArtifact {
    /// A per-user temporary file, removed by [`release`](Self::release).
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shared: false,
        }
    }

    pub fn shared(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shared: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file if it is per-user. A file that is already gone is
    /// fine; other failures are logged.
    pub async fn release(&self) {
        if self.shared {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to remove forecast artifact: {e}");
            }
        }
    }
}

/// Retrieval and geocoding backend.
#[async_trait]
pub trait WeatherService: Send + Sync {
    /// Candidates matching the query. No match is an empty `Vec`, not an
    /// error.
    async fn lookup_cities(
        &self,
        query: &CityQuery,
        lang: &str,
    ) -> Result<Vec<CityCandidate>, WeatherError>;

    /// Forecast image for the user's location and units.
    async fn forecast_artifact(&self, user: &EnrolledUser) -> Result<ForecastArtifact, WeatherError>;

    /// Current conditions caption for the user's location and units.
    async fn current_conditions_text(&self, user: &EnrolledUser) -> Result<String, WeatherError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_removes_temporary_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("forecast_1.png");
        let shared_path = dir.path().join("logo.png");
        std::fs::write(&temp_path, b"png").unwrap();
        std::fs::write(&shared_path, b"png").unwrap();

        ForecastArtifact::temporary(&temp_path).release().await;
        ForecastArtifact::shared(&shared_path).release().await;

        assert!(!temp_path.exists());
        assert!(shared_path.exists());
    }

    #[tokio::test]
    async fn release_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        ForecastArtifact::temporary(dir.path().join("never_written.png"))
            .release()
            .await;
    }
}
