//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Every three hours on the hour, UTC (sec min hour dom month dow).
pub const DEFAULT_BROADCAST_SCHEDULE: &str = "0 0 */3 * * *";

/// Free-tier request allowance of the weather provider.
pub const DEFAULT_MONTHLY_REQUEST_QUOTA: u64 = 1_000_000;

/// Onboarding dialog settings.
#[derive(Debug, Clone)]
pub struct DialogConfig {
    /// How long the "setup complete" confirmation stays visible.
    pub confirmation_delay: Duration,
    /// How long the opt-out notice stays visible.
    pub stop_notice_delay: Duration,
    /// Free-text city queries are cut to this many characters.
    pub max_city_query_len: usize,
    /// Candidate names are cut to this many characters inside the
    /// selection token (the platform limits tokens to 64 bytes).
    pub max_candidate_name_len: usize,
    /// Image attached to every dialog prompt.
    pub logo_path: PathBuf,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            confirmation_delay: Duration::from_secs(15),
            stop_notice_delay: Duration::from_secs(5),
            max_city_query_len: 72,
            max_candidate_name_len: 35,
            logo_path: PathBuf::from("assets/bot_logo.png"),
        }
    }
}

impl DialogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            confirmation_delay: Duration::from_secs(env_or(
                "WEATHER_BOT_CONFIRMATION_DELAY_SECS",
                defaults.confirmation_delay.as_secs(),
            )?),
            stop_notice_delay: Duration::from_secs(env_or(
                "WEATHER_BOT_STOP_NOTICE_DELAY_SECS",
                defaults.stop_notice_delay.as_secs(),
            )?),
            max_city_query_len: defaults.max_city_query_len,
            max_candidate_name_len: defaults.max_candidate_name_len,
            logo_path: std::env::var("WEATHER_BOT_LOGO_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.logo_path),
        })
    }
}

/// Periodic broadcast settings.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Cron expression for the broadcast trigger, evaluated in UTC.
    pub schedule: String,
    /// Upper bound on recipients processed at the same time.
    pub max_concurrent_deliveries: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_BROADCAST_SCHEDULE.to_string(),
            max_concurrent_deliveries: 4,
        }
    }
}

impl BroadcastConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let schedule = std::env::var("WEATHER_BOT_BROADCAST_SCHEDULE")
            .unwrap_or(defaults.schedule);
        cron::Schedule::from_str(&schedule).map_err(|e| ConfigError::InvalidValue {
            key: "WEATHER_BOT_BROADCAST_SCHEDULE".into(),
            message: e.to_string(),
        })?;

        let max_concurrent_deliveries: usize = env_or(
            "WEATHER_BOT_MAX_CONCURRENT_DELIVERIES",
            defaults.max_concurrent_deliveries,
        )?;
        if max_concurrent_deliveries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WEATHER_BOT_MAX_CONCURRENT_DELIVERIES".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            schedule,
            max_concurrent_deliveries,
        })
    }
}

/// Connection settings for the weather gateway.
#[derive(Debug, Clone)]
pub struct WeatherServiceConfig {
    pub base_url: String,
    pub api_token: SecretString,
    /// Directory for per-user forecast images.
    pub artifact_dir: PathBuf,
    /// Shared image used when a forecast cannot be rendered. Never deleted.
    pub default_artifact: PathBuf,
    pub request_timeout: Duration,
}

impl WeatherServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = std::env::var("WEATHER_BOT_WEATHER_API_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("WEATHER_BOT_WEATHER_API_TOKEN".into()))?;

        Ok(Self {
            base_url: std::env::var("WEATHER_BOT_WEATHER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            api_token: SecretString::from(api_token),
            artifact_dir: std::env::var("WEATHER_BOT_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("weather-bot")),
            default_artifact: std::env::var("WEATHER_BOT_LOGO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets/bot_logo.png")),
            request_timeout: Duration::from_secs(env_or("WEATHER_BOT_WEATHER_TIMEOUT_SECS", 10)?),
        })
    }
}

/// Administrative access.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Platform user ids allowed to run `/stats`.
    pub admin_ids: Vec<i64>,
    /// Port for the admin HTTP endpoint.
    pub http_port: u16,
    /// Weather API requests allowed per calendar month, shown in the
    /// statistics.
    pub monthly_request_quota: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            admin_ids: Vec::new(),
            http_port: 8080,
            monthly_request_quota: DEFAULT_MONTHLY_REQUEST_QUOTA,
        }
    }
}

impl AdminConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_ids = std::env::var("WEATHER_BOT_ADMIN_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                    key: "WEATHER_BOT_ADMIN_IDS".into(),
                    message: format!("{s}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            admin_ids,
            http_port: env_or("WEATHER_BOT_ADMIN_PORT", 8080)?,
            monthly_request_quota: env_or(
                "WEATHER_BOT_MONTHLY_REQUEST_QUOTA",
                DEFAULT_MONTHLY_REQUEST_QUOTA,
            )?,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

/// Full bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub dialog: DialogConfig,
    pub broadcast: BroadcastConfig,
    pub weather: WeatherServiceConfig,
    pub admin: AdminConfig,
    pub db_path: PathBuf,
    /// When set, logs are also written to a daily file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Load everything from `WEATHER_BOT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            dialog: DialogConfig::from_env()?,
            broadcast: BroadcastConfig::from_env()?,
            weather: WeatherServiceConfig::from_env()?,
            admin: AdminConfig::from_env()?,
            db_path: std::env::var("WEATHER_BOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/weather-bot.db")),
            log_dir: std::env::var("WEATHER_BOT_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Read and parse an environment variable, falling back to `default` when
/// it is unset.
fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
