//! User records and identifiers shared by the dialog, the broadcast, and
//! the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Platform user id. Every conversation is a private chat, so this is
/// also the chat id messages are sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform message id within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Measurement units for forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }

    pub fn temperature_label(&self) -> &'static str {
        match self {
            Self::Metric => "°C",
            Self::Imperial => "°F",
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            other => Err(format!("unknown unit system: {other}")),
        }
    }
}

/// A row in the users table.
///
/// Everything except `id` can be cleared by an onboarding restart.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub dialog_message_id: Option<MessageId>,
    pub lang: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub units: Option<UnitSystem>,
    /// Persisted `AwaitingCityName` marker.
    pub awaiting_city: bool,
}

impl User {
    /// A fresh row with nothing but an id.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            dialog_message_id: None,
            lang: None,
            city: None,
            latitude: None,
            longitude: None,
            units: None,
            awaiting_city: false,
        }
    }

    /// The single enrollment rule: a user receives broadcasts iff a unit
    /// preference is stored. Keep in sync with
    /// [`crate::store::ENROLLED_PREDICATE`].
    pub fn is_enrolled(&self) -> bool {
        self.units.is_some()
    }

    /// Whether a city has been picked (coordinates included).
    pub fn has_location(&self) -> bool {
        self.city.is_some() && self.latitude.is_some() && self.longitude.is_some()
    }

    /// Project an enrolled row into the data a broadcast needs.
    ///
    /// Returns `None` for users that are not enrolled or whose location is
    /// incomplete.
    pub fn enrolled(&self) -> Option<EnrolledUser> {
        if !self.is_enrolled() {
            return None;
        }
        Some(EnrolledUser {
            id: self.id,
            dialog_message_id: self.dialog_message_id,
            lang: self.lang.clone().unwrap_or_else(|| "en".to_string()),
            city: self.city.clone()?,
            latitude: self.latitude?,
            longitude: self.longitude?,
            units: self.units?,
        })
    }
}

/// A broadcast recipient with a complete configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledUser {
    pub id: UserId,
    pub dialog_message_id: Option<MessageId>,
    pub lang: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub units: UnitSystem,
}
