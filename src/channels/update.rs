//! Inbound updates, already decoded by the transport.

use std::sync::LazyLock;

use regex::Regex;

use crate::channels::markup::CallbackData;
use crate::model::{MessageId, UserId};

/// `/name` optionally addressed to a bot (`/start@WeatherBot`), with
/// trailing arguments ignored.
static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([A-Za-z0-9_]+)(?:@[A-Za-z0-9_]+)?(?:\s.*)?$").expect("command regex is valid")
});

/// One event from a user's private chat.
#[derive(Debug, Clone)]
pub struct Update {
    pub user_id: UserId,
    /// IETF language tag reported by the client, if any.
    pub lang_code: Option<String>,
    /// The user's own message, for text and location updates.
    pub message_id: Option<MessageId>,
    pub payload: UpdatePayload,
}

#[derive(Debug, Clone)]
pub enum UpdatePayload {
    Text(String),
    Location { latitude: f64, longitude: f64 },
    Callback { query_id: String, data: String },
    /// Stickers, photos, voice notes and anything else the bot ignores.
    Other,
}

/// Bot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    About,
    Stats,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        let caps = COMMAND_RE.captures(text.trim())?;
        match caps.get(1)?.as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "about" => Some(Self::About),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

/// What an update means to the dialog.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(Command),
    CityName(String),
    Coordinates { latitude: f64, longitude: f64 },
    Button(CallbackData),
    /// Unknown commands, unknown callback tokens and non-text messages.
    Unrecognized,
}

impl Update {
    pub fn text(user_id: UserId, message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            lang_code: None,
            message_id: Some(message_id),
            payload: UpdatePayload::Text(text.into()),
        }
    }

    pub fn location(user_id: UserId, message_id: MessageId, latitude: f64, longitude: f64) -> Self {
        Self {
            user_id,
            lang_code: None,
            message_id: Some(message_id),
            payload: UpdatePayload::Location {
                latitude,
                longitude,
            },
        }
    }

    pub fn callback(user_id: UserId, query_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            user_id,
            lang_code: None,
            message_id: None,
            payload: UpdatePayload::Callback {
                query_id: query_id.into(),
                data: data.into(),
            },
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang_code = Some(lang.into());
        self
    }

    /// Language to store for this user; defaults to English.
    pub fn lang(&self) -> &str {
        self.lang_code.as_deref().unwrap_or("en")
    }

    /// The callback query id, for button presses.
    pub fn callback_query_id(&self) -> Option<&str> {
        match &self.payload {
            UpdatePayload::Callback { query_id, .. } => Some(query_id),
            _ => None,
        }
    }

    /// Classify the update.
    pub fn input(&self) -> Input {
        match &self.payload {
            UpdatePayload::Text(text) if text.trim_start().starts_with('/') => {
                Command::parse(text).map_or(Input::Unrecognized, Input::Command)
            }
            UpdatePayload::Text(text) => Input::CityName(text.clone()),
            UpdatePayload::Location {
                latitude,
                longitude,
            } => Input::Coordinates {
                latitude: *latitude,
                longitude: *longitude,
            },
            UpdatePayload::Callback { data, .. } => {
                CallbackData::parse(data).map_or(Input::Unrecognized, Input::Button)
            }
            UpdatePayload::Other => Input::Unrecognized,
        }
    }
}
