//! Reply markup attached to dialog prompts, and the callback tokens its
//! buttons carry.
//!
//! Rendering to platform keyboards is the transport's job; this module only
//! describes which buttons exist and what they send back.

use crate::model::UnitSystem;
use crate::weather::CityCandidate;

/// The platform rejects callback tokens longer than this.
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

const PICK_CITY_PREFIX: &str = "data=";
const UNITS_PREFIX: &str = "units=";
const ANOTHER_CITY: &str = "another_city";

/// Payload carried by an inline button.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackData {
    /// A city from the selection list, coordinates included so the pick
    /// survives a restart.
    PickCity {
        latitude: f64,
        longitude: f64,
        name: String,
    },
    /// Escape hatch back to the city prompt.
    AnotherCity,
    Units(UnitSystem),
}

impl CallbackData {
    /// Serialize to the wire token.
    ///
    /// City names are cut so the token fits [`MAX_CALLBACK_DATA_BYTES`].
    pub fn encode(&self) -> String {
        match self {
            Self::PickCity {
                latitude,
                longitude,
                name,
            } => {
                let head = format!("{PICK_CITY_PREFIX}{latitude}&{longitude}&");
                let budget = MAX_CALLBACK_DATA_BYTES.saturating_sub(head.len());
                format!("{head}{}", truncate_bytes(name, budget))
            }
            Self::AnotherCity => ANOTHER_CITY.to_string(),
            Self::Units(UnitSystem::Metric) => format!("{UNITS_PREFIX}c"),
            Self::Units(UnitSystem::Imperial) => format!("{UNITS_PREFIX}f"),
        }
    }

    /// Parse a wire token. Unknown or malformed tokens yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == ANOTHER_CITY {
            return Some(Self::AnotherCity);
        }
        if let Some(unit) = raw.strip_prefix(UNITS_PREFIX) {
            return match unit {
                "c" => Some(Self::Units(UnitSystem::Metric)),
                "f" => Some(Self::Units(UnitSystem::Imperial)),
                _ => None,
            };
        }
        let rest = raw.strip_prefix(PICK_CITY_PREFIX)?;
        let mut parts = rest.splitn(3, '&');
        let latitude: f64 = parts.next()?.parse().ok()?;
        let longitude: f64 = parts.next()?.parse().ok()?;
        let name = parts.next()?.trim();
        if name.is_empty()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return None;
        }
        Some(Self::PickCity {
            latitude,
            longitude,
            name: name.to_string(),
        })
    }
}

/// An inline button.
#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub data: CallbackData,
}

/// Markup attached to an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    /// One-time reply keyboard with a single "share location" button.
    RequestLocation { label: String },
    /// Inline keyboard, one inner `Vec` per row.
    Inline { rows: Vec<Vec<Button>> },
}

impl Markup {
    pub fn request_location(label: impl Into<String>) -> Self {
        Self::RequestLocation {
            label: label.into(),
        }
    }

    /// One row per candidate, then the "choose another city" row.
    ///
    /// Candidate names are cut to `max_name_len` characters before they go
    /// into the token.
    pub fn city_selection(
        candidates: &[CityCandidate],
        max_name_len: usize,
        another_label: impl Into<String>,
    ) -> Self {
        let mut rows: Vec<Vec<Button>> = candidates
            .iter()
            .map(|city| {
                vec![Button {
                    label: city.display_name.clone(),
                    data: CallbackData::PickCity {
                        latitude: city.latitude,
                        longitude: city.longitude,
                        name: truncate_chars(&city.name, max_name_len),
                    },
                }]
            })
            .collect();
        rows.push(vec![Button {
            label: another_label.into(),
            data: CallbackData::AnotherCity,
        }]);
        Self::Inline { rows }
    }

    pub fn unit_selection() -> Self {
        Self::Inline {
            rows: vec![vec![
                Button {
                    label: UnitSystem::Metric.temperature_label().to_string(),
                    data: CallbackData::Units(UnitSystem::Metric),
                },
                Button {
                    label: UnitSystem::Imperial.temperature_label().to_string(),
                    data: CallbackData::Units(UnitSystem::Imperial),
                },
            ]],
        }
    }
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
