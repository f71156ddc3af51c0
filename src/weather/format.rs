//! Input sanitizing and human-readable weather captions.

use serde::{Deserialize, Serialize};

use crate::model::UnitSystem;

/// Keep letters, hyphens, and single spaces from the first `max_len`
/// characters of a free-text city query. Surrounding whitespace is
/// dropped.
pub fn sanitize_city_query(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_len.saturating_mul(4)));
    for c in raw.chars().take(max_len) {
        if c.is_alphabetic() || c == '-' {
            out.push(c);
        } else if c.is_whitespace() && !out.is_empty() && !out.ends_with(' ') {
            out.push(' ');
        }
    }
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out
}

/// Emoji for an OpenWeather-style condition code.
pub fn weather_emoji(code: u16) -> &'static str {
    match code {
        800 => "☀️",
        801 => "🌤",
        802 => "☁️",
        803 | 804 => "🌥",
        500..=504 => "🌦",
        300..=321 | 520..=531 => "🌧",
        200..=232 => "⛈",
        511 | 600..=622 => "🌨",
        701..=781 => "🌫",
        _ => "🌀",
    }
}

/// Dew point by the Magnus formula, rounded to a whole degree.
///
/// `temp` and the result are in the same scale the constants assume
/// (Celsius); callers with Fahrenheit data convert around this.
pub fn dew_point(temp: f64, humidity: u8) -> i32 {
    const A: f64 = 17.27;
    const B: f64 = 237.7;
    let humidity = f64::from(humidity.clamp(1, 100)) / 100.0;
    let gamma = (A * temp) / (B + temp) + humidity.ln();
    ((B * gamma) / (A - gamma)).round() as i32
}

/// Current conditions as served by the weather gateway, already in the
/// user's units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temp: i32,
    pub feels_like: i32,
    pub weather_code: u16,
    pub description: String,
    pub wind_speed: i32,
    #[serde(default)]
    pub gust: Option<i32>,
    pub humidity: u8,
    pub pressure: i32,
    #[serde(default)]
    pub visibility: Option<f64>,
    #[serde(default)]
    pub precipitation: Option<f64>,
    /// Local observation time, preformatted.
    pub time: String,
    pub sunrise: String,
    pub sunset: String,
}

struct UnitLabels {
    temp: &'static str,
    wind: &'static str,
    precipitation: &'static str,
    visibility: &'static str,
}

fn labels(units: UnitSystem) -> UnitLabels {
    match units {
        UnitSystem::Metric => UnitLabels {
            temp: "°C",
            wind: "m/s",
            precipitation: "mm",
            visibility: "km",
        },
        UnitSystem::Imperial => UnitLabels {
            temp: "°F",
            wind: "mph",
            precipitation: "in",
            visibility: "mi",
        },
    }
}

fn dew_point_in(units: UnitSystem, temp: i32, humidity: u8) -> i32 {
    match units {
        UnitSystem::Metric => dew_point(f64::from(temp), humidity),
        UnitSystem::Imperial => {
            let celsius = (f64::from(temp) - 32.0) * 5.0 / 9.0;
            let dew_c = dew_point(celsius, humidity);
            (f64::from(dew_c) * 9.0 / 5.0 + 32.0).round() as i32
        }
    }
}

/// Render the caption sent with every forecast image (HTML markup).
pub fn format_current_conditions(
    conditions: &CurrentConditions,
    units: UnitSystem,
    city: &str,
) -> String {
    let l = labels(units);
    let emoji = weather_emoji(conditions.weather_code);
    let dew = dew_point_in(units, conditions.temp, conditions.humidity);

    let precipitation = match conditions.precipitation {
        Some(p) if p > 0.0 => format!(
            ", <b>{p} {}</b> of precipitation in one hour",
            l.precipitation
        ),
        _ => String::new(),
    };
    let gust = match conditions.gust {
        Some(g) if g > 0 => format!(", gusts to: <b>{g} {}</b>", l.wind),
        _ => String::new(),
    };
    let visibility = match conditions.visibility {
        Some(v) if v > 0.0 => format!("🌫️ Visibility: <b>{v} {}</b>\n\n", l.visibility),
        _ => String::new(),
    };

    format!(
        "<b>{city}, {time}</b>\n\
         {emoji} {description}{precipitation}\n\n\
         🌡 <b>{temp}{t}</b>, feels like <b>{feels}{t}</b>\n\n\
         💦 Humidity: <b>{humidity}%</b>, Dew point: <b>{dew}{t}</b>\n\
         💨 Wind speed: <b>{wind} {w}</b>{gust}\n\
         🌡 Pressure: <b>{pressure} hPa</b>\n\
         {visibility}\
         🌅 Sunrise: <b>{sunrise}</b>  🌇 Sunset: <b>{sunset}</b>",
        time = conditions.time,
        description = conditions.description,
        temp = conditions.temp,
        feels = conditions.feels_like,
        t = l.temp,
        humidity = conditions.humidity,
        wind = conditions.wind_speed,
        w = l.wind,
        pressure = conditions.pressure,
        sunrise = conditions.sunrise,
        sunset = conditions.sunset,
    )
}
