//! User-facing copy. Localization happens outside the crate; these are the
//! English source strings.

use crate::weather::UsageSnapshot;

pub const CITY_PROMPT: &str = "Let's set the weather! 🌦\n\nWrite the name of the city or send your coordinates:";
pub const CITY_REPROMPT: &str = "Write the name of the city or send your coordinates:";
pub const SHARE_LOCATION: &str = "📍 Send my location";
pub const SELECT_CITY: &str = "🏙 Select the desired city:";
pub const ANOTHER_CITY: &str = "🔙 Choose another city";
pub const CITY_NOT_FOUND: &str =
    "❌ I couldn't find a single city!\n\nTry changing the name of the city:";
pub const SETUP_ERROR: &str =
    "⚠️ Something went wrong while searching for the city.\n\nPlease try again:";
pub const SELECT_UNITS: &str = "🌡 Choose units of temperature measurement:";
pub const FORECAST_UNAVAILABLE: &str =
    "🌥 The forecast is temporarily unavailable. It will arrive with the next update.";
pub const SETUP_COMPLETE: &str = "🌥 <code>The weather setup is complete.\n\nThe data will be updated automatically every 3 hours.</code>";
pub const DATA_DELETED: &str = "❌ All of your data has been deleted";
pub const ABOUT: &str = "🤖 Weather bot: pick a city once and get a fresh forecast every 3 hours.\n\nSend /start to set it up again or /stop to delete your data.";

pub fn stats(users: i64, usage: &UsageSnapshot) -> String {
    format!(
        "ℹ️ <b>Statistics:</b>\n\n\
         • Since the beginning of the month,\n  <b>{percent} %</b> of requests have been spent:\n  \
         <b>{used}</b> out of <b>{quota}</b>\n\n\
         • Users in the database: <b>{users}</b>",
        percent = usage.percent,
        used = group_thousands(usage.requests.max(0) as u64),
        quota = group_thousands(usage.quota),
    )
}

/// `1000000` -> `1 000 000`.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}
