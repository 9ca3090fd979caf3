//! Serde helpers for loosely typed remote payloads.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

/// Deserialize an optional field that remote APIs send either as a JSON
/// string or as a number (`"42.5"` vs `42.5`).
pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Int(i) => i.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
        }),
    )
}

/// Parse a decimal price string; empty or malformed input yields `None`.
pub fn parse_price(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite())
}

/// Format a price the way store APIs expect it (`"129.00"`).
pub fn format_price(price: f64) -> String {
    format!("{price:.2}")
}
