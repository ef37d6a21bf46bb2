//! Duration parsing and serde codecs for confd-rs.
//!
//! confd-rs's external interfaces (CLI flags, TOML fields, environment
//! variables) all accept durations in the same compact grammar: an integer
//! magnitude immediately followed by a unit suffix — `500ms`, `30s`, `5m`,
//! `1h`. No combined forms like `1h30m`; callers that need finer control
//! just pick a smaller unit.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a string doesn't match the `<n><unit>` grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDurationError(String);

impl fmt::Display for ParseDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid duration {:?}: expected `<n>(ns|us|ms|s|m|h)`", self.0)
    }
}

impl std::error::Error for ParseDurationError {}

/// Parse a `<n>(ns|us|ms|s|m|h)` string into a [`Duration`].
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let trimmed = input.trim();
    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ParseDurationError(input.to_string()))?;
    let (digits, unit) = trimmed.split_at(split_at);
    if digits.is_empty() {
        return Err(ParseDurationError(input.to_string()));
    }
    let magnitude: u64 = digits
        .parse()
        .map_err(|_| ParseDurationError(input.to_string()))?;
    let duration = match unit {
        "ns" => Duration::from_nanos(magnitude),
        "us" => Duration::from_micros(magnitude),
        "ms" => Duration::from_millis(magnitude),
        "s" => Duration::from_secs(magnitude),
        "m" => Duration::from_secs(magnitude.saturating_mul(60)),
        "h" => Duration::from_secs(magnitude.saturating_mul(3600)),
        _ => return Err(ParseDurationError(input.to_string())),
    };
    Ok(duration)
}

/// Render a [`Duration`] back into the shortest exact `<n><unit>` form it
/// fits, falling back to milliseconds when it isn't a whole number of
/// seconds/minutes/hours.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    let secs = d.as_secs();
    if d.subsec_nanos() == 0 {
        if secs % 3600 == 0 {
            return format!("{}h", secs / 3600);
        }
        if secs % 60 == 0 {
            return format!("{}m", secs / 60);
        }
        return format!("{secs}s");
    }
    format!("{}ms", d.as_millis())
}

/// A `Duration` newtype with the confd-rs serde grammar, for use as a TOML
/// field type: `#[serde(default)] timeout: ConfdDuration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfdDuration(pub Duration);

impl ConfdDuration {
    pub fn get(self) -> Duration {
        self.0
    }
}

impl From<Duration> for ConfdDuration {
    fn from(d: Duration) -> Self {
        ConfdDuration(d)
    }
}

impl Serialize for ConfdDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for ConfdDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s)
            .map(ConfdDuration)
            .map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "confd_duration::as_duration")]` helper for fields typed
/// directly as `std::time::Duration`.
pub mod as_duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(default, with = "confd_duration::as_duration_opt")]` helper for
/// `Option<std::time::Duration>` fields.
pub mod as_duration_opt {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| parse_duration(&s).map_err(serde::de::Error::custom)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("10ns").unwrap(), Duration::from_nanos(10));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn rejects_combined_or_malformed_forms() {
        assert!(parse_duration("1h30m").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn format_round_trips_whole_units() {
        for s in ["1h", "5m", "30s"] {
            let d = parse_duration(s).unwrap();
            assert_eq!(format_duration(d), s);
        }
    }

    #[test]
    fn toml_field_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            timeout: ConfdDuration,
        }
        let w = Wrapper { timeout: Duration::from_secs(30).into() };
        let s = toml::to_string(&w).unwrap();
        let back: Wrapper = toml::from_str(&s).unwrap();
        assert_eq!(back.timeout.get(), Duration::from_secs(30));
    }

    #[test]
    fn optional_duration_field_round_trips_present_and_absent() {
        #[derive(serde::Serialize, serde::Deserialize, Default)]
        struct Wrapper {
            #[serde(default, with = "as_duration_opt")]
            timeout: Option<Duration>,
        }

        let present = Wrapper { timeout: Some(Duration::from_millis(500)) };
        let s = serde_json::to_string(&present).unwrap();
        let back: Wrapper = serde_json::from_str(&s).unwrap();
        assert_eq!(back.timeout, Some(Duration::from_millis(500)));

        let absent = Wrapper { timeout: None };
        let s = serde_json::to_string(&absent).unwrap();
        let back: Wrapper = serde_json::from_str(&s).unwrap();
        assert_eq!(back.timeout, None);
    }

    proptest::proptest! {
        #[test]
        fn prop_seconds_round_trip(secs in 0u64..100_000) {
            let s = format!("{secs}s");
            let d = parse_duration(&s).unwrap();
            proptest::prop_assert_eq!(d, Duration::from_secs(secs));
        }
    }
}
