//! Go-notation durations (`"100ms"`, `"5m"`, `"1h30m"`) as used on the wire
//! and in environment configuration.

use std::time::Duration;

use crate::errors::ChronodError;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a Go-style duration string into a [`Duration`].
///
/// Accepts a sequence of decimal numbers with unit suffixes: `ns`, `us`,
/// `ms`, `s`, `m`, `h`. Fractions are allowed (`"1.5h"`). A bare `"0"` is
/// accepted; any other unitless number is rejected.
pub fn parse_go(s: &str) -> Result<Duration, ChronodError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ChronodError::Validation("empty duration".to_string()));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let bytes = s.as_bytes();
    let mut i = 0;
    let mut total_secs: f64 = 0.0;

    while i < bytes.len() {
        let num_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
            i += 1;
        }
        if i == num_start {
            return Err(ChronodError::Validation(format!(
                "invalid duration '{}': expected a number",
                s
            )));
        }
        let value: f64 = s[num_start..i].parse().map_err(|_| {
            ChronodError::Validation(format!("invalid duration '{}': bad number", s))
        })?;

        let unit_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_digit() {
            i += 1;
        }
        let multiplier = match &s[unit_start..i] {
            "ns" => 1e-9,
            "us" | "\u{b5}s" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            unit => {
                return Err(ChronodError::Validation(format!(
                    "invalid duration '{}': unknown unit '{}'",
                    s, unit
                )))
            }
        };
        total_secs += value * multiplier;
    }

    Ok(Duration::from_secs_f64(total_secs))
}

/// Format a [`Duration`] in Go notation, omitting zero components
/// (`"1h30m"`, `"100ms"`). A zero duration formats as `"0s"`.
pub fn format_go(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    let total = d.as_nanos();
    let hours = total / (3600 * NANOS_PER_SEC);
    let mins = (total / (60 * NANOS_PER_SEC)) % 60;
    let secs = (total / NANOS_PER_SEC) % 60;
    let millis = (total / 1_000_000) % 1_000;
    let micros = (total / 1_000) % 1_000;
    let nanos = total % 1_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if mins > 0 {
        out.push_str(&format!("{}m", mins));
    }
    if secs > 0 {
        out.push_str(&format!("{}s", secs));
    }
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }
    if micros > 0 {
        out.push_str(&format!("{}us", micros));
    }
    if nanos > 0 {
        out.push_str(&format!("{}ns", nanos));
    }
    out
}

/// Serde adapter for `Option<Duration>` fields carried as Go-notation strings.
pub mod option_go {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&super::format_go(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        opt.map(|s| super::parse_go(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for `Option<Option<Duration>>` patch fields:
/// absent = leave unchanged, `null` = clear, string = set.
pub mod double_option_go {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Option<Duration>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(Some(d)) => serializer.serialize_some(&super::format_go(*d)),
            _ => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<Duration>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => super::parse_go(&s)
                .map(|d| Some(Some(d)))
                .map_err(serde::de::Error::custom),
            None => Ok(Some(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_go("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_go("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_go("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_go("45s").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_go("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_go("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_go("1h2m3s").unwrap(),
            Duration::from_secs(3600 + 120 + 3)
        );
    }

    #[test]
    fn test_parse_fractional() {
        assert_eq!(parse_go("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_go("0.5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_zero() {
        assert_eq!(parse_go("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_go("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_missing_unit() {
        assert!(parse_go("10").is_err());
        assert!(parse_go("1h30").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_go("").is_err());
        assert!(parse_go("abc").is_err());
        assert!(parse_go("5 minutes").is_err());
    }

    #[test]
    fn test_format_simple() {
        assert_eq!(format_go(Duration::from_millis(100)), "100ms");
        assert_eq!(format_go(Duration::from_secs(300)), "5m");
        assert_eq!(format_go(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_go(Duration::ZERO), "0s");
    }

    #[test]
    fn test_roundtrip() {
        for s in ["100ms", "5m", "1h30m", "2h", "45s", "1m30s"] {
            let d = parse_go(s).unwrap();
            assert_eq!(format_go(d), s, "roundtrip of {}", s);
        }
    }
}
