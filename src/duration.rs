//! Duration-like value parsing.
//!
//! Step config and the runtime config both accept durations in three shapes:
//! a serialized `std::time::Duration` (`{"secs": 30, "nanos": 0}`), a humantime
//! string (`"30s"`, `"2m"`, `"1h 30m"`) or a bare integer interpreted as seconds.

use std::time::Duration;

use serde_json::Value;

/// Parse a duration-like JSON value.
pub fn parse_duration_value(value: &Value) -> Result<Duration, String> {
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_u64() {
                Ok(Duration::from_secs(secs))
            } else if let Some(secs) = n.as_f64().filter(|s| s.is_finite() && *s >= 0.0) {
                Duration::try_from_secs_f64(secs).map_err(|e| format!("duration out of range: {}: {}", n, e))
            } else {
                Err(format!("negative or invalid duration: {}", n))
            }
        }
        Value::String(s) => parse_duration_str(s),
        Value::Object(map) => {
            let secs = map
                .get("secs")
                .and_then(Value::as_u64)
                .ok_or_else(|| "duration object is missing 'secs'".to_string())?;
            let nanos = map.get("nanos").and_then(Value::as_u64).unwrap_or(0);
            let nanos = u32::try_from(nanos)
                .ok()
                .filter(|n| *n < 1_000_000_000)
                .ok_or_else(|| format!("nanos out of range: {}", nanos))?;
            Ok(Duration::new(secs, nanos))
        }
        other => Err(format!("not a duration: {}", other)),
    }
}

/// Parse a duration string: bare digits are seconds, anything else goes through humantime.
pub fn parse_duration_str(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| format!("invalid duration '{}': {}", trimmed, e));
    }
    humantime::parse_duration(trimmed).map_err(|e| format!("invalid duration '{}': {}", trimmed, e))
}

/// Render a duration for logs and step output.
pub fn format_duration(duration: Duration) -> String {
    // Drop sub-millisecond noise so "1m 30s 12ms 345us" reads as "1m 30s 12ms".
    let rounded = Duration::from_millis(duration.as_millis() as u64);
    humantime::format_duration(rounded).to_string()
}

/// Serde adapter for `Duration` fields in YAML/JSON config.
pub mod serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        super::parse_duration_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` fields.
pub mod serde_opt_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => super::parse_duration_value(&v)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_integer_is_seconds() {
        assert_eq!(parse_duration_value(&json!(45)).unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration_value(&json!("45")).unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_humantime_strings() {
        assert_eq!(parse_duration_value(&json!("30s")).unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration_value(&json!("2m")).unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration_value(&json!("1h 30m")).unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration_value(&json!("500ms")).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_native_duration_object() {
        let native = serde_json::to_value(Duration::from_millis(1500)).unwrap();
        assert_eq!(parse_duration_value(&native).unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_fractional_seconds() {
        assert_eq!(parse_duration_value(&json!(1.5)).unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_duration_value(&json!("soon")).is_err());
        assert!(parse_duration_value(&json!("")).is_err());
        assert!(parse_duration_value(&json!(-3)).is_err());
        assert!(parse_duration_value(&json!(true)).is_err());
        assert!(parse_duration_value(&json!({"nanos": 5})).is_err());
    }

    #[test]
    fn test_out_of_range_values_are_errors() {
        assert!(parse_duration_value(&json!(1e300)).is_err());
        assert!(parse_duration_value(&json!({"secs": u64::MAX, "nanos": 1_500_000_000u64})).is_err());
        assert_eq!(
            parse_duration_value(&json!(u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_format_duration_drops_micros() {
        let d = Duration::from_micros(90_012_345);
        assert_eq!(format_duration(d), "1m 30s 12ms");
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    struct Holder {
        #[serde(with = "serde_duration")]
        interval: Duration,
        #[serde(default, with = "serde_opt_duration")]
        timeout: Option<Duration>,
    }

    #[test]
    fn test_serde_adapters_from_yaml() {
        let holder: Holder = serde_yaml::from_str("interval: 10\ntimeout: 5m\n").unwrap();
        assert_eq!(holder.interval, Duration::from_secs(10));
        assert_eq!(holder.timeout, Some(Duration::from_secs(300)));

        let holder: Holder = serde_yaml::from_str("interval: 1m\n").unwrap();
        assert_eq!(holder.interval, Duration::from_secs(60));
        assert_eq!(holder.timeout, None);
    }

    #[test]
    fn test_serde_adapters_serialize_humantime() {
        let holder = Holder {
            interval: Duration::from_secs(90),
            timeout: None,
        };
        let json = serde_json::to_value(&holder).unwrap();
        assert_eq!(json["interval"], "1m 30s");
        assert!(json["timeout"].is_null());
    }
}
