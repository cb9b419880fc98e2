//! Time primitives.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

pub type Timestamp = DateTime<Utc>;

/// Parses the timestamp shapes upstream sources emit.
///
/// Accepted: RFC 3339, `YYYY-MM-DD HH:MM:SS` (assumed UTC), `YYYY-MM-DD`
/// (midnight UTC) and integer epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&t));
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t));
    }
    raw.parse::<i64>().ok().and_then(from_epoch_ms)
}

pub fn from_epoch_ms(ms: i64) -> Option<Timestamp> {
    Utc.timestamp_millis_opt(ms).single()
}

/// `deserialize_with` helper: unparseable or missing timestamps become `None`
/// instead of failing the whole record.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => parse_timestamp(&s),
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(from_epoch_ms),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_timestamp;

    #[test]
    fn parses_common_upstream_shapes() {
        let a = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let b = parse_timestamp("2024-05-01 10:00:00").unwrap();
        let c = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);

        let d = parse_timestamp("2024-05-01").unwrap();
        assert!(d < a);

        let e = parse_timestamp(&a.timestamp_millis().to_string()).unwrap();
        assert_eq!(e, a);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
