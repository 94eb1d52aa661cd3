//! `updatedAt` markers and their ordering.
//!
//! Markers travel as ISO-8601 strings. Ordering is decided on the parsed
//! instant at full precision, never on the string, so markers written
//! with different offsets or precisions still compare correctly. The raw
//! string is kept so that an applied marker can be persisted verbatim.

use chrono::{DateTime, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::fmt;

/// A parsed `updatedAt` marker.
#[derive(Debug, Clone)]
pub struct Timestamp {
    instant: DateTime<Utc>,
    raw: String,
}

impl Timestamp {
    /// Parses an RFC 3339 string. Returns `None` for anything unusable.
    pub fn parse(raw: &str) -> Option<Self> {
        let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
        Some(Self {
            instant: parsed.with_timezone(&Utc),
            raw: raw.to_string(),
        })
    }

    /// Returns the current time as a marker.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            instant: now,
            raw: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// The instant in UTC, at full precision.
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// Milliseconds since the Unix epoch, truncated.
    pub fn millis(&self) -> i64 {
        self.instant.timestamp_millis()
    }

    /// The string exactly as it was received.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant.cmp(&other.instant)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Current UTC time in the fixed `YYYY-MM-DDTHH:MM:SS.mmmZ` form.
pub fn now_iso() -> String {
    Timestamp::now().raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_utc_markers() {
        let ts = Timestamp::parse("2024-01-02T00:00:00Z").unwrap();
        assert_eq!(ts.millis(), 1_704_153_600_000);
        assert_eq!(ts.as_str(), "2024-01-02T00:00:00Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Timestamp::parse("").is_none());
        assert!(Timestamp::parse("yesterday").is_none());
        assert!(Timestamp::parse("2024-13-01T00:00:00Z").is_none());
    }

    #[test]
    fn compares_instants_not_strings() {
        // Lexically "01:00+01:00" > "00:30Z", but it is the earlier instant.
        let offset = Timestamp::parse("2024-01-01T01:00:00+01:00").unwrap();
        let utc = Timestamp::parse("2024-01-01T00:30:00Z").unwrap();
        assert!(utc > offset);
    }

    #[test]
    fn mixed_precision_compares_equal() {
        let a = Timestamp::parse("2024-01-01T00:00:00Z").unwrap();
        let b = Timestamp::parse("2024-01-01T00:00:00.000Z").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn sub_millisecond_markers_are_ordered() {
        let earlier = Timestamp::parse("2024-01-01T00:00:00.000100Z").unwrap();
        let later = Timestamp::parse("2024-01-01T00:00:00.000900Z").unwrap();
        assert!(later > earlier);
        assert_ne!(later, earlier);
        assert_eq!(later.millis(), earlier.millis());
    }

    #[test]
    fn now_is_parseable() {
        let now = now_iso();
        assert!(now.ends_with('Z'));
        assert!(Timestamp::parse(&now).is_some());
    }
}
