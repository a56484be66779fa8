//! ISO-8601 timestamp serialization for payment gate wire types.
//!
//! Challenge expiries and receipt timestamps travel as RFC 3339 strings
//! inside headers and base64url-encoded JSON. Chrono's default serde output
//! varies its sub-second precision with the value, which breaks the
//! bit-exact header comparisons the codec guarantees, so these helpers pin
//! the format to millisecond precision with a `Z` suffix:
//!
//! ```json
//! "2025-06-01T12:00:00.000Z"
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Renders a timestamp in the gate's canonical RFC 3339 form.
#[must_use]
pub fn to_canonical(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp into UTC.
///
/// # Errors
///
/// Returns a [`chrono::ParseError`] if the input is not valid RFC 3339.
pub fn from_canonical(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Serde helpers for `DateTime<Utc>` fields in canonical form.
///
/// Use with `#[serde(with = "crate::timestamp::iso8601")]`.
pub mod iso8601 {
    use super::{DateTime, Deserialize, Deserializer, Serializer, Utc, from_canonical,
                to_canonical};

    /// Serializes a timestamp as a canonical RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_canonical(ts))
    }

    /// Deserializes a canonical RFC 3339 string into a UTC timestamp.
    ///
    /// # Errors
    ///
    /// Fails if the string is not valid RFC 3339.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        from_canonical(&s).map_err(serde::de::Error::custom)
    }
}
