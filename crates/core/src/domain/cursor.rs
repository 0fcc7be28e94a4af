// Cursor and cache policy value objects

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque resumption marker into a backend's batch stream.
///
/// Only the backend that produced a cursor knows how to interpret it; the core
/// compares cursors for equality and stores them, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage key for a position in the stream (`""` is the start of the stream).
pub fn cursor_key(cursor: Option<&Cursor>) -> &str {
    cursor.map(Cursor::as_str).unwrap_or("")
}

/// Inverse of [`cursor_key`].
pub fn cursor_from_key(key: &str) -> Option<Cursor> {
    if key.is_empty() {
        None
    } else {
        Some(Cursor::new(key))
    }
}

/// How a job interacts with the raw-data cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Serve cached batches first, fetch the rest and cache it
    Use,
    /// Drop the repository's cache, then fetch everything and cache it again
    Refresh,
    /// Neither read nor write the cache
    Disable,
}

impl CachePolicy {
    /// Policy applied when the schedule request does not name one
    pub fn default_for(cache_enabled: bool) -> Self {
        if cache_enabled {
            CachePolicy::Use
        } else {
            CachePolicy::Disable
        }
    }

    pub fn reads_cache(self) -> bool {
        matches!(self, CachePolicy::Use)
    }

    pub fn writes_cache(self) -> bool {
        !matches!(self, CachePolicy::Disable)
    }
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachePolicy::Use => write!(f, "use"),
            CachePolicy::Refresh => write!(f, "refresh"),
            CachePolicy::Disable => write!(f, "disable"),
        }
    }
}

impl FromStr for CachePolicy {
    type Err = crate::domain::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "use" => Ok(CachePolicy::Use),
            "refresh" => Ok(CachePolicy::Refresh),
            "disable" => Ok(CachePolicy::Disable),
            other => Err(crate::domain::DomainError::Validation(format!(
                "unknown cache policy: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_key_roundtrip_for_stream_start() {
        assert_eq!(cursor_key(None), "");
        assert_eq!(cursor_from_key(""), None);

        let cursor = Cursor::new("abc123");
        assert_eq!(cursor_from_key(cursor_key(Some(&cursor))), Some(cursor));
    }

    #[test]
    fn test_cache_policy_defaults_follow_repository_flag() {
        assert_eq!(CachePolicy::default_for(true), CachePolicy::Use);
        assert_eq!(CachePolicy::default_for(false), CachePolicy::Disable);
    }

    #[test]
    fn test_cache_policy_read_write_matrix() {
        assert!(CachePolicy::Use.reads_cache());
        assert!(CachePolicy::Use.writes_cache());
        assert!(!CachePolicy::Refresh.reads_cache());
        assert!(CachePolicy::Refresh.writes_cache());
        assert!(!CachePolicy::Disable.reads_cache());
        assert!(!CachePolicy::Disable.writes_cache());
    }

    #[test]
    fn test_cache_policy_parse() {
        assert_eq!("refresh".parse::<CachePolicy>().unwrap(), CachePolicy::Refresh);
        assert!("sometimes".parse::<CachePolicy>().is_err());
    }
}
