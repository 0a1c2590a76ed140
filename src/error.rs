//! Crate-level error type.
//!
//! Every fallible operation in the crate returns [`Result<T>`]. The variants
//! follow how far a failure is allowed to travel:
//!
//! - [`ReadStatusError::Auth`] ends the session.
//! - [`ReadStatusError::Fetch`] ends the session while loading, and is dropped
//!   at the handler boundary once the session is ready.
//! - [`ReadStatusError::LookupMiss`] means a space could not be resolved even
//!   after a point fetch; the event that needed it is dropped.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReadStatusError>;

#[derive(Debug, Error)]
pub enum ReadStatusError {
    /// Credentials were rejected or the identity lookup failed.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// A query against the collaboration service failed.
    #[error("fetch of {what} failed: {detail}")]
    Fetch { what: String, detail: String },

    /// A space id was not indexed and the fallback point fetch failed too.
    #[error("space {id} not found: {detail}")]
    LookupMiss { id: String, detail: String },

    /// An event envelope could not be decoded into a known event.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The real-time transport failed (connect, handshake, closed stream).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ReadStatusError {
    pub fn fetch(what: impl Into<String>, detail: impl ToString) -> Self {
        ReadStatusError::Fetch {
            what: what.into(),
            detail: detail.to_string(),
        }
    }
}

impl From<serde_json::Error> for ReadStatusError {
    fn from(e: serde_json::Error) -> Self {
        ReadStatusError::MalformedEvent(e.to_string())
    }
}

impl From<toml::de::Error> for ReadStatusError {
    fn from(e: toml::de::Error) -> Self {
        ReadStatusError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_display_names_target_and_detail() {
        let err = ReadStatusError::fetch("memberships", "HTTP 503");
        let s = err.to_string();
        assert!(s.contains("memberships"), "{s}");
        assert!(s.contains("HTTP 503"), "{s}");
    }

    #[test]
    fn lookup_miss_display_contains_id() {
        let err = ReadStatusError::LookupMiss {
            id: "room-9".to_string(),
            detail: "404".to_string(),
        };
        assert!(err.to_string().contains("room-9"));
    }

    #[test]
    fn serde_error_converts_to_malformed_event() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ReadStatusError = parse.unwrap_err().into();
        assert!(matches!(err, ReadStatusError::MalformedEvent(_)));
    }
}
