//! Error taxonomy shared by every component that talks to the wiki API.
//!
//! Callers need to tell "server unreachable" apart from "server replied with
//! something we could not use", and both apart from credential rejections and
//! local validation failures. Each case is a distinct [`ApiError`] variant so
//! the decision (retry, re-login, fix the input) can be made by matching.

use thiserror::Error;

/// Maximum number of characters of a response body kept in a [`ApiError::Decode`].
pub const BODY_SAMPLE_CHARS: usize = 200;

/// Error codes in a MediaWiki error envelope that mean "your credentials or
/// token were rejected" rather than "the request was malformed".
const AUTH_ERROR_CODES: &[&str] = &[
    "badtoken",
    "notloggedin",
    "assertuserfailed",
    "assertnameduserfailed",
    "permissiondenied",
    "mustbeloggedin",
];

/// Result alias used across the library.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the client, token, search and upload layers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a usable HTTP response (connection refused,
    /// timeout, TLS failure, non-success status).
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered, but not with the shape the endpoint expects.
    #[error("unexpected response from {endpoint} ({reason}): {body_sample}")]
    Decode {
        endpoint: String,
        body_sample: String,
        reason: String,
    },

    /// Login or token rejection. `reason` is the server's human-readable
    /// message when one was provided.
    #[error("authentication failed: {reason}")]
    Auth {
        code: Option<String>,
        reason: String,
    },

    /// Local validation failed before any network call was made.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl ApiError {
    pub fn auth(code: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Auth {
            code: code.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub(crate) fn decode(
        endpoint: &str,
        body: &serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        Self::Decode {
            endpoint: endpoint.to_string(),
            body_sample: body_sample(&body.to_string()),
            reason: reason.into(),
        }
    }

    /// True when the server rejected the CSRF token itself, meaning a fresh
    /// token may make the same request succeed.
    pub fn is_bad_token(&self) -> bool {
        matches!(self, Self::Auth { code: Some(code), .. } if code == "badtoken")
    }

    /// Classify a MediaWiki `{"error": {"code", "info"}}` envelope.
    pub(crate) fn from_envelope(
        endpoint: &str,
        code: &str,
        info: &str,
        body: &serde_json::Value,
    ) -> Self {
        if AUTH_ERROR_CODES.contains(&code) {
            Self::auth(Some(code), info)
        } else {
            Self::decode(endpoint, body, format!("api error '{}': {}", code, info))
        }
    }
}

/// Truncate a raw body to at most [`BODY_SAMPLE_CHARS`] characters.
pub fn body_sample(raw: &str) -> String {
    match raw.char_indices().nth(BODY_SAMPLE_CHARS) {
        Some((cut, _)) => format!("{}...", &raw[..cut]),
        None => raw.to_string(),
    }
}
