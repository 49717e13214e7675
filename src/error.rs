//! Error taxonomy for the build pipeline.
//!
//! One variant per failure kind the build pipeline can produce. Registry
//! status codes and transport failures are mapped onto these variants at
//! the edges (see `registry::client` and `http`); the executor never has
//! to inspect raw HTTP status codes itself.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, PusherError>;

#[derive(Debug, thiserror::Error)]
pub enum PusherError {
    #[error("invalid image reference '{0}'")]
    Reference(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("authorization denied: {0}")]
    Authorization(String),

    #[error("registry protocol error: {0}")]
    RegistryProtocol(String),

    #[error("no manifest entry for platform {architecture}/{os}")]
    PlatformMismatch { architecture: String, os: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("cache corrupted at {path}: {message}")]
    CacheCorrupted { path: PathBuf, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("request cannot be retried: body already consumed")]
    NonRetryableRequest,

    #[error("invalid build plan: {0}")]
    InvalidBuildPlan(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for PusherError {
    fn from(err: std::io::Error) -> Self {
        PusherError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PusherError {
    fn from(err: serde_json::Error) -> Self {
        PusherError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for PusherError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            PusherError::Transport(err.to_string())
        } else {
            PusherError::RegistryProtocol(err.to_string())
        }
    }
}

impl From<url::ParseError> for PusherError {
    fn from(err: url::ParseError) -> Self {
        PusherError::Reference(err.to_string())
    }
}

/// Attaches an operation description to an error, matching the
/// "failing operation description" requirement for user-visible errors.
pub trait WithContext<T> {
    fn context(self, op: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<PusherError>> WithContext<T> for std::result::Result<T, E> {
    fn context(self, op: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner: PusherError = e.into();
            match inner {
                PusherError::RegistryProtocol(msg) => {
                    PusherError::RegistryProtocol(format!("{}: {}", op.into(), msg))
                }
                PusherError::Transport(msg) => {
                    PusherError::Transport(format!("{}: {}", op.into(), msg))
                }
                other => other,
            }
        })
    }
}

/// Maps a registry JSON error body (`{errors: [{code, message, detail}]}`)
/// plus the HTTP status to a typed `PusherError`.
pub fn map_registry_error(status: u16, body_errors: &[(String, String)]) -> PusherError {
    let summary = body_errors
        .iter()
        .map(|(code, message)| format!("{code}: {message}"))
        .collect::<Vec<_>>()
        .join("; ");
    match status {
        401 => PusherError::Authentication(if summary.is_empty() {
            "unauthorized".into()
        } else {
            summary
        }),
        403 => PusherError::Authorization(if summary.is_empty() {
            "denied".into()
        } else {
            summary
        }),
        429 => PusherError::Transport(format!("too many requests: {summary}")),
        s if (500..600).contains(&s) => PusherError::Transport(format!("server error {s}: {summary}")),
        s => PusherError::RegistryProtocol(format!("http {s}: {summary}")),
    }
}

/// Whether a registry error (by status) should be retried locally by the
/// HTTP layer. 4xx other than 429 is never retried.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Parses a registry's `{errors: [{code, message, detail}]}` JSON error
/// body (§7) into `(code, message)` pairs for `map_registry_error`. Not
/// every failure carries this shape (a plain-text 5xx from an
/// intermediary proxy, for instance), so a body that doesn't parse just
/// yields an empty list rather than an error.
pub fn parse_registry_error_body(body: &[u8]) -> Vec<(String, String)> {
    #[derive(serde::Deserialize)]
    struct ErrorEntry {
        code: String,
        message: String,
    }
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        errors: Vec<ErrorEntry>,
    }

    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.errors.into_iter().map(|e| (e.code, e.message)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_registry_error_body_extracts_code_and_message() {
        let body = br#"{"errors":[{"code":"MANIFEST_INVALID","message":"bad manifest","detail":{}}]}"#;
        let errors = parse_registry_error_body(body);
        assert_eq!(errors, vec![("MANIFEST_INVALID".to_string(), "bad manifest".to_string())]);
    }

    #[test]
    fn parse_registry_error_body_tolerates_non_envelope_bodies() {
        assert_eq!(parse_registry_error_body(b"not json"), Vec::new());
        assert_eq!(parse_registry_error_body(b"{}"), Vec::new());
    }

    #[test]
    fn map_registry_error_surfaces_parsed_codes() {
        let errors = vec![("DENIED".to_string(), "requested access to the resource is denied".to_string())];
        let err = map_registry_error(403, &errors);
        assert!(matches!(err, PusherError::Authorization(msg) if msg.contains("DENIED")));
    }
}
