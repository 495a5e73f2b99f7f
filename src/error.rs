//! Error taxonomy for the wxpath engine.
//!
//! Parse and configuration problems fail fast at `run` entry; everything
//! else is absorbed close to where it happens and either counted or
//! streamed as an error datum when `yield_errors` is enabled.

use thiserror::Error;

/// Expression could not be parsed into a segment program.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("parse error at {position}: {message}")]
pub struct ParseError {
    /// Byte offset into the expression where the problem was detected.
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Runtime invariant violation discovered during segment dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("program error: {0}")]
pub struct ProgramError(pub String);

/// Invalid engine configuration, rejected before any fetch happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid settings:\n  - {}", .0.join("\n  - "))]
    InvalidSettings(Vec<String>),
    #[error("registered hooks mix blocking and suspending modes; use one mode per run")]
    MixedHookModes,
    #[error("cache backend '{0}' is not available in this build")]
    CacheBackendUnavailable(String),
    #[error("blocking entry point called from within an async runtime")]
    NestedRuntime,
}

/// Per-URL fetch failure. Absorbed by the fetcher and counted; surfaced
/// through the stream only when `yield_errors` is set.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("disallowed by robots.txt")]
    RobotsDenied,
    #[error("status {0} not in allowed_response_codes")]
    StatusNotAllowed(u16),
    #[error("redirect loop detected")]
    RedirectLoop,
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    /// HTTP status associated with the failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::StatusNotAllowed(s) => Some(*s),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_redirect() {
            FetchError::RedirectLoop
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// A hook raised or returned invalid data; the offending datum is
/// dropped and the run continues.
#[derive(Debug, Clone, Error)]
#[error("hook '{hook}' failed: {message}")]
pub struct HookError {
    pub hook: String,
    pub message: String,
}

/// Top-level error returned from the engine entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("run cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_reports_position() {
        let err = ParseError::new(12, "unexpected token");
        assert_eq!(err.to_string(), "parse error at 12: unexpected token");
    }

    #[test]
    fn config_error_joins_all_problems() {
        let err = ConfigError::InvalidSettings(vec![
            "concurrency must be positive".to_string(),
            "timeout must be positive".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("concurrency must be positive"));
        assert!(msg.contains("timeout must be positive"));
    }

    #[test]
    fn fetch_error_status() {
        assert_eq!(FetchError::StatusNotAllowed(404).status(), Some(404));
        assert_eq!(FetchError::Timeout.status(), None);
    }
}
