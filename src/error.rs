//! Unified error types for the muxer.
//!
//! [`MuxError`] is the crate-level error returned by startup, shutdown and
//! the CLI. [`BackendError`] is local to one forwarded request and is
//! turned into a gateway error response. [`AuditError`] covers the audit
//! store and never reaches client traffic. [`ValidationError`] carries one
//! configuration problem with an optional hint.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub scope: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {}: {}: {}", self.scope, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MuxError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Missing required arguments: {}", missing.join(", "))]
    Usage { missing: Vec<&'static str> },

    #[error("Unable to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener failed: {source}")]
    Listener {
        #[source]
        source: std::io::Error,
    },

    #[error("Mux has already been started")]
    AlreadyStarted,

    #[error("Mux must be created inside a Tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl MuxError {
    /// True for errors caused by bad or incomplete configuration.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::ConfigValidation { .. }
                | Self::ConfigFileNotFound { .. }
                | Self::ConfigParse { .. }
                | Self::Usage { .. }
        )
    }
}

/// Failure to obtain a response from a backend for one request.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("backend {target} is unreachable: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("backend {target} did not respond within {}s", timeout.as_secs_f64())]
    TimedOut { target: String, timeout: Duration },

    #[error("backend {target} returned a malformed response: {source}")]
    Malformed {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("unable to build request for backend {target}: {source}")]
    Request {
        target: String,
        #[source]
        source: BoxError,
    },
}

impl BackendError {
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Unreachable { target, .. }
            | Self::TimedOut { target, .. }
            | Self::Malformed { target, .. }
            | Self::Request { target, .. } => target,
        }
    }

    /// Gateway status sent to the client for this failure.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuditError {
    #[error("Audit database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit store is closed")]
    Closed,
}
