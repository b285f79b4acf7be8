//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for missing or
//! malformed settings: no primary backend, no audit database, negative
//! timeouts, half-configured TLS, bad backend URLs and bad path prefixes.
//! Every problem is collected so the user can fix them in one pass.

use axum::http::HeaderName;
use url::Url;

use super::model::{Config, TlsPair};
use crate::error::ValidationError;

/// Validate a backend URL. Returns `Ok(())` or a human-readable error.
pub fn validate_target_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                Err(format!(
                    "unsupported scheme '{scheme}' (expected http or https)"
                ))
            } else if parsed.host_str().is_none() {
                Err(format!("'{url}' has no host"))
            } else {
                Ok(())
            }
        }
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

/// Validate a path prefix used for matching or rewriting.
pub fn validate_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() {
        return Err("prefix cannot be empty".into());
    }
    if !prefix.starts_with('/') {
        return Err(format!("prefix '{prefix}' must start with '/'"));
    }
    Ok(())
}

fn error(scope: &str, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        scope: scope.into(),
        field: field.into(),
        message: message.into(),
        suggestion: None,
    }
}

/// Check everything: the proxying settings and the audit database.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = mux_errors(config);
    errors.extend(database_errors(config));
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check only the settings the Mux itself consumes.
///
/// Embedders that supply their own [`AuditSink`](crate::audit::AuditSink)
/// have no `db` block, so it is not required here.
pub fn validate_mux(config: &Config) -> Result<(), Vec<ValidationError>> {
    let errors = mux_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn database_errors(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    match &config.database {
        None => errors.push(error("(root)", "db", "audit database settings are required")),
        Some(db) => {
            if db.host.is_empty() {
                errors.push(error("db", "host", "database host cannot be empty"));
            }
            if db.user.is_empty() {
                errors.push(error("db", "username", "database user cannot be empty"));
            }
            if db.database.is_empty() {
                errors.push(error("db", "name", "database name cannot be empty"));
            }
        }
    }
    errors
}

fn mux_errors(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.primary.is_empty() {
        errors.push(ValidationError {
            suggestion: Some("set \"primary\" to the default backend URL".into()),
            ..error("(root)", "primary", "a primary backend is required")
        });
    } else if let Err(msg) = validate_target_url(&config.primary) {
        errors.push(error("(root)", "primary", msg));
    }

    if config.timeout < 0 {
        errors.push(error(
            "(root)",
            "timeout",
            "timeout must be greater than or equal to zero",
        ));
    }

    if config.listen.is_empty() {
        errors.push(error("(root)", "listen", "listen address cannot be empty"));
    }

    if config.token_header.parse::<HeaderName>().is_err() {
        errors.push(error(
            "(root)",
            "token_header",
            format!("'{}' is not a valid header name", config.token_header),
        ));
    }

    if config.tls_pair() == TlsPair::Incomplete {
        errors.push(ValidationError {
            suggestion: Some("set both \"cert\" and \"key\", or neither".into()),
            ..error("(root)", "cert/key", "TLS needs both a certificate and a key")
        });
    }

    for (i, secondary) in config.proxies.iter().enumerate() {
        let scope = format!("proxies[{i}]");

        if let Err(msg) = validate_target_url(&secondary.url) {
            errors.push(error(&scope, "url", msg));
        }

        if secondary.timeout.is_some_and(|t| t < 0) {
            errors.push(error(
                &scope,
                "timeout",
                "timeout must be greater than or equal to zero",
            ));
        }

        for (from, to) in &secondary.rewrite {
            if let Err(msg) = validate_prefix(from) {
                errors.push(ValidationError {
                    suggestion: (!from.is_empty()).then(|| format!("did you mean '/{from}'?")),
                    ..error(&scope, "rewrite", msg)
                });
            }
            if !to.is_empty() && !to.starts_with('/') {
                errors.push(ValidationError {
                    suggestion: Some(format!("did you mean '/{to}'?")),
                    ..error(&scope, "rewrite", format!("replacement '{to}' must start with '/'"))
                });
            }
        }

        for path in &secondary.paths {
            if let Err(msg) = validate_prefix(path) {
                errors.push(error(&scope, "paths", msg));
            }
        }
    }

    errors
}
