//! Serde data structures for the muxer configuration file.
//!
//! Contains [`Config`] (the root), [`Secondary`] and [`DatabaseConfig`].
//! All types derive `Serialize` and `Deserialize` with
//! `deny_unknown_fields` for strict parsing. Key names follow the JSON
//! template printed by `--print-default-config`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_TIMEOUT_SECS: i64 = 5;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;
pub const DEFAULT_TOKEN_HEADER: &str = "SBE-AUTH";

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

const fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_grace_period() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    #[serde(default = "default_listen")]
    pub listen: String,

    /// Default backend timeout in seconds. Zero disables the limit.
    #[serde(default = "default_timeout")]
    pub timeout: i64,

    /// Seconds in-flight requests get to finish during shutdown.
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,

    /// Request header whose value is stored as the audit token.
    #[serde(default = "default_token_header")]
    pub token_header: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<Secondary>,

    #[serde(default, alias = "scorebot")]
    pub primary: String,

    #[serde(default, rename = "db", skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key: None,
            cert: None,
            listen: default_listen(),
            timeout: default_timeout(),
            grace_period: default_grace_period(),
            token_header: default_token_header(),
            proxies: Vec::new(),
            primary: String::new(),
            database: None,
        }
    }
}

impl Config {
    /// Mux-wide backend timeout, `None` when disabled.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        secs_to_duration(self.timeout)
    }

    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }

    /// The TLS identity when both halves are configured.
    ///
    /// Empty paths count as absent, matching templates that carry
    /// `"cert": ""`.
    #[must_use]
    pub fn tls_pair(&self) -> TlsPair<'_> {
        let cert = self.cert.as_ref().filter(|p| !p.as_os_str().is_empty());
        let key = self.key.as_ref().filter(|p| !p.as_os_str().is_empty());
        match (cert, key) {
            (Some(cert), Some(key)) => TlsPair::Both { cert, key },
            (None, None) => TlsPair::None,
            _ => TlsPair::Incomplete,
        }
    }

    /// The template printed by `--print-default-config`.
    #[must_use]
    pub fn template() -> Self {
        Self {
            proxies: vec![Secondary {
                url: "http://proxy1".into(),
                ignore: false,
                rewrite: HashMap::from([("/url1".to_string(), "/url2".to_string())]),
                paths: Vec::new(),
                timeout: None,
            }],
            primary: "http://scorebot".into(),
            database: Some(DatabaseConfig {
                host: "tcp(mysql:3306)".into(),
                user: "muxer".into(),
                password: "password".into(),
                database: "muxdb".into(),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPair<'a> {
    None,
    Both {
        cert: &'a PathBuf,
        key: &'a PathBuf,
    },
    Incomplete,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Secondary {
    pub url: String,

    /// Disables audit records for traffic through this backend.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore: bool,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rewrite: HashMap<String, String>,

    /// Path prefixes claimed by this backend. Defaults to the rewrite prefixes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
}

impl Secondary {
    #[must_use]
    pub fn match_prefixes(&self) -> Vec<String> {
        if self.paths.is_empty() {
            self.rewrite.keys().cloned().collect()
        } else {
            self.paths.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default, rename = "username")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default, rename = "name")]
    pub database: String,
}

impl DatabaseConfig {
    /// Split `host`, `host:port` or `tcp(host:port)` into its parts.
    #[must_use]
    pub fn host_port(&self) -> (&str, Option<u16>) {
        let raw = self
            .host
            .strip_prefix("tcp(")
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(&self.host);
        match raw.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host, Some(port)),
                Err(_) => (raw, None),
            },
            None => (raw, None),
        }
    }
}

/// Convert a seconds value from the config into a timeout.
/// Zero and negative values mean "no explicit timeout".
#[must_use]
pub fn secs_to_duration(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}
