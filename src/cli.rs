//! Command-line interface definitions using clap derive macros.
//!
//! The flat [`Cli`] parser either points at a JSON config file (`-c`) or
//! carries a complete single-secondary configuration in flags. Every flag
//! has an environment variable equivalent for container deployments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::model::{Config, DatabaseConfig, Secondary, DEFAULT_GRACE_PERIOD_SECS};
use crate::config::model::{DEFAULT_LISTEN, DEFAULT_TIMEOUT_SECS};
use crate::error::MuxError;
use crate::server::DEFAULT_MAX_BODY;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("SWITCHMUX_GIT_SHORT"),
    ")"
);

#[derive(Parser, Debug)]
#[command(
    name = "switchmux",
    version,
    long_version = LONG_VERSION,
    about = "Traffic multiplexer with per-request audit logging",
    after_help = "\x1b[1mExamples:\x1b[0m\n  \
        switchmux -d > mux.json                       Write a starter config\n  \
        switchmux -c mux.json                         Start from a config file\n  \
        switchmux --sbe http://core --db tcp(db:3306) --db-name muxdb --db-user muxer"
)]
pub struct Cli {
    /// Config file path (JSON). When set, the proxy and database flags are ignored
    #[arg(short = 'c', long, env = "SWITCHMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the default config and exit
    #[arg(short = 'd', long)]
    pub print_default_config: bool,

    /// Address and port to listen on
    #[arg(long, env = "SWITCHMUX_BIND", default_value = DEFAULT_LISTEN)]
    pub bind: String,

    /// Path to the TLS certificate (PEM)
    #[arg(long, env = "SWITCHMUX_CERT", help_heading = "TLS")]
    pub cert: Option<PathBuf>,

    /// Path to the TLS private key (PEM)
    #[arg(long, env = "SWITCHMUX_KEY", help_heading = "TLS")]
    pub key: Option<PathBuf>,

    /// Backend request timeout in seconds (0 disables it)
    #[arg(
        long,
        env = "SWITCHMUX_TIMEOUT",
        default_value_t = DEFAULT_TIMEOUT_SECS,
        allow_negative_numbers = true
    )]
    pub timeout: i64,

    /// Primary backend URL
    #[arg(long, visible_alias = "sbe", env = "SWITCHMUX_PRIMARY", help_heading = "Backends")]
    pub primary: Option<String>,

    /// Secondary backend URL
    #[arg(long, env = "SWITCHMUX_PROXY", help_heading = "Backends")]
    pub proxy: Option<String>,

    /// Path prefix routed to the secondary backend (repeatable)
    #[arg(
        long = "proxy-path",
        env = "SWITCHMUX_PROXY_PATHS",
        value_delimiter = ',',
        help_heading = "Backends"
    )]
    pub proxy_paths: Vec<String>,

    /// Audit database host (`host`, `host:port` or `tcp(host:port)`)
    #[arg(long, env = "SWITCHMUX_DB", help_heading = "Audit Database")]
    pub db: Option<String>,

    /// Audit database name
    #[arg(long, env = "SWITCHMUX_DB_NAME", help_heading = "Audit Database")]
    pub db_name: Option<String>,

    /// Audit database user
    #[arg(long, env = "SWITCHMUX_DB_USER", help_heading = "Audit Database")]
    pub db_user: Option<String>,

    /// Audit database password
    #[arg(
        long,
        env = "SWITCHMUX_DB_PASSWORD",
        hide_env_values = true,
        help_heading = "Audit Database"
    )]
    pub db_password: Option<String>,

    // -- Tuning --
    /// Seconds in-flight requests get to finish on shutdown
    #[arg(
        long,
        env = "SWITCHMUX_GRACE_PERIOD",
        default_value_t = DEFAULT_GRACE_PERIOD_SECS,
        help_heading = "Tuning"
    )]
    pub grace_period: u64,

    /// Max request body size in bytes
    #[arg(
        long,
        env = "SWITCHMUX_MAX_BODY",
        default_value_t = DEFAULT_MAX_BODY,
        help_heading = "Tuning"
    )]
    pub max_body: usize,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,
}

impl Cli {
    /// Build a config from flags alone.
    ///
    /// Fails with [`MuxError::Usage`] naming every missing or invalid
    /// required flag.
    pub fn flags_config(&self) -> Result<Config, MuxError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

        let mut missing = Vec::new();
        if !present(&self.primary) {
            missing.push("--primary");
        }
        if self.bind.is_empty() {
            missing.push("--bind");
        }
        if self.timeout < 0 {
            missing.push("--timeout (must be >= 0)");
        }
        if !present(&self.db) {
            missing.push("--db");
        }
        if !present(&self.db_name) {
            missing.push("--db-name");
        }
        if !present(&self.db_user) {
            missing.push("--db-user");
        }
        if !missing.is_empty() {
            return Err(MuxError::Usage { missing });
        }

        let proxies = self
            .proxy
            .iter()
            .filter(|url| !url.is_empty())
            .map(|url| Secondary {
                url: url.clone(),
                ignore: false,
                rewrite: Default::default(),
                paths: self.proxy_paths.clone(),
                timeout: None,
            })
            .collect();

        Ok(Config {
            key: self.key.clone(),
            cert: self.cert.clone(),
            listen: self.bind.clone(),
            timeout: self.timeout,
            grace_period: self.grace_period,
            proxies,
            primary: self.primary.clone().unwrap_or_default(),
            database: Some(DatabaseConfig {
                host: self.db.clone().unwrap_or_default(),
                user: self.db_user.clone().unwrap_or_default(),
                password: self.db_password.clone().unwrap_or_default(),
                database: self.db_name.clone().unwrap_or_default(),
            }),
            ..Config::default()
        })
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("switchmux").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_build_a_complete_config() {
        let cli = parse(&[
            "--sbe",
            "http://core",
            "--db",
            "tcp(db:3306)",
            "--db-name",
            "muxdb",
            "--db-user",
            "muxer",
            "--proxy",
            "http://side",
            "--proxy-path",
            "/api",
            "--proxy-path",
            "/v2",
        ]);
        let config = cli.flags_config().unwrap();
        assert_eq!(config.primary, "http://core");
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.proxies.len(), 1);
        assert_eq!(config.proxies[0].paths, vec!["/api", "/v2"]);
        assert!(crate::config::check(&config).is_ok());
    }

    #[test]
    fn missing_flags_are_all_named() {
        let cli = parse(&["--sbe", "http://core", "--timeout", "-1"]);
        let Err(MuxError::Usage { missing }) = cli.flags_config() else {
            panic!("expected a usage error");
        };
        assert_eq!(
            missing,
            vec!["--timeout (must be >= 0)", "--db", "--db-name", "--db-user"]
        );
    }

    #[test]
    fn empty_proxy_adds_no_secondary() {
        let cli = parse(&[
            "--primary", "http://core", "--db", "db", "--db-name", "n", "--db-user", "u",
        ]);
        assert!(cli.flags_config().unwrap().proxies.is_empty());
    }
}
