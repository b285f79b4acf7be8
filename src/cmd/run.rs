//! Start the Mux from a config file or from flags.
//!
//! Resolves the configuration, validates it, opens the MySQL audit store
//! and serves until a shutdown signal arrives.

use std::sync::Arc;

use crate::audit::mysql::MySqlAuditSink;
use crate::audit::AuditSink;
use crate::cli::Cli;
use crate::config::{self, model::Config};
use crate::error::MuxError;
use crate::lifecycle;
use crate::logging;
use crate::mux::Mux;

pub async fn execute(cli: Cli) -> Result<(), MuxError> {
    // Usage errors are reported before logging is set up so they reach
    // stderr as plain text.
    let config = resolve_config(&cli).await?;

    logging::init(&cli.log_level, logging::resolve_format(cli.pretty, cli.json));
    config::check(&config)?;

    let Some(db) = config.database.as_ref() else {
        return Err(MuxError::Configuration(
            "audit database settings are required".into(),
        ));
    };
    let sink: Arc<dyn AuditSink> = Arc::new(MySqlAuditSink::connect(db).await?);

    let mux = match Mux::new(&config, sink.clone()) {
        Ok(mux) => mux.with_max_body(cli.max_body),
        Err(e) => {
            if let Err(close_err) = sink.close().await {
                tracing::warn!(error = %close_err, "failed to close audit store");
            }
            return Err(e);
        }
    };

    tracing::info!(
        listen = %config.listen,
        primary = %config.primary,
        secondaries = config.proxies.len(),
        timeout_secs = config.timeout,
        "configuration loaded"
    );

    lifecycle::run(&mux).await
}

async fn resolve_config(cli: &Cli) -> Result<Config, MuxError> {
    match &cli.config {
        Some(path) => config::load(path).await,
        None => cli.flags_config(),
    }
}
