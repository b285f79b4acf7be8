//! Top-level command execution.
//!
//! [`dispatch`] either prints the config template (`-d`) or hands the
//! parsed CLI to [`run`], which builds and serves the Mux.

pub mod run;

use crate::cli::Cli;
use crate::config;
use crate::error::MuxError;

pub async fn dispatch(cli: Cli) -> Result<(), MuxError> {
    if cli.print_default_config {
        println!("{}", config::template());
        return Ok(());
    }
    run::execute(cli).await
}
